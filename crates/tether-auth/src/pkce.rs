//! PKCE login initiation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const LOGIN_BASE: &str = "https://cursor.com";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Everything the caller needs to finish a browser login.
pub struct PkceLogin {
    pub url: String,
    pub uuid: String,
    pub verifier: String,
}

/// Generates a fresh verifier/challenge pair and the deep-control login URL.
pub fn start_login() -> PkceLogin {
    let verifier = generate_verifier();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    let uuid = Uuid::new_v4().to_string();
    let url = format!(
        "{LOGIN_BASE}/loginDeepControl?challenge={challenge}&uuid={uuid}&mode=login&redirectTarget=cli"
    );
    PkceLogin {
        url,
        uuid,
        verifier,
    }
}

fn generate_verifier() -> String {
    let mut random = [0u8; 32];
    random[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    random[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(random)
}
