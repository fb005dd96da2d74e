//! Header sets for the Cursor endpoints.
//!
//! Every call carries the bearer token plus the client fingerprint headers.
//! The bidi paths speak grpc-web framing; the sidecar RPCs speak Connect
//! JSON.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use sha2::{Digest, Sha256};

const CLIENT_TYPE: &str = "cli";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stable per-process checksum fingerprint: a sha256-hex digest of the
/// machine identity. The server treats it as opaque.
pub fn derive_checksum() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "tether".to_string());
    let seed = format!("{host}:{}:{}", std::env::consts::OS, std::env::consts::ARCH);
    format!("{:x}", Sha256::digest(seed.as_bytes()))
}

fn common_headers(access_token: &str, timezone: &str, request_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(
        &mut headers,
        AUTHORIZATION.as_str(),
        &format!("Bearer {access_token}"),
    );
    insert(&mut headers, "x-cursor-checksum", &derive_checksum());
    insert(&mut headers, "x-cursor-client-version", CLIENT_VERSION);
    insert(&mut headers, "x-cursor-client-type", CLIENT_TYPE);
    insert(&mut headers, "x-cursor-timezone", timezone);
    insert(&mut headers, "x-ghost-mode", "false");
    insert(&mut headers, "x-cursor-streaming", "true");
    insert(&mut headers, "x-request-id", request_id);
    headers
}

/// Headers for `RunSSE` / `BidiAppend`.
pub fn bidi_headers(access_token: &str, timezone: &str, request_id: &str) -> HeaderMap {
    let mut headers = common_headers(access_token, timezone, request_id);
    insert(
        &mut headers,
        CONTENT_TYPE.as_str(),
        "application/grpc-web+proto",
    );
    headers
}

/// Headers for the Connect JSON sidecar RPCs (model listing and friends).
pub fn json_rpc_headers(access_token: &str, timezone: &str, request_id: &str) -> HeaderMap {
    let mut headers = common_headers(access_token, timezone, request_id);
    insert(&mut headers, CONTENT_TYPE.as_str(), "application/json");
    insert(&mut headers, "connect-protocol-version", "1");
    headers
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        name.parse::<reqwest::header::HeaderName>(),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_hex_sha256() {
        let first = derive_checksum();
        let second = derive_checksum();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn bidi_headers_carry_the_full_fingerprint_set() {
        let headers = bidi_headers("token-1", "UTC", "req-1");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer token-1");
        assert_eq!(
            headers.get("content-type").unwrap(),
            "application/grpc-web+proto"
        );
        assert_eq!(headers.get("x-cursor-client-type").unwrap(), "cli");
        assert_eq!(headers.get("x-cursor-timezone").unwrap(), "UTC");
        assert_eq!(headers.get("x-ghost-mode").unwrap(), "false");
        assert_eq!(headers.get("x-cursor-streaming").unwrap(), "true");
        assert_eq!(headers.get("x-request-id").unwrap(), "req-1");
        assert!(headers.get("x-cursor-checksum").is_some());
        assert!(headers.get("connect-protocol-version").is_none());
    }

    #[test]
    fn json_rpc_headers_switch_content_type_and_connect_version() {
        let headers = json_rpc_headers("token-1", "UTC", "req-2");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(headers.get("connect-protocol-version").unwrap(), "1");
    }
}
