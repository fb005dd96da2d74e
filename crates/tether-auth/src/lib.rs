//! Credential core for the Cursor agent backend.
//!
//! Covers PKCE login initiation, token polling, refresh with single-flight
//! coalescing, the expiry predicate, and credential persistence. Tokens are
//! opaque here; the JWT payload is read only to learn the expiry instant.

pub mod client;
pub mod headers;
pub mod pkce;
pub mod store;

pub use client::{AuthClient, AuthConfig, AuthTokens, PollConfig};
pub use headers::{bidi_headers, derive_checksum, json_rpc_headers};
pub use pkce::{start_login, PkceLogin};
pub use store::{
    default_credential_path, CredentialManager, CredentialRecord, CredentialStorage,
    FileCredentialStore, MemoryCredentialStore,
};

use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `AuthError` values.
pub enum AuthError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("auth endpoint returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("credential storage error: {0}")]
    Storage(String),
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("refresh failed: {0}")]
    RefreshFailed(String),
}
