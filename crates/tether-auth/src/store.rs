//! Credential records, persistence, and the process-global manager.
//!
//! The manager caches one credential record in memory and delegates
//! persistence to a [`CredentialStorage`] implementation. Refreshes coalesce:
//! an in-flight refresh is awaited by every other caller and only one HTTP
//! call fires per expiry event.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use tether_core::{current_unix_timestamp_ms, write_text_atomic};

use crate::client::AuthClient;
use crate::AuthError;

/// Refresh this many ms before actual expiry.
const EXPIRY_SLACK_MS: i64 = 60_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Public struct `CredentialRecord` used across Tether components.
pub struct CredentialRecord {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub api_key: Option<String>,
}

impl CredentialRecord {
    /// True when the access token is missing or within the refresh window.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        if self
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .is_none()
        {
            return true;
        }
        match self.expires_at_ms {
            Some(expires_at_ms) => expires_at_ms <= now_ms + EXPIRY_SLACK_MS,
            None => false,
        }
    }
}

/// On-disk JSON shape: `{accessToken, refreshToken, apiKey?}`. The stored
/// refresh field may carry `"refresh|apikey"`; split on the first `|`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CredentialFile {
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    refresh_token: String,
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

impl From<CredentialFile> for CredentialRecord {
    fn from(file: CredentialFile) -> Self {
        let (refresh_token, embedded_api_key) = match file.refresh_token.split_once('|') {
            Some((refresh, api_key)) if !api_key.is_empty() => {
                (refresh.to_string(), Some(api_key.to_string()))
            }
            _ => (file.refresh_token, None),
        };
        Self {
            refresh_token,
            access_token: file.access_token.filter(|token| !token.is_empty()),
            expires_at_ms: None,
            api_key: file.api_key.or(embedded_api_key),
        }
    }
}

/// Trait contract for credential persistence backends.
pub trait CredentialStorage: Send + Sync {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError>;
    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// JSON file storage at the per-OS Cursor config path.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_path() -> Result<Self, AuthError> {
        Ok(Self::new(default_credential_path()?))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CredentialStorage for FileCredentialStore {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|error| AuthError::Storage(format!("read {}: {error}", self.path.display())))?;
        let file: CredentialFile = serde_json::from_str(&raw)?;
        Ok(Some(file.into()))
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        let file = CredentialFile {
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            api_key: record.api_key.clone(),
        };
        let body = serde_json::to_string_pretty(&file)?;
        write_text_atomic(&self.path, &body)
            .map_err(|error| AuthError::Storage(error.to_string()))
    }

    fn clear(&self) -> Result<(), AuthError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|error| {
                AuthError::Storage(format!("remove {}: {error}", self.path.display()))
            })?;
        }
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral use.
#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl CredentialStorage for MemoryCredentialStore {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        Ok(self.record.lock().expect("record lock").clone())
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        *self.record.lock().expect("record lock") = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.record.lock().expect("record lock") = None;
        Ok(())
    }
}

/// Credential file location by OS: `%APPDATA%/Cursor/auth.json` on Windows,
/// `~/.cursor/auth.json` on macOS, XDG config elsewhere.
pub fn default_credential_path() -> Result<PathBuf, AuthError> {
    if cfg!(target_os = "windows") {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| AuthError::Storage("APPDATA is not set".to_string()))?;
        return Ok(PathBuf::from(appdata).join("Cursor").join("auth.json"));
    }
    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME")
            .map_err(|_| AuthError::Storage("HOME is not set".to_string()))?;
        return Ok(PathBuf::from(home).join(".cursor").join("auth.json"));
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Ok(PathBuf::from(xdg).join("cursor").join("auth.json"));
        }
    }
    let home =
        std::env::var("HOME").map_err(|_| AuthError::Storage("HOME is not set".to_string()))?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("cursor")
        .join("auth.json"))
}

/// Process-global credential owner.
///
/// Readers observe atomic record swaps through the sync mutex; the async
/// mutex is the single-flight guard around the refresh critical section.
pub struct CredentialManager {
    storage: Box<dyn CredentialStorage>,
    record: Mutex<CredentialRecord>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl CredentialManager {
    pub fn new(storage: Box<dyn CredentialStorage>) -> Result<Self, AuthError> {
        let record = storage.load()?.unwrap_or_default();
        Ok(Self {
            storage,
            record: Mutex::new(record),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get_access(&self) -> Option<String> {
        self.record.lock().expect("record lock").access_token.clone()
    }

    pub fn get_refresh(&self) -> Option<String> {
        let token = self.record.lock().expect("record lock").refresh_token.clone();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    pub fn get_api_key(&self) -> Option<String> {
        self.record.lock().expect("record lock").api_key.clone()
    }

    pub fn get_all(&self) -> CredentialRecord {
        self.record.lock().expect("record lock").clone()
    }

    /// Replaces the cached record and persists it.
    pub fn set_auth(
        &self,
        access_token: String,
        refresh_token: String,
        api_key: Option<String>,
    ) -> Result<(), AuthError> {
        let expires_at_ms = crate::client::jwt_expiry_ms(&access_token);
        let record = CredentialRecord {
            refresh_token,
            access_token: Some(access_token),
            expires_at_ms,
            api_key,
        };
        self.storage.save(&record)?;
        *self.record.lock().expect("record lock") = record;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        self.storage.clear()?;
        *self.record.lock().expect("record lock") = CredentialRecord::default();
        Ok(())
    }

    /// Returns a usable access token, refreshing first when the expiry
    /// predicate says so. Concurrent callers coalesce onto one refresh; a
    /// failed refresh falls back to the existing token with a warning.
    pub async fn valid_access_token(&self, client: &AuthClient) -> Result<String, AuthError> {
        let now_ms = current_unix_timestamp_ms();
        {
            let record = self.record.lock().expect("record lock");
            if !record.is_expired(now_ms) {
                if let Some(token) = record.access_token.clone() {
                    return Ok(token);
                }
            }
        }
        self.refresh_once(client).await
    }

    /// Forces one refresh (the 401 retry path) regardless of the predicate.
    pub async fn refresh_once(&self, client: &AuthClient) -> Result<String, AuthError> {
        let _gate = self.refresh_gate.lock().await;

        // A racing caller may have finished the refresh while we waited.
        let now_ms = current_unix_timestamp_ms();
        let (stale_access, refresh_token) = {
            let record = self.record.lock().expect("record lock");
            if !record.is_expired(now_ms) {
                if let Some(token) = record.access_token.clone() {
                    return Ok(token);
                }
            }
            (record.access_token.clone(), record.refresh_token.clone())
        };
        if refresh_token.is_empty() {
            return match stale_access {
                Some(token) => Ok(token),
                None => Err(AuthError::MissingRefreshToken),
            };
        }

        match client.refresh(&refresh_token).await {
            Ok((access_token, expires_at_ms)) => {
                let record = {
                    let mut record = self.record.lock().expect("record lock");
                    record.access_token = Some(access_token.clone());
                    record.expires_at_ms = Some(expires_at_ms);
                    record.clone()
                };
                if let Err(error) = self.storage.save(&record) {
                    warn!(%error, "failed to persist refreshed credentials");
                }
                Ok(access_token)
            }
            Err(error) => match stale_access {
                // Keep serving the old token; the backend may still accept it.
                Some(token) => {
                    warn!(%error, "token refresh failed, continuing with existing token");
                    Ok(token)
                }
                None => Err(error),
            },
        }
    }
}

/// Reads an arbitrary JSON claim payload; kept for diagnostics surfaces.
pub fn decode_token_claims(token: &str) -> Option<Value> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    serde_json::from_slice(&decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_predicate_requires_token_and_window() {
        let now = 1_000_000;
        let mut record = CredentialRecord::default();
        assert!(record.is_expired(now), "no access token");

        record.access_token = Some("token".to_string());
        record.expires_at_ms = None;
        assert!(!record.is_expired(now), "no expiry recorded");

        record.expires_at_ms = Some(now + 60_000);
        assert!(record.is_expired(now), "inside the slack window");

        record.expires_at_ms = Some(now + 60_001);
        assert!(!record.is_expired(now), "outside the slack window");
    }

    #[test]
    fn unit_combined_refresh_field_splits_on_first_pipe() {
        let file = CredentialFile {
            access_token: Some("at".to_string()),
            refresh_token: "refresh-part|api|key".to_string(),
            api_key: None,
        };
        let record: CredentialRecord = file.into();
        assert_eq!(record.refresh_token, "refresh-part");
        assert_eq!(record.api_key.as_deref(), Some("api|key"));
    }

    #[test]
    fn explicit_api_key_wins_over_embedded_one() {
        let file = CredentialFile {
            access_token: None,
            refresh_token: "refresh|embedded".to_string(),
            api_key: Some("explicit".to_string()),
        };
        let record: CredentialRecord = file.into();
        assert_eq!(record.api_key.as_deref(), Some("explicit"));
    }

    #[test]
    fn functional_file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join("auth.json"));
        assert!(store.load().expect("load empty").is_none());

        let record = CredentialRecord {
            refresh_token: "rt".to_string(),
            access_token: Some("at".to_string()),
            expires_at_ms: Some(5),
            api_key: Some("key".to_string()),
        };
        store.save(&record).expect("save");
        let loaded = store.load().expect("load").expect("record");
        assert_eq!(loaded.refresh_token, "rt");
        assert_eq!(loaded.access_token.as_deref(), Some("at"));
        assert_eq!(loaded.api_key.as_deref(), Some("key"));
        // Expiry is not persisted; it is re-learned from the JWT.
        assert_eq!(loaded.expires_at_ms, None);

        store.clear().expect("clear");
        assert!(store.load().expect("load cleared").is_none());
    }

    #[test]
    fn manager_set_auth_persists_and_caches() {
        let manager = CredentialManager::new(Box::new(MemoryCredentialStore::default()))
            .expect("manager");
        manager
            .set_auth("access".to_string(), "refresh".to_string(), None)
            .expect("set");
        assert_eq!(manager.get_access().as_deref(), Some("access"));
        assert_eq!(manager.get_refresh().as_deref(), Some("refresh"));
        assert_eq!(manager.get_api_key(), None);

        manager.clear().expect("clear");
        assert_eq!(manager.get_access(), None);
        assert_eq!(manager.get_refresh(), None);
    }
}
