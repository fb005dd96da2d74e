//! HTTP calls to the auth endpoints: poll, refresh, API-key exchange.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tether_core::current_unix_timestamp_ms;

use crate::AuthError;

const DEFAULT_API_BASE: &str = "https://cursor.com/api";
const REFRESH_FALLBACK_TTL_MS: i64 = 3_600_000;
const MAX_CONSECUTIVE_POLL_FAILURES: usize = 3;

#[derive(Debug, Clone)]
/// Public struct `AuthConfig` used across Tether components.
pub struct AuthConfig {
    pub api_base: String,
    pub request_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Gentle exponential backoff for login polling.
pub struct PollConfig {
    pub base_delay_ms: u64,
    pub factor_percent: u64,
    pub cap_ms: u64,
    pub max_attempts: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            factor_percent: 120,
            cap_ms: 10_000,
            max_attempts: 150,
        }
    }
}

impl PollConfig {
    fn delay_for_attempt(&self, attempt: usize) -> u64 {
        let mut delay = self.base_delay_ms;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.factor_percent) / 100;
            if delay >= self.cap_ms {
                return self.cap_ms;
            }
        }
        delay.min(self.cap_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
/// Token pair returned by poll and exchange.
pub struct AuthTokens {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
/// Public struct `AuthClient` used across Tether components.
pub struct AuthClient {
    client: reqwest::Client,
    config: AuthConfig,
}

impl AuthClient {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    /// Polls until the browser login completes. `404` means pending; three
    /// consecutive other failures, or attempt exhaustion, gives up with
    /// `None`.
    pub async fn poll_login(
        &self,
        uuid: &str,
        verifier: &str,
        poll: &PollConfig,
    ) -> Result<Option<AuthTokens>, AuthError> {
        let mut consecutive_failures = 0;
        for attempt in 0..poll.max_attempts {
            if attempt > 0 {
                sleep(Duration::from_millis(poll.delay_for_attempt(attempt - 1))).await;
            }
            let response = self
                .client
                .get(self.url("/auth/poll"))
                .query(&[("uuid", uuid), ("verifier", verifier)])
                .send()
                .await;
            match response {
                Ok(response) if response.status().is_success() => {
                    return Ok(Some(response.json::<AuthTokens>().await?));
                }
                Ok(response) if response.status().as_u16() == 404 => {
                    consecutive_failures = 0;
                    debug!(attempt, "login still pending");
                }
                Ok(response) => {
                    consecutive_failures += 1;
                    warn!(
                        status = response.status().as_u16(),
                        consecutive_failures, "login poll failed"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                        return Ok(None);
                    }
                }
                Err(error) => {
                    consecutive_failures += 1;
                    warn!(%error, consecutive_failures, "login poll transport failure");
                    if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Exchanges a user API key for a token pair.
    pub async fn exchange_api_key(&self, api_key: &str) -> Result<AuthTokens, AuthError> {
        let response = self
            .client
            .post(self.url("/auth/exchange_user_api_key"))
            .bearer_auth(api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<AuthTokens>().await?)
    }

    /// Refreshes the access token. The new token's JWT `exp` claim (read
    /// without verification) becomes the expiry; a token without one gets a
    /// one-hour default.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, i64), AuthError> {
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .bearer_auth(refresh_token)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AuthError::RefreshFailed(format!(
                "status {}: {body}",
                status.as_u16()
            )));
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|error| AuthError::RefreshFailed(format!("non-JSON response: {error}")))?;
        let access_token = parsed
            .get("accessToken")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::RefreshFailed("response lacks accessToken".to_string()))?
            .to_string();
        let expires_at_ms = jwt_expiry_ms(&access_token)
            .unwrap_or_else(|| current_unix_timestamp_ms() + REFRESH_FALLBACK_TTL_MS);
        Ok((access_token, expires_at_ms))
    }
}

/// Reads the `exp` claim from a JWT payload without any verification.
pub fn jwt_expiry_ms(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    let exp_seconds = claims.get("exp").and_then(Value::as_i64)?;
    exp_seconds.checked_mul(1_000)
}
