//! HTTP transport for one Cursor agent session.
//!
//! Two calls share the session's request id: `RunSSE` opens the inbound
//! streaming body and `BidiAppend` pushes one framed outbound message per
//! unary call. The trait seam keeps session logic testable against scripted
//! byte streams.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use tokio::time::sleep;

use crate::SessionError;
use tether_wire::{encode_frame, BidiAppendRequest, BidiRequestId};

const RUN_SSE_PATH: &str = "/agent.v1.AgentService/RunSSE";
const BIDI_APPEND_PATH: &str = "/aiserver.v1.BidiService/BidiAppend";
const BASE_BACKOFF_MS: u64 = 200;

pub type FrameByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SessionError>> + Send>>;

#[async_trait]
/// Trait contract for the two-legged session transport.
pub trait AgentTransport: Send + Sync {
    /// Opens the inbound streaming leg for `request_id`.
    async fn open_run_stream(&self, request_id: &str) -> Result<FrameByteStream, SessionError>;

    /// Issues one outbound append. Calls for one session arrive in
    /// `append_seqno` order; the caller serializes them.
    async fn bidi_append(&self, append: &BidiAppendRequest) -> Result<(), SessionError>;
}

#[derive(Debug, Clone)]
/// Public struct `TransportConfig` for the reqwest-backed transport.
pub struct TransportConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api2.cursor.sh".to_string(),
            request_timeout_ms: 120_000,
            max_retries: 2,
        }
    }
}

/// Production transport over reqwest. Headers (bearer token, checksum,
/// client fingerprint) are fixed at construction; a session builds one
/// transport and drops it with the session.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpAgentTransport {
    pub fn new(config: TransportConfig, headers: HeaderMap) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn open_run_stream(&self, request_id: &str) -> Result<FrameByteStream, SessionError> {
        let body = encode_frame(
            &BidiRequestId {
                request_id: request_id.to_string(),
            }
            .encode(),
        );
        let response = self
            .client
            .post(self.url(RUN_SSE_PATH))
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(SessionError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let stream = response
            .bytes_stream()
            .map_err(SessionError::from)
            .boxed();
        Ok(stream)
    }

    async fn bidi_append(&self, append: &BidiAppendRequest) -> Result<(), SessionError> {
        let body = encode_frame(&append.encode());
        for attempt in 0..=self.config.max_retries {
            let response = self
                .client
                .post(self.url(BIDI_APPEND_PATH))
                .body(body.clone())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    if status.as_u16() == 401 {
                        return Err(SessionError::Unauthorized);
                    }
                    let raw = response.text().await.unwrap_or_default();
                    if attempt < self.config.max_retries && should_retry_status(status.as_u16()) {
                        sleep(Duration::from_millis(next_backoff_ms(attempt))).await;
                        continue;
                    }
                    return Err(SessionError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_http_error(&error) {
                        sleep(Duration::from_millis(next_backoff_ms(attempt))).await;
                        continue;
                    }
                    return Err(SessionError::Http(error));
                }
            }
        }
        unreachable!("append retry loop always returns");
    }
}

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

pub fn next_backoff_ms(attempt: usize) -> u64 {
    let shift = attempt.min(6);
    BASE_BACKOFF_MS.saturating_mul(1_u64 << shift)
}

pub fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}
