//! OpenAI-compatible gateway server.
//!
//! Accepts `/v1/chat/completions` (streaming SSE or aggregated JSON) and
//! `/v1/models`, opening one fresh Cursor session per inbound request.

mod error;
mod handlers;

pub use error::ApiError;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

use tether_auth::{AuthClient, CredentialManager};
use tether_session::IdlePolicy;

pub(crate) const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";
pub(crate) const MODELS_ENDPOINT: &str = "/v1/models";

#[derive(Debug, Clone)]
/// Public struct `GatewayConfig` used across Tether components.
pub struct GatewayConfig {
    pub bind: String,
    pub base_url: String,
    pub workspace_path: String,
    pub default_model: String,
    pub request_timeout_ms: u64,
    pub idle_policy: IdlePolicy,
    pub timezone: String,
    pub debug: bool,
    pub timing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8844".to_string(),
            base_url: "https://api2.cursor.sh".to_string(),
            workspace_path: std::env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_else(|_| ".".to_string()),
            default_model: "sonnet-4.5".to_string(),
            request_timeout_ms: 120_000,
            idle_policy: IdlePolicy::default(),
            timezone: "UTC".to_string(),
            debug: false,
            timing: false,
        }
    }
}

/// Shared per-process state behind the router.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub auth_client: AuthClient,
    pub credentials: CredentialManager,
}

/// Builds the application router over shared state.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            CHAT_COMPLETIONS_ENDPOINT,
            post(handlers::handle_chat_completions),
        )
        .route(MODELS_ENDPOINT, get(handlers::handle_models))
        .with_state(state)
}

/// Binds and serves until ctrl-c.
pub async fn run_gateway_server(state: GatewayState) -> Result<()> {
    let bind_addr = state
        .config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", state.config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    tracing::info!(%local_addr, backend = %state.config.base_url, "gateway listening");

    let app = build_router(Arc::new(state));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")
}
