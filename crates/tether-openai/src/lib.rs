//! OpenAI Chat Completions adapter.
//!
//! Flattens inbound OpenAI conversations into a single Cursor prompt, turns
//! session events back into `chat.completion.chunk` SSE payloads (or one
//! aggregated body), and maintains the model alias catalog.

pub mod models;
pub mod prompt;
pub mod sse;
pub mod types;

pub use models::{
    canonical_model_name, default_remote_model, list_remote_models, resolve_model_limits,
    ModelCatalog, ModelLimits, RemoteModel,
};
pub use prompt::{extract_tool_definitions, flatten_messages};
pub use sse::{ResponseAggregator, SseState, SSE_DONE};
pub use types::{ChatCompletionsRequest, ChatMessage, ToolSpec};

pub use tether_wire::McpToolDefinition;

use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `OpenAiAdapterError` values.
pub enum OpenAiAdapterError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model endpoint returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
