//! Per-request Cursor agent sessions.
//!
//! One inbound OpenAI request owns one session: an inbound frame reader
//! demultiplexes model output, tool-exec requests, blob operations, and
//! heartbeats, while an outbound sender pushes sequenced `BidiAppend` calls.
//! Sessions are never reused across inbound requests; the server persists
//! continuations to blobs once a live stream receives tool results, so prior
//! history is flattened into the next prompt instead.

pub mod blob_store;
pub mod events;
pub mod session;
pub mod tool_bridge;
pub mod transport;

pub use blob_store::BlobStore;
pub use events::{PendingExec, SessionEvent, ToolExecEvent};
pub use session::{AgentSession, IdlePolicy, SessionConfig, SessionState};
pub use tool_bridge::{
    build_exec_reply, exec_to_tool_event, make_tool_call_id, parse_session_id,
};
pub use transport::{AgentTransport, FrameByteStream, HttpAgentTransport, TransportConfig};

use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `SessionError` values.
pub enum SessionError {
    #[error("protocol framing error: {0}")]
    Framing(#[from] tether_wire::WireError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("transport returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("session deadline exceeded")]
    DeadlineExceeded,
    #[error("session is closed")]
    Closed,
}
