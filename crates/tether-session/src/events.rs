//! Events yielded by a session to the OpenAI adapter, in arrival order.

use serde_json::Value;
use tether_wire::ExecRequestPayload;

#[derive(Debug, Clone, PartialEq)]
/// Enumerates supported `SessionEvent` values.
pub enum SessionEvent {
    /// Streamed (or blob-recovered) assistant text.
    Text { text: String },
    ToolCallStarted { call_id: String, name: String },
    PartialToolCall { call_id: String, args_delta: String },
    ToolCallCompleted { call_id: String },
    /// A server-issued tool execution, already bridged to OpenAI naming.
    ToolExec(ToolExecEvent),
    Checkpoint { checkpoint_id: Option<String> },
    /// The server abandoned an exec stream without waiting for its result.
    Aborted { exec_stream_id: u32 },
    TurnEnded,
    /// Fatal for the session; no turn-end follows.
    ProtocolError { message: String },
}

#[derive(Debug, Clone, PartialEq)]
/// A bridged exec request as the OpenAI side sees it.
pub struct ToolExecEvent {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
/// The original Cursor exec request retained for reply encoding.
pub struct PendingExec {
    pub id: u32,
    pub exec_id: String,
    pub request: ExecRequestPayload,
}
