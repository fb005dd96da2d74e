//! Session events → OpenAI stream chunks.
//!
//! Chunk shapes follow the `chat.completion.chunk` wire format; the stream
//! terminates with `data: [DONE]`. A turn that ends right after a tool start
//! finishes with `"tool_calls"` so clients know a result round is expected.

use serde_json::{json, Value};
use uuid::Uuid;

use tether_core::current_unix_timestamp;
use tether_session::SessionEvent;

const CHUNK_OBJECT: &str = "chat.completion.chunk";
const COMPLETION_OBJECT: &str = "chat.completion";

/// The literal final SSE data line.
pub const SSE_DONE: &str = "[DONE]";

#[derive(Debug)]
/// Streaming translator for one response.
pub struct SseState {
    id: String,
    created: u64,
    model: String,
    next_tool_index: u64,
    last_was_tool: bool,
    sent_role: bool,
}

impl SseState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl_{}", Uuid::new_v4().simple()),
            created: current_unix_timestamp(),
            model: model.into(),
            next_tool_index: 0,
            last_was_tool: false,
            sent_role: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Chunks to emit for one session event, in order.
    pub fn chunks_for_event(&mut self, event: &SessionEvent) -> Vec<Value> {
        match event {
            SessionEvent::Text { text } => {
                self.last_was_tool = false;
                let mut delta = json!({ "content": text });
                self.attach_role(&mut delta);
                vec![self.chunk(delta, None)]
            }
            SessionEvent::ToolExec(exec) => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                self.last_was_tool = true;
                let arguments =
                    serde_json::to_string(&exec.arguments).unwrap_or_else(|_| "{}".to_string());
                let mut delta = json!({
                    "tool_calls": [{
                        "index": index,
                        "id": exec.tool_call_id,
                        "type": "function",
                        "function": { "name": exec.name, "arguments": arguments },
                    }]
                });
                self.attach_role(&mut delta);
                vec![self.chunk(delta, None)]
            }
            SessionEvent::ToolCallStarted { call_id, name } => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                self.last_was_tool = true;
                let mut delta = json!({
                    "tool_calls": [{
                        "index": index,
                        "id": call_id,
                        "type": "function",
                        "function": { "name": name, "arguments": "" },
                    }]
                });
                self.attach_role(&mut delta);
                vec![self.chunk(delta, None)]
            }
            SessionEvent::PartialToolCall { args_delta, .. } => {
                let index = self.next_tool_index.saturating_sub(1);
                let delta = json!({
                    "tool_calls": [{
                        "index": index,
                        "function": { "arguments": args_delta },
                    }]
                });
                vec![self.chunk(delta, None)]
            }
            SessionEvent::TurnEnded => {
                let reason = if self.last_was_tool {
                    "tool_calls"
                } else {
                    "stop"
                };
                vec![self.chunk(json!({}), Some(reason))]
            }
            SessionEvent::ProtocolError { message } => {
                vec![json!({
                    "error": {
                        "type": "server_error",
                        "code": "upstream_protocol_error",
                        "message": message,
                    }
                })]
            }
            SessionEvent::ToolCallCompleted { .. }
            | SessionEvent::Checkpoint { .. }
            | SessionEvent::Aborted { .. } => Vec::new(),
        }
    }

    fn attach_role(&mut self, delta: &mut Value) {
        if !self.sent_role {
            delta["role"] = json!("assistant");
            self.sent_role = true;
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": CHUNK_OBJECT,
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }
}

#[derive(Debug, Default)]
/// Collects a whole turn for non-streaming responses.
pub struct ResponseAggregator {
    text: String,
    tool_calls: Vec<Value>,
    finished: bool,
    error: Option<String>,
    last_was_tool: bool,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Text { text } => {
                self.last_was_tool = false;
                self.text.push_str(text);
            }
            SessionEvent::ToolExec(exec) => {
                self.last_was_tool = true;
                let arguments =
                    serde_json::to_string(&exec.arguments).unwrap_or_else(|_| "{}".to_string());
                self.tool_calls.push(json!({
                    "id": exec.tool_call_id,
                    "type": "function",
                    "function": { "name": exec.name, "arguments": arguments },
                }));
            }
            SessionEvent::TurnEnded => self.finished = true,
            SessionEvent::ProtocolError { message } => {
                self.error = Some(message.clone());
            }
            _ => {}
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The aggregated `chat.completion` body.
    pub fn into_response(self, model: &str) -> Value {
        let finish_reason = if self.last_was_tool { "tool_calls" } else { "stop" };
        let mut message = json!({
            "role": "assistant",
            "content": self.text,
        });
        if !self.tool_calls.is_empty() {
            message["tool_calls"] = json!(self.tool_calls);
        }
        json!({
            "id": format!("chatcmpl_{}", Uuid::new_v4().simple()),
            "object": COMPLETION_OBJECT,
            "created": current_unix_timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": finish_reason,
            }],
        })
    }
}
