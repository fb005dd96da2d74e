//! Conversation flattening.
//!
//! Cursor sessions are opened fresh per inbound request, so the whole prior
//! OpenAI conversation becomes one role-labeled prompt. Assistant tool calls
//! and tool results are rendered inline as readable JSON so the agent can see
//! its own earlier actions.

use serde_json::Value;
use tracing::debug;

use crate::types::{ChatMessage, ToolSpec};
use tether_wire::McpToolDefinition;

/// Flattens the inbound conversation into a single Cursor user prompt.
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    let mut sections: Vec<String> = Vec::new();
    for message in messages {
        match message.role.as_str() {
            "system" => {
                let text = message.text_content();
                if !text.is_empty() {
                    sections.push(format!("[system]\n{text}"));
                }
            }
            "user" => {
                let text = message.text_content();
                if !text.is_empty() {
                    sections.push(format!("[user]\n{text}"));
                }
            }
            "assistant" => {
                let mut body = message.text_content();
                for call in &message.tool_calls {
                    let rendered = render_tool_call(call);
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&rendered);
                }
                if !body.is_empty() {
                    sections.push(format!("[assistant]\n{body}"));
                }
            }
            "tool" => {
                let label = match message.tool_call_id.as_deref() {
                    Some(id) => format!("[tool result {id}]"),
                    None => "[tool result]".to_string(),
                };
                sections.push(format!("{label}\n{}", message.text_content()));
            }
            other => {
                debug!(role = other, "skipping message with unsupported role");
            }
        }
    }
    sections.join("\n\n")
}

fn render_tool_call(call: &Value) -> String {
    let name = call
        .pointer("/function/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let arguments = call
        .pointer("/function/arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}");
    let id = call.get("id").and_then(Value::as_str).unwrap_or("");
    format!("[tool call {id}] {name}({arguments})")
}

/// Converts the request's `tools[]` into Cursor MCP tool definitions; the
/// JSON schema passes through the generic value encoder untouched.
pub fn extract_tool_definitions(tools: &[ToolSpec]) -> Vec<McpToolDefinition> {
    tools
        .iter()
        .filter(|spec| spec.kind.is_empty() || spec.kind == "function")
        .filter(|spec| !spec.function.name.is_empty())
        .map(|spec| McpToolDefinition {
            name: spec.function.name.clone(),
            description: spec.function.description.clone(),
            parameters: spec.function.parameters.clone(),
        })
        .collect()
}
