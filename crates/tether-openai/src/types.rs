//! Inbound OpenAI request shapes. Unknown fields ride along in `extra` so
//! permissive clients keep working.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
/// Public struct `ChatCompletionsRequest` used across Tether components.
pub struct ChatCompletionsRequest {
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
/// One inbound message. `content` stays a raw JSON value: OpenAI allows both
/// a string and a parts array.
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub tool_calls: Vec<Value>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ChatMessage {
    /// Collects the textual content, joining multi-part arrays.
    pub fn text_content(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| {
                    if part.get("type").and_then(Value::as_str) == Some("text") {
                        part.get("text").and_then(Value::as_str)
                    } else {
                        part.as_str()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
/// OpenAI tool declaration: `{type: "function", function: {...}}`.
pub struct ToolSpec {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub function: ToolFunctionSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolFunctionSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}
