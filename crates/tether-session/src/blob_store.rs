//! Session-local content-addressed blob store.
//!
//! The server checkpoints conversation state through `get_blob`/`set_blob`
//! round trips. Every stored blob is also mined for assistant text: when a
//! turn ends without any streamed output, the recovered text is what the
//! caller gets instead (the server sometimes persists the whole response to a
//! blob and never streams it).

use std::collections::HashMap;

use serde_json::Value;
use tether_wire::parse_fields;

const PROTO_TEXT_MIN_LEN: usize = 50;

#[derive(Debug, Default)]
/// Public struct `BlobStore` scoped to a single session.
pub struct BlobStore {
    blobs: HashMap<Vec<u8>, Vec<u8>>,
    assistant_texts: Vec<String>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) lookup by content address; unknown addresses return `None`.
    pub fn get(&self, blob_id: &[u8]) -> Option<&[u8]> {
        self.blobs.get(blob_id).map(Vec::as_slice)
    }

    /// Stores a blob and mines it for assistant text. Rewriting an identical
    /// address + payload is a no-op (no duplicate recovery entries).
    pub fn set(&mut self, blob_id: Vec<u8>, blob_data: Vec<u8>) {
        if self.blobs.get(&blob_id).map(Vec::as_slice) == Some(blob_data.as_slice()) {
            return;
        }
        self.assistant_texts
            .extend(extract_assistant_texts(&blob_data));
        self.blobs.insert(blob_id, blob_data);
    }

    /// Assistant text recovered from blob writes, in write order.
    pub fn assistant_texts(&self) -> &[String] {
        &self.assistant_texts
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// Mines one blob for assistant-authored text.
///
/// UTF-8 + JSON payloads are walked for assistant messages; binary payloads
/// are parsed as protobuf fields and any long plain-text `LEN` payload is
/// kept.
pub fn extract_assistant_texts(blob: &[u8]) -> Vec<String> {
    if let Ok(text) = std::str::from_utf8(blob) {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            let mut texts = Vec::new();
            collect_assistant_texts(&value, &mut texts);
            return texts;
        }
    }
    extract_proto_texts(blob)
}

fn collect_assistant_texts(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if map.get("role").and_then(Value::as_str) == Some("assistant") {
                if let Some(content) = map.get("content") {
                    push_content_texts(content, out);
                }
            }
            if let Some(messages) = map.get("messages").and_then(Value::as_array) {
                for message in messages {
                    collect_assistant_texts(message, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_assistant_texts(item, out);
            }
        }
        _ => {}
    }
}

fn push_content_texts(content: &Value, out: &mut Vec<String>) {
    match content {
        Value::String(text) => {
            if !text.is_empty() {
                out.push(text.clone());
            }
        }
        Value::Array(parts) => {
            for part in parts {
                if part.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            out.push(text.to_string());
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn extract_proto_texts(blob: &[u8]) -> Vec<String> {
    let Ok(fields) = parse_fields(blob) else {
        return Vec::new();
    };
    let mut texts = Vec::new();
    for field in fields {
        let Some(payload) = field.as_len() else {
            continue;
        };
        let Ok(text) = std::str::from_utf8(payload) else {
            continue;
        };
        if text.len() > PROTO_TEXT_MIN_LEN && !text.starts_with('{') && !text.starts_with('[') {
            texts.push(text.to_string());
        }
    }
    texts
}

#[cfg(test)]
mod tests {
    use tether_wire::FieldWriter;

    use super::*;

    #[test]
    fn set_then_get_round_trips_and_misses_return_none() {
        let mut store = BlobStore::new();
        store.set(b"addr".to_vec(), b"payload".to_vec());
        assert_eq!(store.get(b"addr"), Some(&b"payload"[..]));
        assert_eq!(store.get(b"unknown"), None);
    }

    #[test]
    fn identical_rewrite_is_idempotent() {
        let blob = br#"{"role":"assistant","content":"answer"}"#;
        let mut store = BlobStore::new();
        store.set(b"addr".to_vec(), blob.to_vec());
        store.set(b"addr".to_vec(), blob.to_vec());
        assert_eq!(store.get(b"addr"), Some(&blob[..]));
        assert_eq!(store.assistant_texts(), ["answer"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn assistant_string_content_is_recovered() {
        let texts =
            extract_assistant_texts(br#"{"role":"assistant","content":"the full answer"}"#);
        assert_eq!(texts, ["the full answer"]);
    }

    #[test]
    fn assistant_list_content_extracts_text_parts() {
        let blob = br#"{"role":"assistant","content":[
            {"type":"text","text":"part one"},
            {"type":"tool_use","name":"bash"},
            {"type":"text","text":"part two"}
        ]}"#;
        assert_eq!(extract_assistant_texts(blob), ["part one", "part two"]);
    }

    #[test]
    fn functional_messages_array_is_scanned_for_assistants() {
        let blob = br#"{"messages":[
            {"role":"user","content":"question"},
            {"role":"assistant","content":"first"},
            {"role":"assistant","content":[{"type":"text","text":"second"}]}
        ]}"#;
        assert_eq!(extract_assistant_texts(blob), ["first", "second"]);
    }

    #[test]
    fn user_only_json_recovers_nothing() {
        assert!(extract_assistant_texts(br#"{"role":"user","content":"hi"}"#).is_empty());
        assert!(extract_assistant_texts(br#"{"unrelated":true}"#).is_empty());
    }

    #[test]
    fn functional_binary_blob_yields_long_plain_text_fields() {
        let long_text = "a sentence that is comfortably longer than fifty bytes of payload";
        let json_like = r#"{"k":"looks like json and is definitely longer than fifty bytes..."}"#;
        let mut writer = FieldWriter::new();
        writer.put_str(1, "short");
        writer.put_str(2, long_text);
        writer.put_str(3, json_like);
        let texts = extract_assistant_texts(&writer.finish());
        assert_eq!(texts, [long_text]);
    }

    #[test]
    fn regression_unparseable_binary_recovers_nothing() {
        assert!(extract_assistant_texts(&[0xff, 0xfe, 0x07]).is_empty());
    }
}
