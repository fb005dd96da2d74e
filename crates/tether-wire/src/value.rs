//! Generic JSON value codec used for tool-schema passthrough.
//!
//! A `Value` message is a oneof over `{null:1, bool:2, number:3, string:4,
//! list:5, object:6}`. Variant presence is semantic here, so the chosen
//! variant field is always written even when it carries a default (an empty
//! string or `false` must survive a round trip). Numbers are IEEE-754 doubles
//! carried as an 8-byte little-endian length-delimited payload, keeping the
//! codec to varint/len wire types only. Object key order is preserved.

use serde_json::{Map, Number, Value};

use crate::codec::{parse_fields, FieldValue, FieldWriter};
use crate::{encode_tag, encode_varint, WireError, WIRE_LEN, WIRE_VARINT};

const FIELD_NULL: u32 = 1;
const FIELD_BOOL: u32 = 2;
const FIELD_NUMBER: u32 = 3;
const FIELD_STRING: u32 = 4;
const FIELD_LIST: u32 = 5;
const FIELD_OBJECT: u32 = 6;

const ENTRY_KEY: u32 = 1;
const ENTRY_VALUE: u32 = 2;

/// Encodes an arbitrary JSON value into its tagged-variant message form.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        Value::Null => {
            encode_tag(FIELD_NULL, WIRE_VARINT, &mut out);
            encode_varint(1, &mut out);
        }
        Value::Bool(flag) => {
            encode_tag(FIELD_BOOL, WIRE_VARINT, &mut out);
            encode_varint(u64::from(*flag), &mut out);
        }
        Value::Number(number) => {
            let bits = number.as_f64().unwrap_or(0.0).to_le_bytes();
            encode_tag(FIELD_NUMBER, WIRE_LEN, &mut out);
            encode_varint(bits.len() as u64, &mut out);
            out.extend_from_slice(&bits);
        }
        Value::String(text) => {
            encode_tag(FIELD_STRING, WIRE_LEN, &mut out);
            encode_varint(text.len() as u64, &mut out);
            out.extend_from_slice(text.as_bytes());
        }
        Value::Array(items) => {
            let mut body = FieldWriter::new();
            for item in items {
                body.put_message(1, &encode_value(item));
            }
            let body = body.finish();
            encode_tag(FIELD_LIST, WIRE_LEN, &mut out);
            encode_varint(body.len() as u64, &mut out);
            out.extend_from_slice(&body);
        }
        Value::Object(map) => {
            let mut body = FieldWriter::new();
            for (key, item) in map {
                let mut entry = FieldWriter::new();
                entry.put_str(ENTRY_KEY, key);
                entry.put_message(ENTRY_VALUE, &encode_value(item));
                body.put_message(1, &entry.finish());
            }
            let body = body.finish();
            encode_tag(FIELD_OBJECT, WIRE_LEN, &mut out);
            encode_varint(body.len() as u64, &mut out);
            out.extend_from_slice(&body);
        }
    }
    out
}

/// Decodes a tagged-variant message back to JSON. An empty body decodes to
/// `null`; unknown variant fields are skipped in favor of the first known one.
pub fn decode_value(bytes: &[u8]) -> Result<Value, WireError> {
    let fields = parse_fields(bytes)?;
    for field in &fields {
        match (field.number, field.value) {
            (FIELD_NULL, FieldValue::Varint(_)) => return Ok(Value::Null),
            (FIELD_BOOL, FieldValue::Varint(flag)) => return Ok(Value::Bool(flag != 0)),
            (FIELD_NUMBER, FieldValue::Len(payload)) => {
                let bits: [u8; 8] = payload
                    .try_into()
                    .map_err(|_| WireError::MalformedMessage("number payload".to_string()))?;
                let value = f64::from_le_bytes(bits);
                let number = Number::from_f64(value)
                    .unwrap_or_else(|| Number::from(0));
                return Ok(Value::Number(number));
            }
            (FIELD_STRING, FieldValue::Len(payload)) => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| WireError::InvalidUtf8 { field: FIELD_STRING })?;
                return Ok(Value::String(text.to_string()));
            }
            (FIELD_LIST, FieldValue::Len(payload)) => {
                let mut items = Vec::new();
                for item in parse_fields(payload)? {
                    if item.number == 1 {
                        items.push(decode_value(item.as_len().unwrap_or_default())?);
                    }
                }
                return Ok(Value::Array(items));
            }
            (FIELD_OBJECT, FieldValue::Len(payload)) => {
                let mut map = Map::new();
                for entry in parse_fields(payload)? {
                    if entry.number != 1 {
                        continue;
                    }
                    let entry_fields = parse_fields(entry.as_len().unwrap_or_default())?;
                    let key = crate::codec::find_str(&entry_fields, ENTRY_KEY)?.to_string();
                    let value = match crate::codec::find_len(&entry_fields, ENTRY_VALUE) {
                        Some(body) => decode_value(body)?,
                        None => Value::Null,
                    };
                    map.insert(key, value);
                }
                return Ok(Value::Object(map));
            }
            _ => {}
        }
    }
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_value, encode_value};

    fn round_trip(value: serde_json::Value) -> serde_json::Value {
        decode_value(&encode_value(&value)).expect("round trip")
    }

    #[test]
    fn scalars_round_trip() {
        assert_eq!(round_trip(json!(null)), json!(null));
        assert_eq!(round_trip(json!(true)), json!(true));
        assert_eq!(round_trip(json!(false)), json!(false));
        assert_eq!(round_trip(json!("")), json!(""));
        assert_eq!(round_trip(json!("text")), json!("text"));
        assert_eq!(round_trip(json!(1.5)), json!(1.5));
        assert_eq!(round_trip(json!(0.0)), json!(0.0));
    }

    #[test]
    fn functional_tool_schema_shape_round_trips_with_key_order() {
        let schema = json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": { "type": "string", "description": "shell command" },
                "timeout": { "type": "number" },
                "background": { "type": "boolean", "default": false }
            },
            "additionalProperties": false
        });
        let decoded = round_trip(schema.clone());
        assert_eq!(decoded, schema);
        let keys: Vec<&String> = decoded.as_object().expect("object").keys().collect();
        assert_eq!(keys, ["type", "required", "properties", "additionalProperties"]);
    }

    #[test]
    fn nested_lists_and_empty_containers_round_trip() {
        assert_eq!(round_trip(json!([])), json!([]));
        assert_eq!(round_trip(json!({})), json!({}));
        assert_eq!(
            round_trip(json!([[1.0, 2.0], [], ["x", null, false]])),
            json!([[1.0, 2.0], [], ["x", null, false]])
        );
    }

    #[test]
    fn regression_integers_decode_as_doubles() {
        let decoded = round_trip(json!(42));
        assert_eq!(decoded.as_f64(), Some(42.0));
    }

    #[test]
    fn empty_body_decodes_to_null() {
        assert_eq!(decode_value(&[]).expect("decode"), serde_json::Value::Null);
    }
}
