//! Server → client message decoding.
//!
//! The oneof numbering for exec variants mirrors the client-side tables;
//! anything outside the dispatch tables decodes to an `Unknown` variant so
//! callers can log and continue.

use crate::codec::{find_len, find_str, find_varint, parse_fields};
use crate::WireError;

#[derive(Debug, Clone, PartialEq)]
/// Top-level inbound oneof: `{1: interaction_update, 2: exec_server_message,
/// 3: conversation_checkpoint_update, 4: kv_server_message,
/// 5: exec_server_control_message, 7: interaction_query}`.
pub enum AgentServerMessage {
    Interaction(InteractionUpdate),
    Exec(ExecServerMessage),
    Checkpoint(ConversationCheckpoint),
    Kv(KvServerMessage),
    ExecControl(ExecServerControl),
    Query(InteractionQuery),
    Unknown { field: u32 },
}

impl AgentServerMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let fields = parse_fields(bytes)?;
        for field in &fields {
            let Some(body) = field.as_len() else {
                continue;
            };
            return Ok(match field.number {
                1 => Self::Interaction(InteractionUpdate::decode(body)?),
                2 => Self::Exec(ExecServerMessage::decode(body)?),
                3 => Self::Checkpoint(ConversationCheckpoint::decode(body)?),
                4 => Self::Kv(KvServerMessage::decode(body)?),
                5 => Self::ExecControl(ExecServerControl::decode(body)?),
                7 => Self::Query(InteractionQuery::decode(body)?),
                other => Self::Unknown { field: other },
            });
        }
        Ok(Self::Unknown { field: 0 })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `{1: text_delta, 2: tool_call_started, 3: tool_call_completed,
/// 7: partial_tool_call, 8: token_delta, 13: heartbeat, 14: turn_ended}`.
pub enum InteractionUpdate {
    TextDelta { text: String },
    ToolCallStarted { call_id: String, name: String },
    ToolCallCompleted { call_id: String },
    PartialToolCall { call_id: String, args_delta: String },
    TokenDelta { text: String },
    Heartbeat,
    TurnEnded,
    Unknown { field: u32 },
}

impl InteractionUpdate {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let fields = parse_fields(bytes)?;
        for field in &fields {
            let Some(body) = field.as_len() else {
                continue;
            };
            let inner = parse_fields(body)?;
            return Ok(match field.number {
                1 => Self::TextDelta {
                    text: find_str(&inner, 1)?.to_string(),
                },
                2 => Self::ToolCallStarted {
                    call_id: find_str(&inner, 1)?.to_string(),
                    name: find_str(&inner, 2)?.to_string(),
                },
                3 => Self::ToolCallCompleted {
                    call_id: find_str(&inner, 1)?.to_string(),
                },
                7 => Self::PartialToolCall {
                    call_id: find_str(&inner, 1)?.to_string(),
                    args_delta: find_str(&inner, 2)?.to_string(),
                },
                8 => Self::TokenDelta {
                    text: find_str(&inner, 1)?.to_string(),
                },
                13 => Self::Heartbeat,
                14 => Self::TurnEnded,
                other => Self::Unknown { field: other },
            });
        }
        Ok(Self::Unknown { field: 0 })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `{1: id, <oneof by type>, 15: exec_id}` — a server-issued tool execution.
pub struct ExecServerMessage {
    pub id: u32,
    pub exec_id: String,
    pub request: ExecRequestPayload,
}

#[derive(Debug, Clone, PartialEq)]
/// Typed exec payloads. Field numbers mirror the client result table:
/// shell=2, ls=4, read=6, grep=7, write=8, mcp=11, request_context=12.
pub enum ExecRequestPayload {
    Shell {
        command: String,
        description: String,
        workdir: String,
    },
    Ls {
        path: String,
    },
    Read {
        file_path: String,
    },
    Grep {
        pattern: String,
        path: String,
        glob: String,
    },
    Write {
        file_path: String,
        content: String,
    },
    Mcp {
        tool_name: String,
        args_json: String,
        tool_call_id: String,
    },
    RequestContext,
    Unknown {
        field: u32,
    },
}

impl ExecServerMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let fields = parse_fields(bytes)?;
        let id = find_varint(&fields, 1).unwrap_or(0) as u32;
        let exec_id = find_str(&fields, 15)?.to_string();

        let mut request = ExecRequestPayload::Unknown { field: 0 };
        for field in &fields {
            if field.number == 1 || field.number == 15 {
                continue;
            }
            let Some(body) = field.as_len() else {
                continue;
            };
            let inner = parse_fields(body)?;
            request = match field.number {
                2 => ExecRequestPayload::Shell {
                    command: find_str(&inner, 1)?.to_string(),
                    description: find_str(&inner, 2)?.to_string(),
                    workdir: find_str(&inner, 3)?.to_string(),
                },
                4 => ExecRequestPayload::Ls {
                    path: find_str(&inner, 1)?.to_string(),
                },
                6 => ExecRequestPayload::Read {
                    file_path: find_str(&inner, 1)?.to_string(),
                },
                7 => ExecRequestPayload::Grep {
                    pattern: find_str(&inner, 1)?.to_string(),
                    path: find_str(&inner, 2)?.to_string(),
                    glob: find_str(&inner, 3)?.to_string(),
                },
                8 => ExecRequestPayload::Write {
                    file_path: find_str(&inner, 1)?.to_string(),
                    content: find_str(&inner, 2)?.to_string(),
                },
                11 => ExecRequestPayload::Mcp {
                    tool_name: find_str(&inner, 1)?.to_string(),
                    args_json: find_str(&inner, 2)?.to_string(),
                    tool_call_id: find_str(&inner, 3)?.to_string(),
                },
                12 => ExecRequestPayload::RequestContext,
                other => ExecRequestPayload::Unknown { field: other },
            };
            break;
        }

        Ok(Self {
            id,
            exec_id,
            request,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Conversation checkpoint notification; carries an optional identifier.
pub struct ConversationCheckpoint {
    pub checkpoint_id: Option<String>,
}

impl ConversationCheckpoint {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let fields = parse_fields(bytes)?;
        let checkpoint_id = match find_len(&fields, 1) {
            Some(body) => Some(
                std::str::from_utf8(body)
                    .map_err(|_| WireError::InvalidUtf8 { field: 1 })?
                    .to_string(),
            ),
            None => None,
        };
        Ok(Self { checkpoint_id })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `{1: id, 2: get_blob_args {1: blob_id}, 3: set_blob_args
/// {1: blob_id, 2: blob_data}}`.
pub struct KvServerMessage {
    pub id: u32,
    pub op: KvServerOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KvServerOp {
    GetBlob { blob_id: Vec<u8> },
    SetBlob { blob_id: Vec<u8>, blob_data: Vec<u8> },
    Unknown { field: u32 },
}

impl KvServerMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let fields = parse_fields(bytes)?;
        let id = find_varint(&fields, 1).unwrap_or(0) as u32;

        let mut op = KvServerOp::Unknown { field: 0 };
        for field in &fields {
            if field.number == 1 {
                continue;
            }
            let Some(body) = field.as_len() else {
                continue;
            };
            let inner = parse_fields(body)?;
            op = match field.number {
                2 => KvServerOp::GetBlob {
                    blob_id: find_len(&inner, 1).unwrap_or_default().to_vec(),
                },
                3 => KvServerOp::SetBlob {
                    blob_id: find_len(&inner, 1).unwrap_or_default().to_vec(),
                    blob_data: find_len(&inner, 2).unwrap_or_default().to_vec(),
                },
                other => KvServerOp::Unknown { field: other },
            };
            break;
        }
        Ok(Self { id, op })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// `{1: stream_abort {1: id}}` — the server abandons an exec stream.
pub struct ExecServerControl {
    pub abort_id: u32,
}

impl ExecServerControl {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let fields = parse_fields(bytes)?;
        let abort_id = match find_len(&fields, 1) {
            Some(body) => find_varint(&parse_fields(body)?, 1).unwrap_or(0) as u32,
            None => 0,
        };
        Ok(Self { abort_id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Server-initiated query; treated as a progress event only.
pub struct InteractionQuery {
    pub id: u32,
}

impl InteractionQuery {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let fields = parse_fields(bytes)?;
        Ok(Self {
            id: find_varint(&fields, 1).unwrap_or(0) as u32,
        })
    }
}
