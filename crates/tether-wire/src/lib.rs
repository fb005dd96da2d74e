//! Wire codec for the Cursor bidirectional agent protocol.
//!
//! The protocol is a narrow protobuf subset (varint + length-delimited wire
//! types only) carried over 5-byte-header grpc-web frames. Field numbers are
//! fixed at design time; unknown fields from the server are skipped so silent
//! schema additions never break a session.

pub mod codec;
pub mod framing;
pub mod inbound;
pub mod outbound;
pub mod value;

pub use codec::{
    decode_tag, decode_varint, encode_tag, encode_varint, find_len, find_str, find_varint,
    parse_fields, Field, FieldValue, FieldWriter, WIRE_LEN, WIRE_VARINT,
};
pub use framing::{encode_frame, Frame, FrameReader};
pub use inbound::{
    AgentServerMessage, ConversationCheckpoint, ExecRequestPayload, ExecServerControl,
    ExecServerMessage, InteractionQuery, InteractionUpdate, KvServerMessage, KvServerOp,
};
pub use outbound::{
    AgentClientMessage, AgentRunRequest, BidiAppendRequest, BidiRequestId, ConversationAction,
    EnvironmentContext, ExecClientMessage, ExecResultPayload, GrepResult, KvClientMessage,
    KvClientReply, LsResult, McpFileSystemOptions, McpResult, McpToolDefinition, ReadResult,
    RequestContext, ShellResult, TextContentBlock, UserMessage, WriteResult,
    USER_MESSAGE_MODE_AGENT, USER_MESSAGE_MODE_ASK,
};
pub use value::{decode_value, encode_value};

use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `WireError` values.
pub enum WireError {
    #[error("varint exceeds 10 bytes")]
    VarintOverflow,
    #[error("truncated varint")]
    TruncatedVarint,
    #[error("truncated length-delimited payload in field {field}")]
    TruncatedPayload { field: u32 },
    #[error("unsupported wire type {wire_type} in field {field}")]
    UnsupportedWireType { wire_type: u8, field: u32 },
    #[error("invalid utf-8 in field {field}")]
    InvalidUtf8 { field: u32 },
    #[error("remote closed stream with status {status}: {message}")]
    RemoteStatus { status: u32, message: String },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}
