//! Client → server message tables.
//!
//! Each struct mirrors one wire message with its field numbers fixed at
//! design time. Encoding goes through [`FieldWriter`], so proto3 default
//! omission applies everywhere except nested messages.

use serde_json::Value;

use crate::codec::FieldWriter;
use crate::value::encode_value;

#[derive(Debug, Clone, PartialEq, Eq)]
/// `{1: request_id}` — identifies the session on both transport legs.
pub struct BidiRequestId {
    pub request_id: String,
}

impl BidiRequestId {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_str(1, &self.request_id);
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// `{1: data_hex, 2: request_id, 3: append_seqno}` — one outbound append.
pub struct BidiAppendRequest {
    pub data_hex: String,
    pub request_id: String,
    pub append_seqno: i64,
}

impl BidiAppendRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_str(1, &self.data_hex);
        writer.put_message(
            2,
            &BidiRequestId {
                request_id: self.request_id.clone(),
            }
            .encode(),
        );
        writer.put_int64(3, self.append_seqno);
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Oneof carried by every append: `{1: run_request, 2: exec_client_message,
/// 3: kv_client_message, 5: exec_client_control_message}`.
pub enum AgentClientMessage {
    RunRequest(AgentRunRequest),
    Exec(ExecClientMessage),
    Kv(KvClientMessage),
    ExecControl { stream_close_id: u32 },
}

impl AgentClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        match self {
            Self::RunRequest(run) => writer.put_message(1, &run.encode()),
            Self::Exec(exec) => writer.put_message(2, &exec.encode()),
            Self::Kv(kv) => writer.put_message(3, &kv.encode()),
            Self::ExecControl { stream_close_id } => {
                let mut close = FieldWriter::new();
                close.put_uint(1, u64::from(*stream_close_id));
                let mut control = FieldWriter::new();
                control.put_message(1, &close.finish());
                writer.put_message(5, &control.finish());
            }
        }
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `{1: id, 2|4|6|7|8|11|12: <type result>, 15: exec_id}`.
pub struct ExecClientMessage {
    pub id: u32,
    pub exec_id: String,
    pub payload: ExecResultPayload,
}

#[derive(Debug, Clone, PartialEq)]
/// The per-type result variants and their field numbers.
pub enum ExecResultPayload {
    Shell(ShellResult),
    Ls(LsResult),
    Read(ReadResult),
    Grep(GrepResult),
    Write(WriteResult),
    Mcp(McpResult),
    RequestContext,
}

impl ExecClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_uint(1, u64::from(self.id));
        match &self.payload {
            ExecResultPayload::Shell(result) => writer.put_message(2, &result.encode()),
            ExecResultPayload::Ls(result) => writer.put_message(4, &result.encode()),
            ExecResultPayload::Read(result) => writer.put_message(6, &result.encode()),
            ExecResultPayload::Grep(result) => writer.put_message(7, &result.encode()),
            ExecResultPayload::Write(result) => writer.put_message(8, &result.encode()),
            ExecResultPayload::Mcp(result) => writer.put_message(11, &result.encode()),
            ExecResultPayload::RequestContext => writer.put_message(12, &[]),
        }
        writer.put_str(15, &self.exec_id);
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Shell result success body: `{1: command, 2: cwd, 3: exit_code, 5: stdout,
/// 6: stderr, 7: execution_time_ms}` wrapped at field 1.
pub struct ShellResult {
    pub command: String,
    pub cwd: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
}

impl ShellResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut success = FieldWriter::new();
        success.put_str(1, &self.command);
        success.put_str(2, &self.cwd);
        success.put_int32(3, self.exit_code);
        success.put_str(5, &self.stdout);
        success.put_str(6, &self.stderr);
        success.put_uint(7, self.execution_time_ms);
        let mut writer = FieldWriter::new();
        writer.put_message(1, &success.finish());
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ls result: `{1: success {1: files}}`.
pub struct LsResult {
    pub files: String,
}

impl LsResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut success = FieldWriter::new();
        success.put_str(1, &self.files);
        let mut writer = FieldWriter::new();
        writer.put_message(1, &success.finish());
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Read result: `{1: success {1: content, 2: total_lines, 3: file_size,
/// 4: truncated}}`.
pub struct ReadResult {
    pub content: String,
    pub total_lines: u32,
    pub file_size: u32,
    pub truncated: bool,
}

impl ReadResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut success = FieldWriter::new();
        success.put_str(1, &self.content);
        success.put_uint(2, u64::from(self.total_lines));
        success.put_uint(3, u64::from(self.file_size));
        success.put_bool(4, self.truncated);
        let mut writer = FieldWriter::new();
        writer.put_message(1, &success.finish());
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Grep result: `{1: success {1: matches (repeated)}}`.
pub struct GrepResult {
    pub matches: Vec<String>,
}

impl GrepResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut success = FieldWriter::new();
        for line in &self.matches {
            success.put_str(1, line);
        }
        let mut writer = FieldWriter::new();
        writer.put_message(1, &success.finish());
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Write result: success `{1: lines_created, 2: file_size,
/// 3: file_content_after_write}` at field 1, failure `{1: error}` at field 2.
pub enum WriteResult {
    Success {
        lines_created: u32,
        file_size: u32,
        file_content_after_write: String,
    },
    Failure {
        error: String,
    },
}

impl WriteResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        match self {
            Self::Success {
                lines_created,
                file_size,
                file_content_after_write,
            } => {
                let mut success = FieldWriter::new();
                success.put_uint(1, u64::from(*lines_created));
                success.put_uint(2, u64::from(*file_size));
                success.put_str(3, file_content_after_write);
                writer.put_message(1, &success.finish());
            }
            Self::Failure { error } => {
                let mut failure = FieldWriter::new();
                failure.put_str(1, error);
                writer.put_message(2, &failure.finish());
            }
        }
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One text block inside an MCP success result: `{1: text}`.
pub struct TextContentBlock {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// MCP result: success `{1: result (repeated content block)}` at field 1,
/// failure `{1: error}` at field 2. Each result item is a content-block
/// oneof whose text variant (field 1) wraps a `TextContentBlock {1: text}`.
pub enum McpResult {
    Success { result: Vec<TextContentBlock> },
    Failure { error: String },
}

impl McpResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        match self {
            Self::Success { result } => {
                let mut success = FieldWriter::new();
                for block in result {
                    let mut text_block = FieldWriter::new();
                    text_block.put_str(1, &block.text);
                    let mut content_block = FieldWriter::new();
                    content_block.put_message(1, &text_block.finish());
                    success.put_message(1, &content_block.finish());
                }
                writer.put_message(1, &success.finish());
            }
            Self::Failure { error } => {
                let mut failure = FieldWriter::new();
                failure.put_str(1, error);
                writer.put_message(2, &failure.finish());
            }
        }
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `{1: id, 2: get_blob_result {1: blob_data?}, 3: set_blob_result (empty)}`.
pub struct KvClientMessage {
    pub id: u32,
    pub reply: KvClientReply,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KvClientReply {
    GetBlobResult { blob_data: Option<Vec<u8>> },
    SetBlobResult,
}

impl KvClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_uint(1, u64::from(self.id));
        match &self.reply {
            KvClientReply::GetBlobResult { blob_data } => {
                let mut body = FieldWriter::new();
                if let Some(bytes) = blob_data {
                    body.put_bytes(1, bytes);
                }
                writer.put_message(2, &body.finish());
            }
            KvClientReply::SetBlobResult => writer.put_message(3, &[]),
        }
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `{1: conversation_state, 2: action, 3: model_details, 4: mcp_tools_wrapper,
/// 5: conversation_id, 6: mcp_file_system_options}`.
pub struct AgentRunRequest {
    pub action: ConversationAction,
    pub model_name: String,
    pub tools: Vec<McpToolDefinition>,
    pub conversation_id: String,
    pub fs_options: McpFileSystemOptions,
}

impl AgentRunRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_message(1, &[]);
        writer.put_message(2, &self.action.encode());

        let mut model = FieldWriter::new();
        model.put_str(1, &self.model_name);
        writer.put_message(3, &model.finish());

        let mut tools = FieldWriter::new();
        for tool in &self.tools {
            tools.put_message(1, &tool.encode());
        }
        writer.put_message(4, &tools.finish());

        writer.put_str(5, &self.conversation_id);
        writer.put_message(6, &self.fs_options.encode());
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Wraps the user-message action: outer `{1: user_message_action}`, inner
/// `{1: user_message, 2: request_context}`.
pub struct ConversationAction {
    pub user_message: UserMessage,
    pub request_context: RequestContext,
}

impl ConversationAction {
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = FieldWriter::new();
        inner.put_message(1, &self.user_message.encode());
        inner.put_message(2, &self.request_context.encode());
        let mut writer = FieldWriter::new();
        writer.put_message(1, &inner.finish());
        writer.finish()
    }
}

/// Interaction modes mirrored from observed traffic.
pub const USER_MESSAGE_MODE_ASK: i32 = 1;
pub const USER_MESSAGE_MODE_AGENT: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
/// `{1: text, 2: message_id, 4: mode}`.
pub struct UserMessage {
    pub text: String,
    pub message_id: String,
    pub mode: i32,
}

impl UserMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_str(1, &self.text);
        writer.put_str(2, &self.message_id);
        writer.put_int32(4, self.mode);
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// `{4: env, 7: mcp_tool (repeated), 14: mcp_instructions}`.
pub struct RequestContext {
    pub env: EnvironmentContext,
    pub tools: Vec<McpToolDefinition>,
    pub mcp_instructions: String,
}

impl RequestContext {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_message(4, &self.env.encode());
        for tool in &self.tools {
            writer.put_message(7, &tool.encode());
        }
        writer.put_str(14, &self.mcp_instructions);
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// `{1: os, 2: workspace_path, 3: shell, 10: timezone, 11: workspace_path}`.
/// The workspace path is written at both field numbers the server reads.
pub struct EnvironmentContext {
    pub os: String,
    pub workspace_path: String,
    pub shell: String,
    pub timezone: String,
}

impl EnvironmentContext {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_str(1, &self.os);
        writer.put_str(2, &self.workspace_path);
        writer.put_str(3, &self.shell);
        writer.put_str(10, &self.timezone);
        writer.put_str(11, &self.workspace_path);
        writer.finish()
    }
}

const MCP_TOOL_PREFIX: &str = "cursor-tools-";
const MCP_TOOL_SOURCE: &str = "cursor-tools";

#[derive(Debug, Clone, PartialEq)]
/// `{1: "cursor-tools-<name>", 2: description, 3: schema as Value,
/// 4: "cursor-tools", 5: name}`.
pub struct McpToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl McpToolDefinition {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_str(1, &format!("{MCP_TOOL_PREFIX}{}", self.name));
        writer.put_str(2, &self.description);
        writer.put_message(3, &encode_value(&self.parameters));
        writer.put_str(4, MCP_TOOL_SOURCE);
        writer.put_str(5, &self.name);
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// `{1: enabled, 2: workspace_project_dir, 3: mcp_descriptor (repeated)}`.
pub struct McpFileSystemOptions {
    pub enabled: bool,
    pub workspace_project_dir: String,
    pub descriptors: Vec<String>,
}

impl McpFileSystemOptions {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.put_bool(1, self.enabled);
        writer.put_str(2, &self.workspace_project_dir);
        for descriptor in &self.descriptors {
            writer.put_str(3, descriptor);
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{find_len, find_str, find_varint, parse_fields};

    use super::*;

    #[test]
    fn stream_close_literal_bytes() {
        let message = AgentClientMessage::ExecControl { stream_close_id: 1 };
        let encoded = message.encode();
        let control = parse_fields(&encoded).expect("outer");
        let body = find_len(&control, 5).expect("control message");
        assert_eq!(body, [0x0a, 0x02, 0x08, 0x01]);

        let message = AgentClientMessage::ExecControl { stream_close_id: 0 };
        let encoded = message.encode();
        let control = parse_fields(&encoded).expect("outer");
        let body = find_len(&control, 5).expect("control message");
        assert_eq!(body, [0x0a, 0x00]);
    }

    #[test]
    fn mcp_success_literal_bytes() {
        let result = McpResult::Success {
            result: vec![TextContentBlock {
                text: "test result".to_string(),
            }],
        };
        assert_eq!(
            result.encode(),
            [
                0x0a, 0x11, 0x0a, 0x0f, 0x0a, 0x0d, 0x0a, 0x0b, 0x74, 0x65, 0x73, 0x74, 0x20,
                0x72, 0x65, 0x73, 0x75, 0x6c, 0x74
            ]
        );
    }

    #[test]
    fn functional_shell_result_envelope_decodes_via_inverse_parser() {
        let message = ExecClientMessage {
            id: 0,
            exec_id: "ex".to_string(),
            payload: ExecResultPayload::Shell(ShellResult {
                command: "echo".to_string(),
                cwd: "/".to_string(),
                exit_code: 0,
                stdout: "ok\n".to_string(),
                stderr: String::new(),
                execution_time_ms: 100,
            }),
        };
        let encoded = message.encode();
        let fields = parse_fields(&encoded).expect("outer");
        assert!(find_varint(&fields, 1).is_none(), "id=0 must be omitted");
        assert_eq!(find_str(&fields, 15).expect("exec_id"), "ex");

        let shell = parse_fields(find_len(&fields, 2).expect("shell result")).expect("shell");
        let success = parse_fields(find_len(&shell, 1).expect("success")).expect("success body");
        assert_eq!(find_str(&success, 1).expect("command"), "echo");
        assert_eq!(find_str(&success, 2).expect("cwd"), "/");
        assert_eq!(find_str(&success, 5).expect("stdout"), "ok\n");
        assert_eq!(find_varint(&success, 7), Some(100));
        for omitted in [3, 4, 6] {
            assert!(
                !success.iter().any(|field| field.number == omitted),
                "field {omitted} must be omitted"
            );
        }
    }

    #[test]
    fn run_request_carries_every_section() {
        let run = AgentRunRequest {
            action: ConversationAction {
                user_message: UserMessage {
                    text: "hello".to_string(),
                    message_id: "m-1".to_string(),
                    mode: USER_MESSAGE_MODE_AGENT,
                },
                request_context: RequestContext {
                    env: EnvironmentContext {
                        os: "linux x64".to_string(),
                        workspace_path: "/work".to_string(),
                        shell: "/bin/bash".to_string(),
                        timezone: "UTC".to_string(),
                    },
                    tools: vec![],
                    mcp_instructions: String::new(),
                },
            },
            model_name: "sonnet-4.5".to_string(),
            tools: vec![McpToolDefinition {
                name: "bash".to_string(),
                description: "Run a command".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            conversation_id: "c-1".to_string(),
            fs_options: McpFileSystemOptions {
                enabled: true,
                workspace_project_dir: "/work".to_string(),
                descriptors: vec!["cursor-tools".to_string()],
            },
        };

        let encoded = run.encode();
        let fields = parse_fields(&encoded).expect("run request");
        for expected in [1, 2, 3, 4, 6] {
            assert!(
                fields.iter().any(|field| field.number == expected),
                "missing field {expected}"
            );
        }
        assert_eq!(find_str(&fields, 5).expect("conversation id"), "c-1");

        let action = parse_fields(find_len(&fields, 2).expect("action")).expect("action");
        let user_action = parse_fields(find_len(&action, 1).expect("user action")).expect("inner");
        let user = parse_fields(find_len(&user_action, 1).expect("user message")).expect("user");
        assert_eq!(find_str(&user, 1).expect("text"), "hello");
        assert_eq!(find_varint(&user, 4), Some(2));

        let context = parse_fields(find_len(&user_action, 2).expect("context")).expect("context");
        let env = parse_fields(find_len(&context, 4).expect("env")).expect("env");
        assert_eq!(find_str(&env, 2).expect("workspace"), "/work");
        assert_eq!(find_str(&env, 11).expect("workspace alias"), "/work");
    }

    #[test]
    fn tool_definition_uses_qualified_name_and_source() {
        let tool = McpToolDefinition {
            name: "grep".to_string(),
            description: "Search files".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let encoded = tool.encode();
        let fields = parse_fields(&encoded).expect("tool");
        assert_eq!(find_str(&fields, 1).expect("qualified"), "cursor-tools-grep");
        assert_eq!(find_str(&fields, 4).expect("source"), "cursor-tools");
        assert_eq!(find_str(&fields, 5).expect("short"), "grep");
        let schema = crate::decode_value(find_len(&fields, 3).expect("schema")).expect("schema");
        assert_eq!(schema, serde_json::json!({"type": "object"}));
    }

    #[test]
    fn unit_get_blob_reply_distinguishes_present_and_absent_data() {
        let hit = KvClientMessage {
            id: 4,
            reply: KvClientReply::GetBlobResult {
                blob_data: Some(b"payload".to_vec()),
            },
        };
        let encoded = hit.encode();
        let fields = parse_fields(&encoded).expect("kv");
        assert_eq!(find_varint(&fields, 1), Some(4));
        let body = parse_fields(find_len(&fields, 2).expect("reply")).expect("reply body");
        assert_eq!(find_len(&body, 1), Some(&b"payload"[..]));

        let miss = KvClientMessage {
            id: 4,
            reply: KvClientReply::GetBlobResult { blob_data: None },
        };
        let encoded = miss.encode();
        let fields = parse_fields(&encoded).expect("kv");
        let body = find_len(&fields, 2).expect("reply");
        assert!(body.is_empty(), "absent blob reply has an empty body");
    }

    #[test]
    fn append_request_wraps_request_id_message() {
        let append = BidiAppendRequest {
            data_hex: "0a00".to_string(),
            request_id: "req-1".to_string(),
            append_seqno: 3,
        };
        let encoded = append.encode();
        let fields = parse_fields(&encoded).expect("append");
        assert_eq!(find_str(&fields, 1).expect("hex"), "0a00");
        assert_eq!(find_varint(&fields, 3), Some(3));
        let rid = parse_fields(find_len(&fields, 2).expect("request id")).expect("rid");
        assert_eq!(find_str(&rid, 1).expect("rid value"), "req-1");
    }

    #[test]
    fn regression_first_append_seqno_zero_is_omitted_on_wire() {
        let append = BidiAppendRequest {
            data_hex: "00".to_string(),
            request_id: "req-1".to_string(),
            append_seqno: 0,
        };
        let encoded = append.encode();
        let fields = parse_fields(&encoded).expect("append");
        assert!(find_varint(&fields, 3).is_none());
    }
}
