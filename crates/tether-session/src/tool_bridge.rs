//! Bridges Cursor exec requests to OpenAI tool calls and back.
//!
//! Synthetic tool-call ids carry the session id so a later tool result can be
//! routed to the session that issued the exec: `sess_<sid>__call_<base>`,
//! where `<base>` is the sanitized Cursor identifier.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::events::{PendingExec, ToolExecEvent};
use tether_wire::{
    ExecClientMessage, ExecRequestPayload, ExecResultPayload, GrepResult, LsResult, McpResult,
    ReadResult, ShellResult, TextContentBlock, WriteResult,
};

const SESSION_PREFIX: &str = "sess_";
const CALL_SEPARATOR: &str = "__call_";
const BASE_MAX_LEN: usize = 32;

/// Builds the synthetic OpenAI tool-call id for an exec request.
pub fn make_tool_call_id(session_id: &str, base: &str) -> String {
    let mut sanitized: String = base
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(BASE_MAX_LEN)
        .collect();
    if sanitized.is_empty() {
        sanitized = Uuid::new_v4().simple().to_string();
        sanitized.truncate(BASE_MAX_LEN);
    }
    format!("{SESSION_PREFIX}{session_id}{CALL_SEPARATOR}{sanitized}")
}

/// Recovers the session id from a synthetic tool-call id.
pub fn parse_session_id(tool_call_id: &str) -> Option<&str> {
    let rest = tool_call_id.strip_prefix(SESSION_PREFIX)?;
    let (session_id, _) = rest.split_once(CALL_SEPARATOR)?;
    if session_id.is_empty() {
        return None;
    }
    Some(session_id)
}

/// Maps a decoded exec request onto the OpenAI tool surface.
///
/// Returns the event handed to the adapter plus the pending record retained
/// for reply encoding. `request_context` never reaches OpenAI; the session
/// answers it directly.
pub fn exec_to_tool_event(
    session_id: &str,
    exec: &tether_wire::ExecServerMessage,
) -> (ToolExecEvent, PendingExec) {
    let base = match &exec.request {
        ExecRequestPayload::Mcp { tool_call_id, .. } if !tool_call_id.is_empty() => {
            tool_call_id.clone()
        }
        _ if !exec.exec_id.is_empty() => exec.exec_id.clone(),
        _ => exec.id.to_string(),
    };
    let tool_call_id = make_tool_call_id(session_id, &base);

    let (name, arguments) = match &exec.request {
        ExecRequestPayload::Shell {
            command,
            description,
            workdir,
        } => {
            let mut args = json!({ "command": command });
            if !description.is_empty() {
                args["description"] = json!(description);
            }
            if !workdir.is_empty() {
                args["workdir"] = json!(workdir);
            }
            ("bash".to_string(), args)
        }
        ExecRequestPayload::Read { file_path } => {
            ("read".to_string(), json!({ "filePath": file_path }))
        }
        ExecRequestPayload::Ls { path } => ("list".to_string(), json!({ "path": path })),
        ExecRequestPayload::Grep {
            pattern,
            path,
            glob,
        } => {
            let name = if glob.is_empty() { "grep" } else { "glob" };
            let pattern = if glob.is_empty() { pattern } else { glob };
            (
                name.to_string(),
                json!({ "pattern": pattern, "path": path }),
            )
        }
        ExecRequestPayload::Write { file_path, content } => (
            "write".to_string(),
            json!({ "filePath": file_path, "content": content }),
        ),
        ExecRequestPayload::Mcp {
            tool_name,
            args_json,
            ..
        } => {
            let args = serde_json::from_str(args_json).unwrap_or_else(|_| json!({}));
            (tool_name.clone(), args)
        }
        ExecRequestPayload::RequestContext | ExecRequestPayload::Unknown { .. } => {
            ("unknown".to_string(), json!({}))
        }
    };

    (
        ToolExecEvent {
            tool_call_id,
            name,
            arguments,
        },
        PendingExec {
            id: exec.id,
            exec_id: exec.exec_id.clone(),
            request: exec.request.clone(),
        },
    )
}

/// Reconstructs the typed Cursor reply for a tool result delivered as OpenAI
/// `role:"tool"` content.
pub fn build_exec_reply(pending: &PendingExec, content: &str) -> ExecClientMessage {
    let parsed: Option<Value> = serde_json::from_str(content).ok();
    let payload = match &pending.request {
        ExecRequestPayload::Shell {
            command, workdir, ..
        } => {
            let cwd = if workdir.is_empty() { "/" } else { workdir };
            let (stdout, stderr, exit_code, execution_time_ms) = match parsed
                .as_ref()
                .filter(|value| value.is_object())
            {
                Some(value) => (
                    field_str(value, "stdout").unwrap_or(content).to_string(),
                    field_str(value, "stderr").unwrap_or_default().to_string(),
                    value
                        .get("exitCode")
                        .and_then(Value::as_i64)
                        .unwrap_or(0) as i32,
                    value
                        .get("executionTimeMs")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                ),
                None => (content.to_string(), String::new(), 0, 0),
            };
            ExecResultPayload::Shell(ShellResult {
                command: command.clone(),
                cwd: cwd.to_string(),
                exit_code,
                stdout,
                stderr,
                execution_time_ms,
            })
        }
        ExecRequestPayload::Read { .. } => ExecResultPayload::Read(ReadResult {
            content: content.to_string(),
            total_lines: content.split('\n').count() as u32,
            file_size: content.len() as u32,
            truncated: false,
        }),
        ExecRequestPayload::Ls { .. } => ExecResultPayload::Ls(LsResult {
            files: content.to_string(),
        }),
        ExecRequestPayload::Grep { .. } => ExecResultPayload::Grep(GrepResult {
            matches: content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }),
        ExecRequestPayload::Write { .. } => match parsed.as_ref().filter(|value| value.is_object())
        {
            Some(value) if value.get("error").is_some() => ExecResultPayload::Write(
                WriteResult::Failure {
                    error: field_str(value, "error").unwrap_or("write failed").to_string(),
                },
            ),
            Some(value) => ExecResultPayload::Write(WriteResult::Success {
                lines_created: value
                    .get("linesCreated")
                    .and_then(Value::as_u64)
                    .unwrap_or_else(|| content.split('\n').count() as u64)
                    as u32,
                file_size: value
                    .get("fileSize")
                    .and_then(Value::as_u64)
                    .unwrap_or(content.len() as u64) as u32,
                file_content_after_write: field_str(value, "fileContentAfterWrite")
                    .unwrap_or(content)
                    .to_string(),
            }),
            None => ExecResultPayload::Write(WriteResult::Success {
                lines_created: content.split('\n').count() as u32,
                file_size: content.len() as u32,
                file_content_after_write: content.to_string(),
            }),
        },
        ExecRequestPayload::Mcp { .. } => {
            let error = parsed
                .as_ref()
                .and_then(|value| value.get("error"))
                .map(|error| match error {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                });
            match error {
                Some(error) => ExecResultPayload::Mcp(McpResult::Failure { error }),
                None => ExecResultPayload::Mcp(McpResult::Success {
                    result: vec![TextContentBlock {
                        text: content.to_string(),
                    }],
                }),
            }
        }
        ExecRequestPayload::RequestContext | ExecRequestPayload::Unknown { .. } => {
            ExecResultPayload::RequestContext
        }
    };

    ExecClientMessage {
        id: pending.id,
        exec_id: pending.exec_id.clone(),
        payload,
    }
}

fn field_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
