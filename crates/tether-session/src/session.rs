//! The per-request session state machine.
//!
//! The inbound reader task demultiplexes frames into [`SessionEvent`]s while
//! callers push tool results through the outbound leg. Both sides share one
//! seqno counter behind an async mutex that doubles as the outbound command
//! queue: holding it across a send keeps the wire order equal to the seqno
//! order, and holding it across a (result, stream_close) pair keeps the pair
//! contiguous. The snapshot-style state locks are never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::events::{PendingExec, SessionEvent};
use crate::tool_bridge::{build_exec_reply, exec_to_tool_event};
use crate::transport::{AgentTransport, FrameByteStream};
use crate::SessionError;
use tether_wire::{
    AgentClientMessage, AgentRunRequest, AgentServerMessage, BidiAppendRequest,
    ConversationAction, EnvironmentContext, ExecClientMessage, ExecRequestPayload,
    ExecResultPayload, Frame, FrameReader, InteractionUpdate, KvClientMessage, KvClientReply,
    KvServerOp, McpFileSystemOptions, McpToolDefinition, RequestContext, UserMessage,
    USER_MESSAGE_MODE_AGENT,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SESSION_ID_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `SessionState` values.
pub enum SessionState {
    Opening,
    Streaming,
    AwaitingTool,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Heartbeat starvation thresholds, split by whether any progress event has
/// arrived yet.
pub struct IdlePolicy {
    pub idle_ms_before_progress: u64,
    pub max_beats_before_progress: u64,
    pub idle_ms_after_progress: u64,
    pub max_beats_after_progress: u64,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            idle_ms_before_progress: 180_000,
            max_beats_before_progress: 1_000,
            idle_ms_after_progress: 120_000,
            max_beats_after_progress: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
/// Public struct `SessionConfig` used across Tether components.
pub struct SessionConfig {
    pub model_name: String,
    pub workspace_path: String,
    pub shell: String,
    pub os_descriptor: String,
    pub timezone: String,
    pub mode: i32,
    pub mcp_instructions: String,
    pub deadline_ms: u64,
    pub idle_policy: IdlePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            workspace_path: String::new(),
            shell: "/bin/bash".to_string(),
            os_descriptor: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            timezone: "UTC".to_string(),
            mode: USER_MESSAGE_MODE_AGENT,
            mcp_instructions: String::new(),
            deadline_ms: 120_000,
            idle_policy: IdlePolicy::default(),
        }
    }
}

#[derive(Debug)]
struct IdleTracker {
    last_progress_at: Instant,
    heartbeats_since_progress: u64,
    any_progress_yet: bool,
}

impl IdleTracker {
    fn new() -> Self {
        Self {
            last_progress_at: Instant::now(),
            heartbeats_since_progress: 0,
            any_progress_yet: false,
        }
    }

    fn mark_progress(&mut self) {
        self.last_progress_at = Instant::now();
        self.heartbeats_since_progress = 0;
        self.any_progress_yet = true;
    }

    /// Returns true when the starvation threshold for the current phase is
    /// reached and the turn should end synthetically.
    fn on_heartbeat(&mut self, policy: &IdlePolicy) -> bool {
        self.heartbeats_since_progress += 1;
        let (idle_ms, max_beats) = if self.any_progress_yet {
            (
                policy.idle_ms_after_progress,
                policy.max_beats_after_progress,
            )
        } else {
            (
                policy.idle_ms_before_progress,
                policy.max_beats_before_progress,
            )
        };
        let idle_elapsed = self.last_progress_at.elapsed() >= Duration::from_millis(idle_ms);
        idle_elapsed || self.heartbeats_since_progress >= max_beats
    }
}

struct SessionShared {
    session_id: String,
    request_id: String,
    transport: Arc<dyn AgentTransport>,
    config: SessionConfig,
    /// Next append seqno. Held across sends so the wire order matches.
    outbound: tokio::sync::Mutex<i64>,
    state: Mutex<SessionState>,
    blobs: Mutex<BlobStore>,
    pending: Mutex<HashMap<String, PendingExec>>,
    cancel: Notify,
}

/// One Cursor agent session bound to one inbound OpenAI request.
pub struct AgentSession {
    shared: Arc<SessionShared>,
}

impl AgentSession {
    pub fn new(transport: Arc<dyn AgentTransport>, config: SessionConfig) -> Self {
        Self::with_request_id(transport, config, Uuid::new_v4().to_string())
    }

    /// Binds the session to a caller-chosen request id (the same id goes into
    /// the transport's `x-request-id` header).
    pub fn with_request_id(
        transport: Arc<dyn AgentTransport>,
        config: SessionConfig,
        request_id: String,
    ) -> Self {
        let session_id = Uuid::new_v4().simple().to_string()[..SESSION_ID_LEN].to_string();
        Self {
            shared: Arc::new(SessionShared {
                session_id,
                request_id,
                transport,
                config,
                outbound: tokio::sync::Mutex::new(0),
                state: Mutex::new(SessionState::Opening),
                blobs: Mutex::new(BlobStore::new()),
                pending: Mutex::new(HashMap::new()),
                cancel: Notify::new(),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn request_id(&self) -> &str {
        &self.shared.request_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().expect("state lock")
    }

    /// Opens both transport legs and starts streaming. The first append
    /// carries the run request; events arrive on the returned receiver in
    /// wire order.
    pub async fn run(
        &self,
        prompt: String,
        tools: Vec<McpToolDefinition>,
    ) -> Result<mpsc::Receiver<SessionEvent>, SessionError> {
        let stream = self
            .shared
            .transport
            .open_run_stream(&self.shared.request_id)
            .await?;

        let run_request = build_run_request(&self.shared.config, prompt, tools);
        append_one(&self.shared, &AgentClientMessage::RunRequest(run_request)).await?;
        set_state(&self.shared, SessionState::Streaming);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(read_loop(shared, stream, tx));
        Ok(rx)
    }

    /// Routes an OpenAI tool result back to the Cursor exec that produced it.
    ///
    /// Returns `Ok(false)` when the tool-call id is unknown: the result is
    /// logged and dropped without failing the session.
    pub async fn send_tool_result(
        &self,
        tool_call_id: &str,
        content: &str,
    ) -> Result<bool, SessionError> {
        let pending = self
            .shared
            .pending
            .lock()
            .expect("pending lock")
            .remove(tool_call_id);
        let Some(pending) = pending else {
            warn!(tool_call_id, "dropping tool result for unknown tool call id");
            return Ok(false);
        };

        let reply = build_exec_reply(&pending, content);
        append_result_pair(&self.shared, reply).await?;

        let mut state = self.shared.state.lock().expect("state lock");
        if *state == SessionState::AwaitingTool {
            *state = SessionState::Streaming;
        }
        Ok(true)
    }

    /// Aborts the inbound reader and rejects subsequent sends.
    pub fn cancel(&self) {
        set_state(&self.shared, SessionState::Closed);
        self.shared.cancel.notify_one();
    }
}

fn set_state(shared: &SessionShared, state: SessionState) {
    *shared.state.lock().expect("state lock") = state;
}

fn build_run_request(
    config: &SessionConfig,
    prompt: String,
    tools: Vec<McpToolDefinition>,
) -> AgentRunRequest {
    AgentRunRequest {
        action: ConversationAction {
            user_message: UserMessage {
                text: prompt,
                message_id: Uuid::new_v4().to_string(),
                mode: config.mode,
            },
            request_context: RequestContext {
                env: EnvironmentContext {
                    os: config.os_descriptor.clone(),
                    workspace_path: config.workspace_path.clone(),
                    shell: config.shell.clone(),
                    timezone: config.timezone.clone(),
                },
                tools: tools.clone(),
                mcp_instructions: config.mcp_instructions.clone(),
            },
        },
        model_name: config.model_name.clone(),
        tools,
        conversation_id: Uuid::new_v4().to_string(),
        fs_options: McpFileSystemOptions {
            enabled: true,
            workspace_project_dir: config.workspace_path.clone(),
            descriptors: vec!["cursor-tools".to_string()],
        },
    }
}

async fn append_one(
    shared: &SessionShared,
    message: &AgentClientMessage,
) -> Result<(), SessionError> {
    let mut seqno = shared.outbound.lock().await;
    send_locked(shared, &mut seqno, message).await
}

/// Sends (result, stream_close) for one exec id under a single outbound
/// reservation so the pair stays contiguous on the wire.
async fn append_result_pair(
    shared: &SessionShared,
    reply: ExecClientMessage,
) -> Result<(), SessionError> {
    let stream_close_id = reply.id;
    let mut seqno = shared.outbound.lock().await;
    send_locked(shared, &mut seqno, &AgentClientMessage::Exec(reply)).await?;
    send_locked(
        shared,
        &mut seqno,
        &AgentClientMessage::ExecControl { stream_close_id },
    )
    .await
}

async fn send_locked(
    shared: &SessionShared,
    seqno: &mut tokio::sync::MutexGuard<'_, i64>,
    message: &AgentClientMessage,
) -> Result<(), SessionError> {
    if *shared.state.lock().expect("state lock") == SessionState::Closed {
        return Err(SessionError::Closed);
    }
    let append = BidiAppendRequest {
        data_hex: hex::encode(message.encode()),
        request_id: shared.request_id.clone(),
        append_seqno: **seqno,
    };
    shared.transport.bidi_append(&append).await?;
    **seqno += 1;
    Ok(())
}

enum FlowControl {
    Continue,
    TurnEnded,
}

async fn read_loop(
    shared: Arc<SessionShared>,
    mut stream: FrameByteStream,
    tx: mpsc::Sender<SessionEvent>,
) {
    use futures_util::StreamExt;

    let deadline =
        tokio::time::Instant::now() + Duration::from_millis(shared.config.deadline_ms.max(1));
    let mut reader = FrameReader::new();
    let mut idle = IdleTracker::new();
    let mut streamed_text = false;

    loop {
        let chunk = tokio::select! {
            _ = shared.cancel.notified() => {
                close(&shared);
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                close(&shared);
                let _ = tx
                    .send(SessionEvent::ProtocolError {
                        message: "session deadline exceeded".to_string(),
                    })
                    .await;
                return;
            }
            chunk = stream.next() => chunk,
        };

        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(error)) => {
                fail(&shared, &tx, error.to_string()).await;
                return;
            }
            None => {
                finish_turn(&shared, &tx, streamed_text).await;
                return;
            }
        };

        reader.extend(&chunk);
        loop {
            match reader.next_frame() {
                Ok(Some(Frame::Message(payload))) => {
                    match handle_message(&shared, &tx, &payload, &mut idle, &mut streamed_text)
                        .await
                    {
                        Ok(FlowControl::Continue) => {}
                        Ok(FlowControl::TurnEnded) => {
                            finish_turn(&shared, &tx, streamed_text).await;
                            return;
                        }
                        Err(error) => {
                            fail(&shared, &tx, error.to_string()).await;
                            return;
                        }
                    }
                }
                Ok(Some(Frame::Trailer)) => {
                    finish_turn(&shared, &tx, streamed_text).await;
                    return;
                }
                Ok(None) => break,
                Err(error) => {
                    fail(&shared, &tx, error.to_string()).await;
                    return;
                }
            }
        }
    }
}

async fn handle_message(
    shared: &Arc<SessionShared>,
    tx: &mpsc::Sender<SessionEvent>,
    payload: &[u8],
    idle: &mut IdleTracker,
    streamed_text: &mut bool,
) -> Result<FlowControl, SessionError> {
    match AgentServerMessage::decode(payload)? {
        AgentServerMessage::Interaction(update) => match update {
            InteractionUpdate::TextDelta { text } | InteractionUpdate::TokenDelta { text } => {
                idle.mark_progress();
                if !text.is_empty() {
                    *streamed_text = true;
                    emit(tx, SessionEvent::Text { text }).await?;
                }
            }
            InteractionUpdate::ToolCallStarted { call_id, name } => {
                idle.mark_progress();
                emit(tx, SessionEvent::ToolCallStarted { call_id, name }).await?;
            }
            InteractionUpdate::PartialToolCall {
                call_id,
                args_delta,
            } => {
                idle.mark_progress();
                emit(
                    tx,
                    SessionEvent::PartialToolCall {
                        call_id,
                        args_delta,
                    },
                )
                .await?;
            }
            InteractionUpdate::ToolCallCompleted { call_id } => {
                idle.mark_progress();
                emit(tx, SessionEvent::ToolCallCompleted { call_id }).await?;
            }
            InteractionUpdate::Heartbeat => {
                if idle.on_heartbeat(&shared.config.idle_policy) {
                    debug!(
                        session_id = %shared.session_id,
                        beats = idle.heartbeats_since_progress,
                        "heartbeat starvation threshold reached, ending turn"
                    );
                    return Ok(FlowControl::TurnEnded);
                }
            }
            InteractionUpdate::TurnEnded => return Ok(FlowControl::TurnEnded),
            InteractionUpdate::Unknown { field } => {
                idle.mark_progress();
                debug!(field, "skipping unknown interaction update");
            }
        },
        AgentServerMessage::Exec(exec) => {
            idle.mark_progress();
            match &exec.request {
                ExecRequestPayload::RequestContext => {
                    let reply = ExecClientMessage {
                        id: exec.id,
                        exec_id: exec.exec_id.clone(),
                        payload: ExecResultPayload::RequestContext,
                    };
                    append_result_pair(shared, reply).await?;
                }
                ExecRequestPayload::Unknown { field } => {
                    warn!(field, exec_id = %exec.exec_id, "ignoring unknown exec type");
                }
                _ => {
                    let (event, pending) = exec_to_tool_event(&shared.session_id, &exec);
                    shared
                        .pending
                        .lock()
                        .expect("pending lock")
                        .insert(event.tool_call_id.clone(), pending);
                    set_state(shared, SessionState::AwaitingTool);
                    emit(tx, SessionEvent::ToolExec(event)).await?;
                }
            }
        }
        AgentServerMessage::Checkpoint(checkpoint) => {
            idle.mark_progress();
            emit(
                tx,
                SessionEvent::Checkpoint {
                    checkpoint_id: checkpoint.checkpoint_id,
                },
            )
            .await?;
        }
        AgentServerMessage::Kv(kv) => {
            idle.mark_progress();
            match kv.op {
                KvServerOp::GetBlob { blob_id } => {
                    let blob_data = shared
                        .blobs
                        .lock()
                        .expect("blob lock")
                        .get(&blob_id)
                        .map(<[u8]>::to_vec);
                    let reply = AgentClientMessage::Kv(KvClientMessage {
                        id: kv.id,
                        reply: KvClientReply::GetBlobResult { blob_data },
                    });
                    append_one(shared, &reply).await?;
                }
                KvServerOp::SetBlob { blob_id, blob_data } => {
                    shared
                        .blobs
                        .lock()
                        .expect("blob lock")
                        .set(blob_id, blob_data);
                    let reply = AgentClientMessage::Kv(KvClientMessage {
                        id: kv.id,
                        reply: KvClientReply::SetBlobResult,
                    });
                    append_one(shared, &reply).await?;
                }
                KvServerOp::Unknown { field } => {
                    debug!(field, "skipping unknown kv operation");
                }
            }
        }
        AgentServerMessage::ExecControl(control) => {
            idle.mark_progress();
            emit(
                tx,
                SessionEvent::Aborted {
                    exec_stream_id: control.abort_id,
                },
            )
            .await?;
        }
        AgentServerMessage::Query(query) => {
            idle.mark_progress();
            debug!(id = query.id, "interaction query acknowledged");
        }
        AgentServerMessage::Unknown { field } => {
            idle.mark_progress();
            debug!(field, "skipping unknown server message");
        }
    }
    Ok(FlowControl::Continue)
}

async fn emit(
    tx: &mpsc::Sender<SessionEvent>,
    event: SessionEvent,
) -> Result<(), SessionError> {
    tx.send(event).await.map_err(|_| SessionError::Closed)
}

/// Turn-end path: recover blob-persisted assistant text when nothing was
/// streamed, then close and drop any unanswered exec registrations.
async fn finish_turn(shared: &SessionShared, tx: &mpsc::Sender<SessionEvent>, streamed: bool) {
    set_state(shared, SessionState::Closing);
    if !streamed {
        let recovered: Vec<String> = shared
            .blobs
            .lock()
            .expect("blob lock")
            .assistant_texts()
            .to_vec();
        for text in recovered {
            if tx.send(SessionEvent::Text { text }).await.is_err() {
                break;
            }
        }
    }
    let _ = tx.send(SessionEvent::TurnEnded).await;
    close(shared);
}

async fn fail(shared: &SessionShared, tx: &mpsc::Sender<SessionEvent>, message: String) {
    close(shared);
    let _ = tx.send(SessionEvent::ProtocolError { message }).await;
}

fn close(shared: &SessionShared) {
    set_state(shared, SessionState::Closed);
    let dropped = shared.pending.lock().expect("pending lock").len();
    if dropped > 0 {
        debug!(dropped, "dropping unanswered exec registrations at close");
    }
    shared.pending.lock().expect("pending lock").clear();
}
