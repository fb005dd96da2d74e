//! End-to-end session machine tests against a scripted transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use tether_session::{
    AgentSession, AgentTransport, FrameByteStream, SessionConfig, SessionError, SessionEvent,
    SessionState,
};
use tether_wire::{
    encode_frame, find_len, find_str, find_varint, parse_fields, BidiAppendRequest, FieldWriter,
};

struct ScriptedTransport {
    chunks: Vec<Vec<u8>>,
    appends: Mutex<Vec<BidiAppendRequest>>,
    hang_after_chunks: bool,
}

impl ScriptedTransport {
    fn new(chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            appends: Mutex::new(Vec::new()),
            hang_after_chunks: false,
        })
    }

    fn hanging(chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            appends: Mutex::new(Vec::new()),
            hang_after_chunks: true,
        })
    }

    fn recorded_appends(&self) -> Vec<BidiAppendRequest> {
        self.appends.lock().expect("appends lock").clone()
    }

    fn decoded_messages(&self) -> Vec<Vec<u8>> {
        self.recorded_appends()
            .iter()
            .map(|append| hex::decode(&append.data_hex).expect("hex body"))
            .collect()
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn open_run_stream(&self, _request_id: &str) -> Result<FrameByteStream, SessionError> {
        let chunks: Vec<Result<bytes::Bytes, SessionError>> = self
            .chunks
            .iter()
            .map(|chunk| Ok(bytes::Bytes::from(chunk.clone())))
            .collect();
        if self.hang_after_chunks {
            Ok(futures_util::stream::iter(chunks)
                .chain(futures_util::stream::pending())
                .boxed())
        } else {
            Ok(futures_util::stream::iter(chunks).boxed())
        }
    }

    async fn bidi_append(&self, append: &BidiAppendRequest) -> Result<(), SessionError> {
        self.appends.lock().expect("appends lock").push(append.clone());
        Ok(())
    }
}

fn interaction_frame(field: u32, body: &[u8]) -> Vec<u8> {
    let mut update = FieldWriter::new();
    update.put_message(field, body);
    let mut outer = FieldWriter::new();
    outer.put_message(1, &update.finish());
    encode_frame(&outer.finish())
}

fn text_delta_frame(text: &str) -> Vec<u8> {
    let mut body = FieldWriter::new();
    body.put_str(1, text);
    interaction_frame(1, &body.finish())
}

fn heartbeat_frame() -> Vec<u8> {
    interaction_frame(13, &[])
}

fn turn_ended_frame() -> Vec<u8> {
    interaction_frame(14, &[])
}

fn set_blob_frame(id: u32, blob_id: &[u8], blob_data: &[u8]) -> Vec<u8> {
    let mut args = FieldWriter::new();
    args.put_bytes(1, blob_id);
    args.put_bytes(2, blob_data);
    let mut kv = FieldWriter::new();
    kv.put_uint(1, u64::from(id));
    kv.put_message(3, &args.finish());
    let mut outer = FieldWriter::new();
    outer.put_message(4, &kv.finish());
    encode_frame(&outer.finish())
}

fn get_blob_frame(id: u32, blob_id: &[u8]) -> Vec<u8> {
    let mut args = FieldWriter::new();
    args.put_bytes(1, blob_id);
    let mut kv = FieldWriter::new();
    kv.put_uint(1, u64::from(id));
    kv.put_message(2, &args.finish());
    let mut outer = FieldWriter::new();
    outer.put_message(4, &kv.finish());
    encode_frame(&outer.finish())
}

fn shell_exec_frame(id: u32, exec_id: &str, command: &str) -> Vec<u8> {
    let mut shell = FieldWriter::new();
    shell.put_str(1, command);
    let mut exec = FieldWriter::new();
    exec.put_uint(1, u64::from(id));
    exec.put_message(2, &shell.finish());
    exec.put_str(15, exec_id);
    let mut outer = FieldWriter::new();
    outer.put_message(2, &exec.finish());
    encode_frame(&outer.finish())
}

fn error_trailer_frame(status: u32, message: &str) -> Vec<u8> {
    let body = format!("grpc-status: {status}\r\ngrpc-message: {message}\r\n");
    let mut frame = vec![0x80];
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body.as_bytes());
    frame
}

async fn collect_events(mut rx: mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn test_config() -> SessionConfig {
    SessionConfig {
        model_name: "sonnet-4.5".to_string(),
        workspace_path: "/work".to_string(),
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn streams_text_then_turn_end_in_arrival_order() {
    let transport = ScriptedTransport::new(vec![
        text_delta_frame("hello "),
        text_delta_frame("world"),
        turn_ended_frame(),
    ]);
    let session = AgentSession::new(transport.clone(), test_config());
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let events = collect_events(rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Text {
                text: "hello ".to_string()
            },
            SessionEvent::Text {
                text: "world".to_string()
            },
            SessionEvent::TurnEnded,
        ]
    );
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn functional_append_seqnos_are_gap_free_from_zero() {
    let transport = ScriptedTransport::new(vec![
        set_blob_frame(1, b"a", br#"{"role":"user","content":"x"}"#),
        get_blob_frame(2, b"a"),
        get_blob_frame(3, b"missing"),
        turn_ended_frame(),
    ]);
    let session = AgentSession::new(transport.clone(), test_config());
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");
    collect_events(rx).await;

    let appends = transport.recorded_appends();
    let seqnos: Vec<i64> = appends.iter().map(|append| append.append_seqno).collect();
    assert_eq!(seqnos, vec![0, 1, 2, 3]);
    assert!(appends
        .iter()
        .all(|append| append.request_id == session.request_id()));
}

#[tokio::test]
async fn kv_replies_echo_server_id_and_blob_contents() {
    let transport = ScriptedTransport::new(vec![
        set_blob_frame(41, b"addr", b"\xde\xad\xbe\xef"),
        get_blob_frame(42, b"addr"),
        get_blob_frame(43, b"unknown"),
        turn_ended_frame(),
    ]);
    let session = AgentSession::new(transport.clone(), test_config());
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");
    collect_events(rx).await;

    let messages = transport.decoded_messages();
    // messages[0] is the run request; the rest are kv replies.
    let set_reply = parse_fields(&messages[1]).expect("set reply");
    let kv = parse_fields(find_len(&set_reply, 3).expect("kv client message")).expect("kv");
    assert_eq!(find_varint(&kv, 1), Some(41));
    assert!(find_len(&kv, 3).expect("set_blob_result").is_empty());

    let get_hit = parse_fields(&messages[2]).expect("get reply");
    let kv = parse_fields(find_len(&get_hit, 3).expect("kv client message")).expect("kv");
    assert_eq!(find_varint(&kv, 1), Some(42));
    let body = parse_fields(find_len(&kv, 2).expect("get_blob_result")).expect("body");
    assert_eq!(find_len(&body, 1), Some(&b"\xde\xad\xbe\xef"[..]));

    let get_miss = parse_fields(&messages[3]).expect("get miss reply");
    let kv = parse_fields(find_len(&get_miss, 3).expect("kv client message")).expect("kv");
    assert_eq!(find_varint(&kv, 1), Some(43));
    assert!(find_len(&kv, 2).expect("empty result").is_empty());
}

#[tokio::test]
async fn functional_assistant_blob_recovery_on_silent_turn() {
    let transport = ScriptedTransport::new(vec![
        set_blob_frame(
            1,
            b"ck-1",
            br#"{"role":"assistant","content":"recovered one"}"#,
        ),
        set_blob_frame(
            2,
            b"ck-2",
            br#"{"messages":[{"role":"assistant","content":"recovered two"}]}"#,
        ),
        turn_ended_frame(),
    ]);
    let session = AgentSession::new(transport, test_config());
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let events = collect_events(rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Text {
                text: "recovered one".to_string()
            },
            SessionEvent::Text {
                text: "recovered two".to_string()
            },
            SessionEvent::TurnEnded,
        ]
    );
}

#[tokio::test]
async fn regression_streamed_text_suppresses_blob_recovery() {
    let transport = ScriptedTransport::new(vec![
        text_delta_frame("streamed answer"),
        set_blob_frame(1, b"ck", br#"{"role":"assistant","content":"from blob"}"#),
        turn_ended_frame(),
    ]);
    let session = AgentSession::new(transport, test_config());
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let events = collect_events(rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Text {
                text: "streamed answer".to_string()
            },
            SessionEvent::TurnEnded,
        ]
    );
}

#[tokio::test]
async fn heartbeat_starvation_forces_synthetic_turn_end() {
    let mut chunks = vec![text_delta_frame("one delta")];
    for _ in 0..1_000 {
        chunks.push(heartbeat_frame());
    }
    // No turn_ended frame; the stream hangs after the beats.
    let transport = ScriptedTransport::hanging(chunks);
    let session = AgentSession::new(transport, test_config());
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let events = collect_events(rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Text {
                text: "one delta".to_string()
            },
            SessionEvent::TurnEnded,
        ]
    );
}

#[tokio::test]
async fn nonzero_trailer_closes_without_turn_end() {
    let transport = ScriptedTransport::new(vec![
        text_delta_frame("partial"),
        error_trailer_frame(13, "foo%20bar"),
    ]);
    let session = AgentSession::new(transport, test_config());
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        SessionEvent::Text {
            text: "partial".to_string()
        }
    );
    match &events[1] {
        SessionEvent::ProtocolError { message } => {
            assert!(message.contains("foo bar"), "message: {message}");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(!events.contains(&SessionEvent::TurnEnded));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn functional_exec_request_bridges_and_result_pair_is_contiguous() {
    let transport = ScriptedTransport::hanging(vec![shell_exec_frame(5, "exec-5", "echo hi")]);
    let session = AgentSession::new(transport.clone(), test_config());
    let mut rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let event = rx.recv().await.expect("exec event");
    let SessionEvent::ToolExec(exec) = event else {
        panic!("expected tool exec event, got {event:?}");
    };
    assert_eq!(exec.name, "bash");
    assert_eq!(exec.arguments["command"], "echo hi");
    assert_eq!(session.state(), SessionState::AwaitingTool);

    let sent = session
        .send_tool_result(&exec.tool_call_id, "hi\n")
        .await
        .expect("send result");
    assert!(sent);
    assert_eq!(session.state(), SessionState::Streaming);

    let messages = transport.decoded_messages();
    // run request, then the (result, stream_close) pair.
    assert_eq!(messages.len(), 3);
    let result = parse_fields(&messages[1]).expect("result append");
    let exec_message =
        parse_fields(find_len(&result, 2).expect("exec client message")).expect("exec");
    assert_eq!(find_varint(&exec_message, 1), Some(5));
    assert_eq!(find_str(&exec_message, 15).expect("exec id"), "exec-5");

    let close = parse_fields(&messages[2]).expect("close append");
    let control =
        parse_fields(find_len(&close, 5).expect("control message")).expect("control body");
    let stream_close = parse_fields(find_len(&control, 1).expect("stream_close")).expect("close");
    assert_eq!(find_varint(&stream_close, 1), Some(5));

    session.cancel();
}

#[tokio::test]
async fn functional_unanswered_exec_still_closes_on_turn_end() {
    // Production traffic never answers an exec within the same request: the
    // result comes back flattened into the next one. The turn must still
    // close cleanly without any send_tool_result call.
    let transport = ScriptedTransport::new(vec![
        shell_exec_frame(6, "exec-6", "cargo metadata"),
        turn_ended_frame(),
    ]);
    let session = AgentSession::new(transport.clone(), test_config());
    let mut rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let SessionEvent::ToolExec(exec) = rx.recv().await.expect("exec event") else {
        panic!("expected tool exec event");
    };
    assert_eq!(rx.recv().await, Some(SessionEvent::TurnEnded));
    assert_eq!(rx.recv().await, None);
    assert_eq!(session.state(), SessionState::Closed);

    // The pending registration was dropped at close: a late result is
    // logged and dropped, never sent on the wire.
    let sent = session
        .send_tool_result(&exec.tool_call_id, "late")
        .await
        .expect("late result is dropped, not an error");
    assert!(!sent);
    assert_eq!(transport.recorded_appends().len(), 1, "run request only");
}

#[tokio::test]
async fn unknown_tool_result_is_dropped_without_failing() {
    let transport = ScriptedTransport::hanging(vec![]);
    let session = AgentSession::new(transport.clone(), test_config());
    let _rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let sent = session
        .send_tool_result("sess_other__call_abc", "content")
        .await
        .expect("drop is not an error");
    assert!(!sent);
    // Only the run request went out.
    assert_eq!(transport.recorded_appends().len(), 1);
    session.cancel();
}

#[tokio::test]
async fn regression_sends_after_cancel_are_rejected() {
    let transport = ScriptedTransport::hanging(vec![shell_exec_frame(5, "exec-5", "echo hi")]);
    let session = AgentSession::new(transport.clone(), test_config());
    let mut rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let SessionEvent::ToolExec(exec) = rx.recv().await.expect("exec event") else {
        panic!("expected tool exec event");
    };
    session.cancel();

    let result = session.send_tool_result(&exec.tool_call_id, "late").await;
    assert!(matches!(result, Err(SessionError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn wall_clock_deadline_closes_the_session() {
    let transport = ScriptedTransport::hanging(vec![text_delta_frame("early")]);
    let config = SessionConfig {
        deadline_ms: 50,
        ..test_config()
    };
    let session = AgentSession::new(transport, config);
    let rx = session.run("prompt".to_string(), vec![]).await.expect("run");

    let events = collect_events(rx).await;
    assert_eq!(
        events.last(),
        Some(&SessionEvent::ProtocolError {
            message: "session deadline exceeded".to_string()
        })
    );
    assert!(!events.contains(&SessionEvent::TurnEnded));
    assert_eq!(session.state(), SessionState::Closed);
}
