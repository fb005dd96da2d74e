//! Request handlers: one fresh Cursor session per inbound request.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{ApiError, GatewayState};
use tether_auth::bidi_headers;
use tether_openai::{
    extract_tool_definitions, flatten_messages, ChatCompletionsRequest, ModelCatalog,
    ResponseAggregator, SseState, SSE_DONE,
};
use tether_session::{
    AgentSession, HttpAgentTransport, SessionConfig, SessionError, SessionEvent, TransportConfig,
};

pub(crate) async fn handle_chat_completions(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ChatCompletionsRequest>,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::bad_request(
            "missing_messages",
            "messages must include at least one item",
        ));
    }
    let model = request
        .model
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .unwrap_or(state.config.default_model.as_str())
        .to_string();
    let prompt = flatten_messages(&request.messages);
    if prompt.is_empty() {
        return Err(ApiError::bad_request(
            "missing_messages",
            "messages did not include any textual content",
        ));
    }
    let tools = extract_tool_definitions(&request.tools);
    debug!(
        model,
        tools = tools.len(),
        stream = request.stream,
        "opening cursor session"
    );

    let started = Instant::now();
    let (session, rx) = open_session(&state, &model, prompt, tools).await?;
    if request.stream {
        Ok(stream_response(model, session, rx).into_response())
    } else {
        let response = aggregate_response(&model, &session, rx).await?;
        if state.config.timing {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "turn completed");
        }
        Ok(response.into_response())
    }
}

/// Opens the session, refreshing the access token once on a 401.
async fn open_session(
    state: &GatewayState,
    model: &str,
    prompt: String,
    tools: Vec<tether_openai::McpToolDefinition>,
) -> Result<(AgentSession, mpsc::Receiver<SessionEvent>), ApiError> {
    let mut refreshed = false;
    loop {
        let token = state
            .credentials
            .valid_access_token(&state.auth_client)
            .await
            .map_err(|error| ApiError::unauthorized(error.to_string()))?;
        let request_id = Uuid::new_v4().to_string();
        let headers = bidi_headers(&token, &state.config.timezone, &request_id);
        let transport = HttpAgentTransport::new(
            TransportConfig {
                base_url: state.config.base_url.clone(),
                request_timeout_ms: state.config.request_timeout_ms,
                ..TransportConfig::default()
            },
            headers,
        )
        .map_err(|error| ApiError::internal(error.to_string()))?;
        let session_config = SessionConfig {
            model_name: model.to_string(),
            workspace_path: state.config.workspace_path.clone(),
            timezone: state.config.timezone.clone(),
            deadline_ms: state.config.request_timeout_ms,
            idle_policy: state.config.idle_policy.clone(),
            ..SessionConfig::default()
        };
        let session =
            AgentSession::with_request_id(Arc::new(transport), session_config, request_id);

        match session.run(prompt.clone(), tools.clone()).await {
            Ok(rx) => return Ok((session, rx)),
            Err(SessionError::Unauthorized) if !refreshed => {
                refreshed = true;
                warn!("cursor backend returned 401, refreshing token once");
                state
                    .credentials
                    .refresh_once(&state.auth_client)
                    .await
                    .map_err(|error| ApiError::unauthorized(error.to_string()))?;
            }
            Err(SessionError::Unauthorized) => {
                return Err(ApiError::unauthorized(
                    "cursor backend rejected the refreshed token",
                ));
            }
            Err(error) => return Err(ApiError::upstream(error.to_string())),
        }
    }
}

struct StreamCtx {
    session: AgentSession,
    rx: mpsc::Receiver<SessionEvent>,
    sse: SseState,
    queue: VecDeque<String>,
    done: bool,
}

fn stream_response(
    model: String,
    session: AgentSession,
    rx: mpsc::Receiver<SessionEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ctx = StreamCtx {
        session,
        rx,
        sse: SseState::new(model),
        queue: VecDeque::new(),
        done: false,
    };
    let stream = futures_util::stream::unfold(ctx, |mut ctx| async move {
        loop {
            if let Some(data) = ctx.queue.pop_front() {
                return Some((Ok(Event::default().data(data)), ctx));
            }
            if ctx.done {
                return None;
            }
            match ctx.rx.recv().await {
                Some(event) => {
                    let terminal = matches!(
                        event,
                        SessionEvent::TurnEnded | SessionEvent::ProtocolError { .. }
                    );
                    let requests_tools = matches!(event, SessionEvent::ToolExec(_));
                    for chunk in ctx.sse.chunks_for_event(&event) {
                        ctx.queue.push_back(chunk.to_string());
                    }
                    if requests_tools {
                        // The result arrives on the next inbound request, so
                        // this turn is over: finish with "tool_calls" and
                        // drop the session instead of waiting on upstream.
                        for chunk in ctx.sse.chunks_for_event(&SessionEvent::TurnEnded) {
                            ctx.queue.push_back(chunk.to_string());
                        }
                        ctx.queue.push_back(SSE_DONE.to_string());
                        ctx.done = true;
                        ctx.session.cancel();
                    } else if terminal {
                        ctx.queue.push_back(SSE_DONE.to_string());
                        ctx.done = true;
                    }
                }
                None => {
                    // Reader task ended without a terminal event; still
                    // terminate the SSE stream cleanly.
                    ctx.queue.push_back(SSE_DONE.to_string());
                    ctx.done = true;
                }
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn aggregate_response(
    model: &str,
    session: &AgentSession,
    mut rx: mpsc::Receiver<SessionEvent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut aggregator = ResponseAggregator::new();
    while let Some(event) = rx.recv().await {
        let terminal = matches!(
            event,
            SessionEvent::TurnEnded | SessionEvent::ProtocolError { .. }
        );
        let requests_tools = matches!(event, SessionEvent::ToolExec(_));
        aggregator.push(&event);
        if requests_tools {
            // This turn ends at the first exec; the tool result comes back
            // flattened into the next request's prompt.
            session.cancel();
            break;
        }
        if terminal {
            break;
        }
    }
    if let Some(error) = aggregator.error() {
        return Err(ApiError::upstream(error.to_string()));
    }
    Ok(Json(aggregator.into_response(model)))
}

pub(crate) async fn handle_models(
    State(_state): State<Arc<GatewayState>>,
) -> Json<serde_json::Value> {
    let created = tether_core::current_unix_timestamp();
    let data: Vec<serde_json::Value> = ModelCatalog::model_ids()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "tether-gateway",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}
