//! Legacy Server-Sent Events transport
//!
//! `GET /mcp/sse` opens a stream that announces the connection, then only
//! carries keep-alives until it reaches its maximum lifetime. `POST /mcp/sse`
//! answers each JSON-RPC message with a plain JSON body; correlation relies
//! on the JSON-RPC `id` alone.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::request_config::merge;
use crate::http::{
    envelope::{self, SseChannel},
    session_id_from, MCP_SSE_PATH,
};
use crate::mcp::{
    channel::{BufferedChannel, Frame, McpConnection, MessageChannel},
    rpc::{json_rpc_error, INTERNAL_ERROR, PARSE_ERROR},
    server::{Dispatcher, DEFAULT_PROTOCOL_VERSION},
};
use crate::AppState;

#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub keepalive: Duration,
    pub max_lifetime: Duration,
}

/// Frames every SSE stream starts with, in order: connection ack, the POST
/// endpoint for this session, the `initialized` notification.
pub fn opening_frames(session_id: &str) -> Vec<Frame> {
    vec![
        Frame::Message(json!({
            "type": "connection",
            "id": format!("conn_{}", Uuid::new_v4().simple()),
        })),
        Frame::Event {
            event: "endpoint".to_string(),
            data: format!("{}?sessionId={}", MCP_SSE_PATH, session_id),
        },
        Frame::Message(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {
                "protocolVersion": DEFAULT_PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "resources": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        })),
    ]
}

pub fn keepalive_frame() -> Frame {
    Frame::Comment(format!("ping - {}", Utc::now().to_rfc3339()))
}

/// Drives one SSE stream until shutdown, client disconnect or the maximum
/// lifetime, whichever comes first.
pub async fn run_stream(
    mut channel: SseChannel,
    session_id: String,
    opening: Vec<Frame>,
    limits: StreamLimits,
    shutdown: CancellationToken,
) {
    for frame in opening {
        if channel.send(frame).await.is_err() {
            debug!(session_id = %session_id, "sse client left before the stream opened");
            channel.close();
            return;
        }
    }

    let mut keepalive = interval_at(Instant::now() + limits.keepalive, limits.keepalive);
    let deadline = sleep(limits.max_lifetime);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(session_id = %session_id, "sse stream closed for shutdown");
                break;
            }
            _ = &mut deadline => {
                info!(session_id = %session_id, "sse stream reached maximum lifetime");
                break;
            }
            _ = channel.closed() => {
                debug!(session_id = %session_id, "sse client disconnected");
                break;
            }
            _ = keepalive.tick() => keepalive_frame(),
        };

        if channel.send(frame).await.is_err() {
            break;
        }
    }

    channel.close();
}

/// Creates a session, starts the stream task and returns the SSE response.
pub async fn open_session_stream(state: &AppState, extra_opening: Vec<Frame>) -> Response {
    state.sessions.maybe_sweep(state.transport.session_ttl).await;
    let session_id = state.sessions.create().await;
    let (channel, sse) = envelope::sse_channel();

    let mut opening = opening_frames(&session_id);
    opening.extend(extra_opening);

    let limits = StreamLimits {
        keepalive: state.transport.sse_keepalive,
        max_lifetime: state.transport.sse_max_lifetime,
    };
    info!(session_id = %session_id, "sse stream opened");
    tokio::spawn(run_stream(
        channel,
        session_id.clone(),
        opening,
        limits,
        state.shutdown.clone(),
    ));

    let mut response = sse.into_response();
    envelope::set_session_header(&mut response, Some(&session_id));
    response
}

pub async fn open_stream(State(state): State<AppState>) -> Response {
    open_session_stream(&state, Vec::new()).await
}

pub async fn post_message(
    State(state): State<AppState>,
    Query(raw): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.sessions.maybe_sweep(state.transport.session_ttl).await;

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return envelope::json_response(
                StatusCode::OK,
                json_rpc_error(None, PARSE_ERROR, "Parse error"),
                None,
            )
        }
    };

    let session_id = match session_id_from(&headers, &raw) {
        Some(id) if state.sessions.touch(&id).await => Some(id),
        Some(id) => {
            debug!(session_id = %id, "unknown sse session, answering without it");
            None
        }
        None => None,
    };

    let config = merge(&state.defaults, &raw);
    let mut connection = McpConnection::new(
        Dispatcher::new(state.clone(), config),
        BufferedChannel::new(),
    );

    if let Err(err) = connection.on_message(payload).await {
        warn!(error = %err, "sse message could not be answered");
        return envelope::json_response(
            StatusCode::OK,
            json_rpc_error(None, INTERNAL_ERROR, "Internal error"),
            session_id.as_deref(),
        );
    }

    let frames = connection.channel_mut().drain();
    envelope::write_frames(frames, session_id.as_deref(), false)
}
