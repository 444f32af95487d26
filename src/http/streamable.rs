//! Streamable HTTP transport
//!
//! Every call on `/mcp` is one JSON-RPC exchange. The `Mcp-Session-Id`
//! header is optional: unknown or missing ids fall back to session-less
//! handling, with configuration resolved purely from the request.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::{request_config::merge, tools::ToolKind};
use crate::errors::AppError;
use crate::http::{envelope, session_id_from, MCP_PATH, MCP_SSE_PATH};
use crate::mcp::{
    channel::{BufferedChannel, McpConnection},
    rpc::{json_rpc_error, INTERNAL_ERROR, PARSE_ERROR},
    server::{Dispatcher, SUPPORTED_PROTOCOL_VERSIONS},
};
use crate::AppState;

pub async fn mcp_endpoint(
    State(state): State<AppState>,
    method: Method,
    Query(raw): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.sessions.maybe_sweep(state.transport.session_ttl).await;

    if method == Method::DELETE {
        return terminate_session(&state, &headers).await;
    }

    if body.iter().all(u8::is_ascii_whitespace) && method == Method::GET {
        return endpoint_info().into_response();
    }

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

    let session_id = match header_session(&headers) {
        Some(id) if state.sessions.touch(&id).await => Some(id),
        Some(id) => {
            debug!(session_id = %id, "unknown session, continuing without one");
            None
        }
        None => None,
    };
    let session_id = match session_id {
        Some(id) => Some(id),
        None if contains_initialize(&payload) => Some(state.sessions.create().await),
        None => None,
    };

    let config = merge(&state.defaults, &raw);
    let mut connection = McpConnection::new(
        Dispatcher::new(state.clone(), config),
        BufferedChannel::new(),
    );

    if let Err(err) = connection.on_message(payload).await {
        warn!(error = %err, "mcp message could not be answered");
        return envelope::json_response(
            StatusCode::OK,
            json_rpc_error(None, INTERNAL_ERROR, "Internal error"),
            session_id.as_deref(),
        );
    }

    let frames = connection.channel_mut().drain();
    envelope::write_frames(
        frames,
        session_id.as_deref(),
        envelope::wants_event_stream(&headers),
    )
}

fn header_session(headers: &HeaderMap) -> Option<String> {
    // Streamable HTTP only honours the header, never a query parameter.
    session_id_from(headers, &[])
}

fn contains_initialize(payload: &Value) -> bool {
    let is_initialize =
        |message: &Value| message.get("method").and_then(Value::as_str) == Some("initialize");

    match payload {
        Value::Array(batch) => batch.iter().any(is_initialize),
        message => is_initialize(message),
    }
}

async fn terminate_session(state: &AppState, headers: &HeaderMap) -> Response {
    let Some(session_id) = header_session(headers) else {
        return AppError::invalid_params(
            "missing_session_id",
            "DELETE requires the Mcp-Session-Id header",
        )
        .into_response();
    };

    if state.sessions.remove(&session_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "code": "session_not_found",
                "message": "unknown session id",
                "details": { "sessionId": session_id },
            })),
        )
            .into_response()
    }
}

fn endpoint_info() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "transport": "streamable-http",
        "endpoint": MCP_PATH,
        "sseEndpoint": MCP_SSE_PATH,
        "protocolVersions": SUPPORTED_PROTOCOL_VERSIONS,
        "tools": ToolKind::ALL.iter().map(|kind| kind.name()).collect::<Vec<_>>(),
        "usage": "POST JSON-RPC 2.0 messages to this endpoint",
    }))
}
