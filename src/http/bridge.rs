//! SSE front-end bridged onto a remote streamable HTTP endpoint
//!
//! Clients see the legacy SSE contract. Every POST body is forwarded
//! byte-for-byte to `MCP_BRIDGE_TARGET_URL` with bridge credentials added,
//! and the upstream reply is relayed back with its decoded body. The client's
//! own credentials stay on this hop; upstream only sees the bridge key.
//! Upstream failures are reported as JSON-RPC errors with HTTP 200.

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::API_KEY_QUERY_PARAM;
use crate::config::BridgeSettings;
use crate::http::{envelope, session_id_from, sse, MCP_SESSION_ID_HEADER};
use crate::mcp::{
    channel::Frame,
    rpc::{json_rpc_error, json_rpc_error_with_data, INTERNAL_ERROR, PARSE_ERROR},
};
use crate::AppState;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);
const UPSTREAM_ACCEPT: &str = "application/json, text/event-stream";

/// Response headers that describe the upstream hop, not the relayed body.
const DROPPED_RESPONSE_HEADERS: [HeaderName; 4] = [
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: Client,
    target: Url,
    api_key: Option<String>,
}

#[derive(Debug)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BridgeClient {
    pub fn new(settings: &BridgeSettings) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;
        Ok(Self {
            http,
            target: settings.target_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Target URL with the client's query pairs. A client-supplied `apiKey`
    /// authenticates against this server only and is never passed on; the
    /// bridge key takes its place when configured.
    pub fn upstream_url(&self, query: &[(String, String)]) -> Url {
        let mut url = self.target.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                if key == API_KEY_QUERY_PARAM {
                    continue;
                }
                pairs.append_pair(key, value);
            }
            if let Some(api_key) = &self.api_key {
                pairs.append_pair(API_KEY_QUERY_PARAM, api_key);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url
    }

    pub async fn forward(
        &self,
        body: Bytes,
        query: &[(String, String)],
        headers: &HeaderMap,
        session_id: Option<&str>,
    ) -> Result<UpstreamReply, reqwest::Error> {
        let url = self.upstream_url(query);
        debug!(target_host = url.host_str().unwrap_or("-"), "forwarding bridged message");

        let mut request = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, UPSTREAM_ACCEPT)
            .body(body);

        if let Some(session_id) = session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }
        if let Some(version) = headers.get("mcp-protocol-version") {
            request = request.header("mcp-protocol-version", version.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(UpstreamReply {
            status,
            headers,
            body,
        })
    }
}

/// Splits an event-stream body into the data payload of each event.
pub fn decode_sse_events(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in body.split('\n') {
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            if !data_lines.is_empty() {
                events.push(data_lines.join("\n"));
                data_lines.clear();
            }
            continue;
        }

        if line.starts_with(':') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if !data_lines.is_empty() {
        events.push(data_lines.join("\n"));
    }

    events
}

pub fn first_sse_message(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    decode_sse_events(text)
        .into_iter()
        .find_map(|data| serde_json::from_str(&data).ok())
}

fn deprecation_notice() -> Frame {
    Frame::Message(json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": {
            "level": "warning",
            "logger": "sse-bridge",
            "data": "The SSE transport is deprecated; messages are bridged to streamable HTTP.",
        },
    }))
}

pub async fn open_stream(State(state): State<AppState>) -> Response {
    sse::open_session_stream(&state, vec![deprecation_notice()]).await
}

pub async fn forward_message(
    State(state): State<AppState>,
    Query(raw): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(bridge) = state.bridge.clone() else {
        return envelope::json_response(
            StatusCode::OK,
            json_rpc_error(None, INTERNAL_ERROR, "Internal error"),
            None,
        );
    };

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
    let request_id = payload.get("id").cloned();

    let inbound_session = session_id_from(&headers, &raw);
    if let Some(id) = &inbound_session {
        state.sessions.touch(id).await;
    }

    let reply = match bridge
        .forward(body, &raw, &headers, inbound_session.as_deref())
        .await
    {
        Ok(reply) => reply,
        Err(err) => {
            warn!(error = %err, upstream = %bridge.target(), "bridge upstream unreachable");
            return envelope::json_response(
                StatusCode::OK,
                json_rpc_error_with_data(
                    request_id,
                    INTERNAL_ERROR,
                    "Internal error",
                    Some(json!({
                        "error": err.to_string(),
                        "target": bridge.target().as_str(),
                    })),
                ),
                inbound_session.as_deref(),
            );
        }
    };

    let session_id = reply
        .headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or(inbound_session)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if !reply.status.is_success() {
        warn!(status = reply.status.as_u16(), "bridge upstream returned an error status");
        return envelope::json_response(
            StatusCode::OK,
            json_rpc_error_with_data(
                request_id,
                INTERNAL_ERROR,
                "Internal error",
                Some(json!({
                    "status": reply.status.as_u16(),
                    "statusText": reply.status.canonical_reason().unwrap_or(""),
                    "body": String::from_utf8_lossy(&reply.body),
                })),
            ),
            Some(&session_id),
        );
    }

    relay(reply, request_id, &session_id)
}

fn relay(reply: UpstreamReply, request_id: Option<Value>, session_id: &str) -> Response {
    let is_event_stream = reply
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with("text/event-stream"));

    if is_event_stream {
        let body = match first_sse_message(&reply.body) {
            Some(message) => message,
            None => json_rpc_error_with_data(
                request_id,
                INTERNAL_ERROR,
                "Internal error",
                Some(json!({ "error": "upstream event stream carried no JSON-RPC message" })),
            ),
        };
        return envelope::json_response(StatusCode::OK, body, Some(session_id));
    }

    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;
    for (name, value) in reply.headers.iter() {
        if DROPPED_RESPONSE_HEADERS.contains(name) || name.as_str() == MCP_SESSION_ID_HEADER {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    if !response.headers().contains_key(header::CONTENT_TYPE)
        && reply.status != StatusCode::ACCEPTED
    {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    envelope::set_session_header(&mut response, Some(session_id));
    info!(status = reply.status.as_u16(), "bridged message relayed");
    response.into_response()
}
