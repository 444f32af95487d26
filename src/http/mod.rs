//! HTTP Transport layer for the Model Context Protocol
//!
//! One adapter per wire protocol (streamable HTTP, legacy SSE, SSE bridge)
//! plus the metadata endpoints. All adapters feed the same dispatcher.

use axum::http::HeaderMap;

pub mod bridge;
pub mod envelope;
pub mod handlers;
pub mod sse;
pub mod streamable;

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
pub const SESSION_ID_QUERY_PARAM: &str = "sessionId";
pub const MCP_PATH: &str = "/mcp";
pub const MCP_SSE_PATH: &str = "/mcp/sse";

/// Session id from the `Mcp-Session-Id` header, falling back to the
/// `sessionId` query parameter used by legacy SSE clients.
pub fn session_id_from(headers: &HeaderMap, query: &[(String, String)]) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| {
            query
                .iter()
                .find(|(key, value)| key == SESSION_ID_QUERY_PARAM && !value.trim().is_empty())
                .map(|(_, value)| value.trim().to_string())
        })
}
