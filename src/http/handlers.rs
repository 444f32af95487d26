//! Axum handlers for the metadata endpoints
//!
//! `/health` and `/` stay public and never touch n8n.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::{MCP_PATH, MCP_SSE_PATH};
use crate::AppState;

pub const SERVICE_NAME: &str = "n8n-mcp-server";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub mcp: &'static str,
    pub sse: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub sse_mode: &'static str,
    pub endpoints: Endpoints,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
    })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: "Model Context Protocol server for n8n workflow automation",
        sse_mode: if state.bridge.is_some() { "bridge" } else { "native" },
        endpoints: Endpoints {
            health: "/health",
            mcp: MCP_PATH,
            sse: MCP_SSE_PATH,
        },
    })
}
