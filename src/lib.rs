use std::sync::Arc;

use axum::{
    http::HeaderName,
    middleware,
    routing::{any, get, MethodRouter},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod n8n_client;

#[cfg(test)]
mod test_support;

use config::{Config, N8nDefaults, SseMode, TransportSettings};
use http::bridge::BridgeClient;
use mcp::session::SessionManager;
use n8n_client::ApiConnector;

#[derive(Clone)]
pub struct AppState {
    pub auth_key: Option<Arc<str>>,
    pub defaults: Arc<N8nDefaults>,
    pub sessions: SessionManager,
    pub connector: Arc<dyn ApiConnector>,
    pub transport: Arc<TransportSettings>,
    pub bridge: Option<Arc<BridgeClient>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &Config, connector: Arc<dyn ApiConnector>) -> Result<Self, reqwest::Error> {
        let bridge = match &config.transport.sse_mode {
            SseMode::Bridge(settings) => Some(Arc::new(BridgeClient::new(settings)?)),
            SseMode::Native => None,
        };

        Ok(Self {
            auth_key: config.auth_key.as_deref().map(Arc::<str>::from),
            defaults: Arc::new(config.n8n.clone()),
            sessions: SessionManager::new(),
            connector,
            transport: Arc::new(config.transport.clone()),
            bridge,
            shutdown: CancellationToken::new(),
        })
    }
}

fn sse_routes(state: &AppState) -> MethodRouter<AppState> {
    match state.bridge {
        Some(_) => get(http::bridge::open_stream).post(http::bridge::forward_message),
        None => get(http::sse::open_stream).post(http::sse::post_message),
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(http::MCP_SESSION_ID_HEADER)])
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(http::MCP_PATH, any(http::streamable::mcp_endpoint))
        .route(http::MCP_SSE_PATH, sse_routes(&state))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .layer(cors_layer())
        .with_state(state)
}
