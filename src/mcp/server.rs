//! The central Model Context Protocol engine
//!
//! A [`Dispatcher`] serves one logical connection. It validates JSON-RPC
//! envelopes, tracks the connection phase, routes methods to the tool and
//! resource handlers, and audits every handled request.

use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, ListResourcesResult, ListToolsResult, ServerCapabilities,
    ServerCapabilitiesResources, ServerCapabilitiesTools,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::{
    request_config::PartialConfig,
    resources::{build_resource_templates, build_resources_list, handle_resources_read},
    tools::{build_tools_list, handle_tools_call},
};
use crate::mcp::rpc::{
    is_json_rpc_error, json_rpc_error, json_rpc_error_with_data, json_rpc_result,
    INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::AppState;

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    Closed,
}

pub struct Dispatcher {
    state: AppState,
    config: PartialConfig,
    phase: Phase,
}

impl Dispatcher {
    pub fn new(state: AppState, config: PartialConfig) -> Self {
        Self {
            state,
            config,
            phase: Phase::Uninitialized,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Handles a single message or a batch. `None` means nothing is owed to
    /// the client (notifications only).
    pub async fn handle_payload(&mut self, payload: Value) -> Option<Value> {
        let Value::Array(batch) = payload else {
            return self.handle_message(payload).await;
        };

        if batch.is_empty() {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        let mut responses = Vec::new();
        for item in batch {
            if let Some(response) = self.handle_message(item).await {
                responses.push(response);
            }
        }

        (!responses.is_empty()).then_some(Value::Array(responses))
    }

    pub async fn handle_message(&mut self, payload: Value) -> Option<Value> {
        let Value::Object(message) = payload else {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        };

        // Absent id marks a notification; an explicit null cannot be correlated.
        let id = match message.get("id") {
            None => None,
            Some(id @ Value::String(_)) => Some(id.clone()),
            Some(id @ Value::Number(number)) if number.is_i64() => Some(id.clone()),
            Some(_) => return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request")),
        };

        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Some(json_rpc_error(id, INVALID_REQUEST, "Invalid Request"));
        }

        let method = match message.get("method").and_then(Value::as_str).map(str::trim) {
            Some(method) if !method.is_empty() => method.to_string(),
            _ => {
                if message.contains_key("result") || message.contains_key("error") {
                    debug!("ignoring client response message");
                    return None;
                }
                return Some(json_rpc_error(id, INVALID_REQUEST, "Invalid Request"));
            }
        };

        let params = match message.get("params") {
            None | Some(Value::Null) => None,
            Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params.clone()),
            Some(_) => return id.map(|id| json_rpc_error(Some(id), INVALID_REQUEST, "Invalid Request")),
        };

        let Some(id) = id else {
            self.handle_notification(&method);
            return None;
        };

        if self.phase == Phase::Closed {
            return Some(json_rpc_error(Some(id), INVALID_REQUEST, "Connection closed"));
        }

        Some(self.handle_request(Some(id), &method, params).await)
    }

    fn handle_notification(&mut self, method: &str) {
        match method {
            "notifications/initialized" if self.phase == Phase::Uninitialized => {
                self.phase = Phase::Initialized;
            }
            _ => {}
        }
        debug!(method, phase = ?self.phase, "notification received");
    }

    pub async fn handle_request(
        &mut self,
        id: Option<Value>,
        method: &str,
        params: Option<Value>,
    ) -> Value {
        let audit_params = redact_audit_params(params.as_ref());

        let response = match method {
            "initialize" => {
                let protocol_version = negotiate_protocol_version(params.as_ref());
                self.phase = Phase::Initialized;
                json_rpc_result(id, initialize_result(protocol_version))
            }
            "ping" => json_rpc_result(id, json!({})),
            "tools/list" => json_rpc_result(
                id,
                serde_json::to_value(ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: build_tools_list(),
                })
                .expect("tools list result serialization"),
            ),
            "tools/call" => handle_tools_call(&self.state, &self.config, id, params).await,
            "resources/list" => json_rpc_result(
                id,
                serde_json::to_value(ListResourcesResult {
                    meta: None,
                    next_cursor: None,
                    resources: build_resources_list(),
                })
                .expect("resources list result serialization"),
            ),
            "resources/templates/list" => json_rpc_result(
                id,
                json!({ "resourceTemplates": build_resource_templates() }),
            ),
            "resources/read" => handle_resources_read(&self.state, &self.config, id, params).await,
            "prompts/list" => json_rpc_result(id, json!({ "prompts": [] })),
            _ => json_rpc_error_with_data(
                id,
                METHOD_NOT_FOUND,
                "Method not found",
                Some(json!({ "method": method })),
            ),
        };

        info!(
            method = %method,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }
}

pub fn initialize_result(protocol_version: &str) -> Value {
    let initialize_result = InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("n8n MCP Server".to_string()),
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: Some(ServerCapabilitiesResources {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            prompts: None,
            ..Default::default()
        },
        protocol_version: protocol_version.to_string(),
        instructions: None,
        meta: None,
    };

    serde_json::to_value(initialize_result).expect("initialize result serialization")
}

/// Echoes the client's protocol version when supported, otherwise answers
/// with the oldest revision every client understands.
pub fn negotiate_protocol_version(params: Option<&Value>) -> &'static str {
    let offered = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim);

    SUPPORTED_PROTOCOL_VERSIONS
        .into_iter()
        .find(|supported| Some(*supported) == offered)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION)
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey" | "x-api-key" | "x-n8n-api-key"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{configured, test_state};

    fn dispatcher() -> Dispatcher {
        let (state, _) = test_state();
        Dispatcher::new(state, configured())
    }

    #[test]
    fn redacts_sensitive_fields_in_audit_params() {
        let params = json!({
            "name": "run_webhook",
            "arguments": {
                "path": "orders",
                "headers": {
                    "Authorization": "should-not-appear",
                    "X-Api-Key": "should-not-appear"
                },
                "data": {
                    "password": "should-not-appear",
                    "nested": { "refresh_token": "should-not-appear" }
                }
            }
        });

        let redacted = redact_audit_params(Some(&params));

        assert_eq!(redacted["name"], json!("run_webhook"));
        assert_eq!(redacted["arguments"]["path"], json!("orders"));
        assert_eq!(
            redacted["arguments"]["headers"]["Authorization"],
            json!("[REDACTED]")
        );
        assert_eq!(redacted["arguments"]["headers"]["X-Api-Key"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["data"]["password"], json!("[REDACTED]"));
        assert_eq!(
            redacted["arguments"]["data"]["nested"]["refresh_token"],
            json!("[REDACTED]")
        );
    }

    #[test]
    fn negotiates_supported_versions_and_falls_back() {
        for version in SUPPORTED_PROTOCOL_VERSIONS {
            let params = json!({ "protocolVersion": version });
            assert_eq!(negotiate_protocol_version(Some(&params)), version);
        }

        let params = json!({ "protocolVersion": "2099-01-01" });
        assert_eq!(negotiate_protocol_version(Some(&params)), DEFAULT_PROTOCOL_VERSION);
        assert_eq!(negotiate_protocol_version(None), DEFAULT_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.phase(), Phase::Uninitialized);

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2025-03-26", "capabilities": {} }
        });
        let first = dispatcher
            .handle_message(request.clone())
            .await
            .expect("initialize response");
        let second = dispatcher
            .handle_message(request)
            .await
            .expect("initialize response");

        assert_eq!(first["result"], second["result"]);
        assert_eq!(first["result"]["protocolVersion"], "2025-03-26");
        assert!(first["result"]["capabilities"]["tools"].is_object());
        assert!(first["result"]["capabilities"]["resources"].is_object());
        assert_eq!(dispatcher.phase(), Phase::Initialized);
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let mut dispatcher = dispatcher();
        let response = dispatcher
            .handle_message(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await;

        assert!(response.is_none());
        assert_eq!(dispatcher.phase(), Phase::Initialized);
    }

    #[tokio::test]
    async fn null_id_is_an_invalid_request() {
        let response = dispatcher()
            .handle_message(json!({ "jsonrpc": "2.0", "id": null, "method": "ping" }))
            .await
            .expect("error response");

        assert_eq!(response["error"]["code"], INVALID_REQUEST);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn response_id_matches_request_id() {
        let mut dispatcher = dispatcher();
        for id in [json!(7), json!("abc")] {
            let response = dispatcher
                .handle_message(json!({ "jsonrpc": "2.0", "id": id, "method": "ping" }))
                .await
                .expect("ping response");
            assert_eq!(response["id"], id);
            assert_eq!(response["result"], json!({}));
        }
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let response = dispatcher()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 3, "method": "sampling/create" }))
            .await
            .expect("error response");

        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(response["error"]["data"]["method"], "sampling/create");
    }

    #[tokio::test]
    async fn prompts_list_is_acknowledged() {
        let response = dispatcher()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 4, "method": "prompts/list" }))
            .await
            .expect("prompts response");

        assert_eq!(response["result"], json!({ "prompts": [] }));
    }

    #[tokio::test]
    async fn batch_answers_requests_in_order_and_skips_notifications() {
        let response = dispatcher()
            .handle_payload(json!([
                { "jsonrpc": "2.0", "id": 1, "method": "ping" },
                { "jsonrpc": "2.0", "method": "notifications/initialized" },
                { "jsonrpc": "2.0", "id": 2, "method": "tools/list" }
            ]))
            .await
            .expect("batch response");

        let responses = response.as_array().expect("array response");
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(
            responses[1]["result"]["tools"].as_array().map(Vec::len),
            Some(11)
        );
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let response = dispatcher()
            .handle_payload(json!([]))
            .await
            .expect("error response");
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn closed_connection_rejects_requests() {
        let mut dispatcher = dispatcher();
        dispatcher.close();

        let response = dispatcher
            .handle_message(json!({ "jsonrpc": "2.0", "id": 5, "method": "ping" }))
            .await
            .expect("error response");
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
        assert_eq!(dispatcher.phase(), Phase::Closed);
    }
}
