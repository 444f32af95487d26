//! Tool registry and handlers exposed via Model Context Protocol
//!
//! The catalogue is a closed enum: discovery metadata, argument schemas and
//! handler dispatch are all derived from [`ToolKind`], so `tools/list` and
//! `tools/call` cannot drift apart. Arguments are checked against the same
//! schema that `tools/list` publishes before any handler runs.

use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use rust_mcp_sdk::schema::{CallToolRequestParams, CallToolResult, ContentBlock, TextContent, Tool};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::domain::request_config::PartialConfig;
use crate::mcp::rpc::{
    app_error_to_json_rpc, internal_error, json_rpc_error, json_rpc_error_with_data,
    json_rpc_result, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::n8n_client::{ExecutionQuery, N8nApi};
use crate::{errors::AppError, AppState};

/// Some clients send `prompts/list` through `tools/call`; it is acknowledged.
pub const PROMPTS_LIST_SHIM: &str = "prompts/list";
pub const MAX_EXECUTIONS_LIMIT: f64 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ListWorkflows,
    GetWorkflow,
    CreateWorkflow,
    UpdateWorkflow,
    DeleteWorkflow,
    ActivateWorkflow,
    DeactivateWorkflow,
    ListExecutions,
    GetExecution,
    DeleteExecution,
    RunWebhook,
}

impl ToolKind {
    pub const ALL: [ToolKind; 11] = [
        ToolKind::ListWorkflows,
        ToolKind::GetWorkflow,
        ToolKind::CreateWorkflow,
        ToolKind::UpdateWorkflow,
        ToolKind::DeleteWorkflow,
        ToolKind::ActivateWorkflow,
        ToolKind::DeactivateWorkflow,
        ToolKind::ListExecutions,
        ToolKind::GetExecution,
        ToolKind::DeleteExecution,
        ToolKind::RunWebhook,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ListWorkflows => "list_workflows",
            Self::GetWorkflow => "get_workflow",
            Self::CreateWorkflow => "create_workflow",
            Self::UpdateWorkflow => "update_workflow",
            Self::DeleteWorkflow => "delete_workflow",
            Self::ActivateWorkflow => "activate_workflow",
            Self::DeactivateWorkflow => "deactivate_workflow",
            Self::ListExecutions => "list_executions",
            Self::GetExecution => "get_execution",
            Self::DeleteExecution => "delete_execution",
            Self::RunWebhook => "run_webhook",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ListWorkflows => "List all workflows, optionally filtered by active state",
            Self::GetWorkflow => "Get workflow details by ID",
            Self::CreateWorkflow => "Create a new workflow",
            Self::UpdateWorkflow => "Update an existing workflow",
            Self::DeleteWorkflow => "Delete a workflow by ID",
            Self::ActivateWorkflow => "Activate a workflow by ID",
            Self::DeactivateWorkflow => "Deactivate a workflow by ID",
            Self::ListExecutions => "List workflow executions",
            Self::GetExecution => "Get execution details by ID",
            Self::DeleteExecution => "Delete an execution by ID",
            Self::RunWebhook => "Execute a workflow via its webhook path",
        }
    }

    pub fn input_schema(self) -> Value {
        let id_only = |what: &str| {
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": format!("ID of the {what}") }
                },
                "required": ["id"]
            })
        };

        match self {
            Self::ListWorkflows => json!({
                "type": "object",
                "properties": {
                    "active": { "type": "boolean", "description": "Only return workflows with this active state" }
                },
                "required": []
            }),
            Self::GetWorkflow
            | Self::DeleteWorkflow
            | Self::ActivateWorkflow
            | Self::DeactivateWorkflow => id_only("workflow"),
            Self::CreateWorkflow => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Name of the workflow" },
                    "active": { "type": "boolean", "description": "Activate the workflow after creating it" },
                    "nodes": { "type": "array", "description": "Workflow nodes" },
                    "connections": { "type": "object", "description": "Connections between nodes" },
                    "settings": { "type": "object", "description": "Workflow settings" }
                },
                "required": ["name"]
            }),
            Self::UpdateWorkflow => json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "ID of the workflow" },
                    "workflow": { "type": "object", "description": "Full workflow definition to store" }
                },
                "required": ["id", "workflow"]
            }),
            Self::ListExecutions => json!({
                "type": "object",
                "properties": {
                    "workflowId": { "type": "string", "description": "Only executions of this workflow" },
                    "status": { "type": "string", "description": "Filter by status: success, error, waiting" },
                    "limit": { "type": "number", "description": "Maximum number of executions (1-250)" }
                },
                "required": []
            }),
            Self::GetExecution | Self::DeleteExecution => id_only("execution"),
            Self::RunWebhook => json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Webhook path after /webhook/" },
                    "data": { "type": "object", "description": "JSON payload sent to the webhook" },
                    "headers": { "type": "object", "description": "Extra HTTP headers for the webhook call" }
                },
                "required": ["path"]
            }),
        }
    }

    pub fn metadata(self) -> Tool {
        serde_json::from_value(json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
        }))
        .expect("static tool metadata deserialization")
    }

    pub fn bind(self, api: Arc<dyn N8nApi>) -> BoundTool {
        BoundTool { kind: self, api }
    }
}

pub fn build_tools_list() -> Vec<Tool> {
    ToolKind::ALL.into_iter().map(ToolKind::metadata).collect()
}

/// The uniform handler contract: arguments in, `{content, isError}` out.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: Map<String, Value>) -> Result<CallToolResult, AppError>;
}

pub struct BoundTool {
    kind: ToolKind,
    api: Arc<dyn N8nApi>,
}

#[derive(Debug, Deserialize)]
struct ListWorkflowsArgs {
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreateWorkflowArgs {
    name: String,
    active: Option<bool>,
    nodes: Option<Vec<Value>>,
    connections: Option<Value>,
    settings: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UpdateWorkflowArgs {
    id: String,
    workflow: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListExecutionsArgs {
    workflow_id: Option<String>,
    status: Option<String>,
    limit: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RunWebhookArgs {
    path: String,
    data: Option<Value>,
    headers: Option<Map<String, Value>>,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("identifier regex"))
}

fn webhook_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^/?[A-Za-z0-9_-]+(/[A-Za-z0-9_:.-]+)*$").expect("webhook path regex"))
}

/// Ids are interpolated into n8n REST paths and must stay a single segment.
pub(crate) fn check_identifier(field: &str, value: &str) -> Result<(), AppError> {
    if identifier_pattern().is_match(value) {
        Ok(())
    } else {
        Err(AppError::invalid_params(
            "invalid_identifier",
            format!("argument `{field}` must contain only letters, digits, '-' or '_'"),
        ))
    }
}

fn check_webhook_path(path: &str) -> Result<(), AppError> {
    if webhook_path_pattern().is_match(path) && !path.split('/').any(|segment| segment == "..") {
        Ok(())
    } else {
        Err(AppError::invalid_params(
            "invalid_webhook_path",
            "argument `path` must be a relative webhook path",
        ))
    }
}

fn parse_id(args: Map<String, Value>) -> Result<String, AppError> {
    let args: IdArgs = parse_args(args)?;
    check_identifier("id", &args.id)?;
    Ok(args.id)
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Map<String, Value>) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(args))
        .map_err(|err| AppError::invalid_params("invalid_arguments", err.to_string()))
}

#[async_trait]
impl ToolHandler for BoundTool {
    async fn execute(&self, args: Map<String, Value>) -> Result<CallToolResult, AppError> {
        let api = self.api.as_ref();
        let output = match self.kind {
            ToolKind::ListWorkflows => {
                let args: ListWorkflowsArgs = parse_args(args)?;
                let response = api.list_workflows(args.active).await?;
                let workflows: Vec<Value> = list_data(&response)
                    .iter()
                    .map(|workflow| {
                        json!({
                            "id": workflow.get("id"),
                            "name": workflow.get("name"),
                            "active": workflow.get("active"),
                            "createdAt": workflow.get("createdAt"),
                            "updatedAt": workflow.get("updatedAt"),
                        })
                    })
                    .collect();
                json!({ "count": workflows.len(), "workflows": workflows })
            }
            ToolKind::GetWorkflow => {
                let id = parse_id(args)?;
                api.get_workflow(&id).await?
            }
            ToolKind::CreateWorkflow => {
                let args: CreateWorkflowArgs = parse_args(args)?;
                let created = api
                    .create_workflow(json!({
                        "name": args.name,
                        "nodes": args.nodes.unwrap_or_default(),
                        "connections": args.connections.unwrap_or_else(|| json!({})),
                        "settings": args.settings.unwrap_or_else(|| json!({})),
                    }))
                    .await?;

                let created_id = created.get("id").and_then(Value::as_str).map(str::to_string);
                match (args.active, created_id) {
                    (Some(true), Some(id)) => api.activate_workflow(&id).await?,
                    _ => created,
                }
            }
            ToolKind::UpdateWorkflow => {
                let args: UpdateWorkflowArgs = parse_args(args)?;
                check_identifier("id", &args.id)?;
                api.update_workflow(&args.id, args.workflow).await?
            }
            ToolKind::DeleteWorkflow => {
                let id = parse_id(args)?;
                api.delete_workflow(&id).await?;
                json!({ "success": true, "message": format!("Workflow {id} deleted") })
            }
            ToolKind::ActivateWorkflow => {
                let id = parse_id(args)?;
                api.activate_workflow(&id).await?
            }
            ToolKind::DeactivateWorkflow => {
                let id = parse_id(args)?;
                api.deactivate_workflow(&id).await?
            }
            ToolKind::ListExecutions => {
                let args: ListExecutionsArgs = parse_args(args)?;
                if let Some(workflow_id) = &args.workflow_id {
                    check_identifier("workflowId", workflow_id)?;
                }
                let query = ExecutionQuery {
                    workflow_id: args.workflow_id,
                    status: args.status,
                    limit: args
                        .limit
                        .map(|limit| limit.clamp(1.0, MAX_EXECUTIONS_LIMIT) as u64),
                };
                let response = api.list_executions(&query).await?;
                let executions = list_data(&response);
                json!({ "count": executions.len(), "executions": executions })
            }
            ToolKind::GetExecution => {
                let id = parse_id(args)?;
                api.get_execution(&id).await?
            }
            ToolKind::DeleteExecution => {
                let id = parse_id(args)?;
                api.delete_execution(&id).await?;
                json!({ "success": true, "message": format!("Execution {id} deleted") })
            }
            ToolKind::RunWebhook => {
                let args: RunWebhookArgs = parse_args(args)?;
                check_webhook_path(&args.path)?;
                let headers: Vec<(String, String)> = args
                    .headers
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(name, value)| match value {
                        Value::String(text) => Some((name, text)),
                        Value::Null => None,
                        other => Some((name, other.to_string())),
                    })
                    .collect();
                api.run_webhook(&args.path, args.data.unwrap_or_else(|| json!({})), &headers)
                    .await?
            }
        };

        Ok(text_result(pretty(&output), false))
    }
}

/// n8n list endpoints wrap rows as `{"data": [...]}`; older versions return the array.
fn list_data(response: &Value) -> Vec<Value> {
    response
        .get("data")
        .unwrap_or(response)
        .as_array()
        .cloned()
        .unwrap_or_default()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn text_result(text: impl Into<String>, is_error: bool) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text.into(), None, None))],
        is_error: Some(is_error),
        meta: None,
        structured_content: None,
    }
}

/// Checks `args` against a tool's published input schema: required keys must
/// be present and declared primitive types must match.
pub fn validate_arguments(schema: &Value, args: &Map<String, Value>) -> Result<(), AppError> {
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);

    for field in required {
        match args.get(field) {
            None | Some(Value::Null) => {
                return Err(AppError::invalid_params(
                    "missing_argument",
                    format!("argument `{field}` is required"),
                ))
            }
            Some(Value::String(text)) if text.trim().is_empty() => {
                return Err(AppError::invalid_params(
                    "missing_argument",
                    format!("argument `{field}` must not be empty"),
                ))
            }
            Some(_) => {}
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (field, value) in args {
        if value.is_null() {
            continue;
        }
        let Some(expected) = properties
            .get(field)
            .and_then(|property| property.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let matches = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };

        if !matches {
            return Err(AppError::invalid_params(
                "invalid_argument_type",
                format!("argument `{field}` must be of type {expected}"),
            ));
        }
    }

    Ok(())
}

pub async fn handle_tools_call(
    state: &AppState,
    config: &PartialConfig,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
    };

    let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, INVALID_PARAMS, "Invalid params"),
    };

    if tool_call.name == PROMPTS_LIST_SHIM {
        return json_rpc_result(
            id,
            serde_json::to_value(text_result("Prompts list acknowledged.", false))
                .expect("prompts shim result serialization"),
        );
    }

    let Some(kind) = ToolKind::from_name(&tool_call.name) else {
        return json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({
                "code": "tool_not_found",
                "message": "unknown tool name",
                "details": {
                    "name": tool_call.name,
                },
            })),
        );
    };

    let n8n_config = match config.require() {
        Ok(value) => value,
        Err(err) => return app_error_to_json_rpc(id, err),
    };

    let args = tool_call.arguments.unwrap_or_default();
    if let Err(err) = validate_arguments(&kind.input_schema(), &args) {
        return app_error_to_json_rpc(id, err);
    }

    let api = match state.connector.connect(&n8n_config) {
        Ok(api) => api,
        Err(err) => return app_error_to_json_rpc(id, err),
    };

    let handler = kind.bind(api);
    let outcome = AssertUnwindSafe(handler.execute(args)).catch_unwind().await;

    match outcome {
        Ok(Ok(result)) => json_rpc_result(
            id,
            serde_json::to_value(result).expect("tool result serialization"),
        ),
        Ok(Err(AppError::Upstream { status, message })) => {
            warn!(tool = kind.name(), upstream_status = ?status, error = %message, "tool call failed upstream");
            json_rpc_result(
                id,
                serde_json::to_value(text_result(format!("Error: {message}"), true))
                    .expect("tool error result serialization"),
            )
        }
        Ok(Err(err @ (AppError::InvalidParams { .. } | AppError::MissingConfig { .. }))) => {
            app_error_to_json_rpc(id, err)
        }
        Ok(Err(err)) => {
            error!(tool = kind.name(), error = %err, "tool call failed");
            internal_error(id, kind.name(), &err.to_string(), n8n_config.debug)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(tool = kind.name(), error = %message, "tool handler panicked");
            internal_error(id, kind.name(), &message, n8n_config.debug)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::n8n_client::mock::MockApi;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    #[test]
    fn catalogue_has_eleven_unique_tools() {
        let tools = build_tools_list();
        assert_eq!(tools.len(), 11);

        let names: Vec<&str> = ToolKind::ALL.iter().map(|kind| kind.name()).collect();
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
            assert_eq!(names.iter().filter(|name| **name == kind.name()).count(), 1);
        }
        assert_eq!(ToolKind::from_name("drop_database"), None);
    }

    #[test]
    fn published_schema_matches_validation_schema() {
        for kind in ToolKind::ALL {
            let published = serde_json::to_value(kind.metadata()).expect("tool serialization");
            assert_eq!(published["name"], kind.name());
            assert_eq!(
                published["inputSchema"]["required"],
                kind.input_schema()["required"]
            );
        }
    }

    #[test]
    fn run_webhook_requires_path() {
        let err = validate_arguments(
            &ToolKind::RunWebhook.input_schema(),
            &args(json!({ "data": {} })),
        )
        .expect_err("path is required");
        assert!(err.to_string().contains("`path`"));
    }

    #[test]
    fn ids_must_be_strings() {
        let err = validate_arguments(
            &ToolKind::GetWorkflow.input_schema(),
            &args(json!({ "id": 42 })),
        )
        .expect_err("numeric id must fail");
        assert!(matches!(
            err,
            AppError::InvalidParams {
                code: "invalid_argument_type",
                ..
            }
        ));
    }

    #[test]
    fn unknown_arguments_are_tolerated() {
        validate_arguments(
            &ToolKind::ListWorkflows.input_schema(),
            &args(json!({ "active": true, "extra": "ignored" })),
        )
        .expect("extra args are allowed");
    }

    #[test]
    fn identifiers_stay_single_path_segments() {
        check_identifier("id", "aB3_x-9").expect("plain id is valid");
        assert!(check_identifier("id", "../credentials").is_err());
        assert!(check_identifier("id", "1?active=true").is_err());

        check_webhook_path("orders/new").expect("nested path is valid");
        check_webhook_path("/orders").expect("leading slash is tolerated");
        assert!(check_webhook_path("orders/../../api/v1/workflows").is_err());
        assert!(check_webhook_path("https://evil.example.com").is_err());
    }

    #[tokio::test]
    async fn list_workflows_filters_and_summarizes() {
        let api = Arc::new(MockApi::default());
        let result = ToolKind::ListWorkflows
            .bind(api.clone())
            .execute(args(json!({ "active": true })))
            .await
            .expect("list should succeed");

        let value = serde_json::to_value(result).expect("serialize");
        let text = value["content"][0]["text"].as_str().expect("text content");
        let parsed: Value = serde_json::from_str(text).expect("json text");
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["workflows"][0]["name"], "Daily report");
        assert_eq!(value["isError"], false);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn create_workflow_activates_when_requested() {
        let api = Arc::new(MockApi::default());
        let result = ToolKind::CreateWorkflow
            .bind(api.clone())
            .execute(args(json!({ "name": "New flow", "active": true })))
            .await
            .expect("create should succeed");

        let value = serde_json::to_value(result).expect("serialize");
        let parsed: Value =
            serde_json::from_str(value["content"][0]["text"].as_str().expect("text"))
                .expect("json text");
        assert_eq!(parsed["id"], "new-1");
        assert_eq!(parsed["active"], true);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upstream_failure_is_returned_as_error() {
        let api = Arc::new(MockApi::default());
        let err = ToolKind::GetWorkflow
            .bind(api)
            .execute(args(json!({ "id": "missing" })))
            .await
            .expect_err("missing workflow must fail");
        assert!(matches!(err, AppError::Upstream { status: Some(404), .. }));
    }
}
