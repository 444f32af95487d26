//! Model Context Protocol resources backed by the n8n API
//!
//! Two static resources summarize the instance; two URI templates address a
//! single workflow or execution by id.

use rust_mcp_sdk::schema::{
    ReadResourceContent, ReadResourceRequestParams, ReadResourceResult, Resource,
    TextResourceContents,
};
use serde_json::{json, Value};

use crate::domain::{request_config::PartialConfig, tools::check_identifier};
use crate::mcp::rpc::{
    app_error_to_json_rpc, json_rpc_error, json_rpc_error_with_data, json_rpc_result,
    INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::n8n_client::{ExecutionQuery, N8nApi};
use crate::{errors::AppError, AppState};

pub const WORKFLOWS_RESOURCE_URI: &str = "n8n://workflows/list";
pub const EXECUTION_STATS_RESOURCE_URI: &str = "n8n://execution-stats";
pub const WORKFLOW_URI_PREFIX: &str = "n8n://workflow/";
pub const EXECUTION_URI_PREFIX: &str = "n8n://execution/";
pub const STATS_SAMPLE_SIZE: u64 = 100;

const JSON_MIME_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    WorkflowList,
    ExecutionStats,
    Workflow(String),
    Execution(String),
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Option<Self> {
        match uri {
            WORKFLOWS_RESOURCE_URI => Some(Self::WorkflowList),
            EXECUTION_STATS_RESOURCE_URI => Some(Self::ExecutionStats),
            _ => {
                if let Some(id) = uri.strip_prefix(WORKFLOW_URI_PREFIX) {
                    non_empty_id(id).map(Self::Workflow)
                } else if let Some(id) = uri.strip_prefix(EXECUTION_URI_PREFIX) {
                    non_empty_id(id).map(Self::Execution)
                } else {
                    None
                }
            }
        }
    }

    /// Templated ids end up in n8n REST paths, so they follow the same rule
    /// as tool ids.
    pub fn check(&self) -> Result<(), AppError> {
        match self {
            Self::WorkflowList | Self::ExecutionStats => Ok(()),
            Self::Workflow(id) | Self::Execution(id) => check_identifier("uri", id),
        }
    }

    pub async fn read(&self, api: &dyn N8nApi) -> Result<Value, AppError> {
        match self {
            Self::WorkflowList => {
                let response = api.list_workflows(None).await?;
                let workflows: Vec<Value> = rows(&response)
                    .iter()
                    .map(|workflow| {
                        json!({
                            "id": workflow.get("id"),
                            "name": workflow.get("name"),
                            "active": workflow.get("active"),
                            "updatedAt": workflow.get("updatedAt"),
                        })
                    })
                    .collect();
                Ok(json!({ "workflows": workflows }))
            }
            Self::ExecutionStats => {
                let query = ExecutionQuery {
                    limit: Some(STATS_SAMPLE_SIZE),
                    ..ExecutionQuery::default()
                };
                let response = api.list_executions(&query).await?;
                Ok(execution_stats(&rows(&response)))
            }
            Self::Workflow(id) => api.get_workflow(id).await,
            Self::Execution(id) => api.get_execution(id).await,
        }
    }
}

fn non_empty_id(id: &str) -> Option<String> {
    let id = id.trim_end_matches('/');
    (!id.is_empty() && !id.contains('/')).then(|| id.to_string())
}

fn rows(response: &Value) -> Vec<Value> {
    response
        .get("data")
        .unwrap_or(response)
        .as_array()
        .cloned()
        .unwrap_or_default()
}

pub fn execution_stats(executions: &[Value]) -> Value {
    let count = |status: &str| {
        executions
            .iter()
            .filter(|execution| execution.get("status").and_then(Value::as_str) == Some(status))
            .count()
    };

    let total = executions.len();
    let succeeded = count("success");
    let failed = count("error") + count("crashed");
    let success_rate = if total == 0 {
        "0%".to_string()
    } else {
        format!("{}%", (succeeded * 100 + total / 2) / total)
    };

    json!({
        "total": total,
        "succeeded": succeeded,
        "failed": failed,
        "other": total - succeeded - failed,
        "successRate": success_rate,
        "sampleSize": STATS_SAMPLE_SIZE,
    })
}

pub fn build_resources_list() -> Vec<Resource> {
    vec![
        Resource {
            annotations: None,
            description: Some("List of all workflows in the n8n instance".to_string()),
            icons: vec![],
            meta: None,
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            name: "Workflows".to_string(),
            size: None,
            title: None,
            uri: WORKFLOWS_RESOURCE_URI.to_string(),
        },
        Resource {
            annotations: None,
            description: Some("Summary statistics of recent workflow executions".to_string()),
            icons: vec![],
            meta: None,
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            name: "Execution Statistics".to_string(),
            size: None,
            title: None,
            uri: EXECUTION_STATS_RESOURCE_URI.to_string(),
        },
    ]
}

pub fn build_resource_templates() -> Value {
    json!([
        {
            "uriTemplate": format!("{}{{id}}", WORKFLOW_URI_PREFIX),
            "name": "Workflow Details",
            "description": "Details of a specific n8n workflow",
            "mimeType": JSON_MIME_TYPE,
        },
        {
            "uriTemplate": format!("{}{{id}}", EXECUTION_URI_PREFIX),
            "name": "Execution Details",
            "description": "Details of a specific workflow execution",
            "mimeType": JSON_MIME_TYPE,
        }
    ])
}

pub async fn handle_resources_read(
    state: &AppState,
    config: &PartialConfig,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
    };

    let resource_read: ReadResourceRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, INVALID_PARAMS, "Invalid params"),
    };

    let Some(resource) = ResourceUri::parse(&resource_read.uri) else {
        return json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({
                "code": "resource_not_found",
                "message": "unknown resource uri",
                "details": {
                    "uri": resource_read.uri,
                },
            })),
        );
    };

    if let Err(err) = resource.check() {
        return app_error_to_json_rpc(id, err);
    }

    let n8n_config = match config.require() {
        Ok(value) => value,
        Err(err) => return app_error_to_json_rpc(id, err),
    };

    let api = match state.connector.connect(&n8n_config) {
        Ok(api) => api,
        Err(err) => return app_error_to_json_rpc(id, err),
    };

    match resource.read(api.as_ref()).await {
        Ok(content) => {
            let result = serde_json::to_value(ReadResourceResult {
                contents: vec![ReadResourceContent::from(TextResourceContents {
                    meta: None,
                    mime_type: Some(JSON_MIME_TYPE.to_string()),
                    text: serde_json::to_string_pretty(&content)
                        .unwrap_or_else(|_| content.to_string()),
                    uri: resource_read.uri,
                })],
                meta: None,
            })
            .expect("read resource result serialization");

            json_rpc_result(id, result)
        }
        Err(err) => app_error_to_json_rpc(id, err),
    }
}
