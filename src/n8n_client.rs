use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::{domain::request_config::N8nConfig, errors::AppError};

const API_KEY_HEADER: &str = "X-N8N-API-KEY";
const API_PATH_SUFFIX: &str = "/api/v1";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionQuery {
    pub workflow_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
}

/// Operations the tool handlers and resource readers need from n8n.
#[async_trait]
pub trait N8nApi: Send + Sync {
    async fn list_workflows(&self, active: Option<bool>) -> Result<Value, AppError>;
    async fn get_workflow(&self, id: &str) -> Result<Value, AppError>;
    async fn create_workflow(&self, workflow: Value) -> Result<Value, AppError>;
    async fn update_workflow(&self, id: &str, workflow: Value) -> Result<Value, AppError>;
    async fn delete_workflow(&self, id: &str) -> Result<Value, AppError>;
    async fn activate_workflow(&self, id: &str) -> Result<Value, AppError>;
    async fn deactivate_workflow(&self, id: &str) -> Result<Value, AppError>;
    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Value, AppError>;
    async fn get_execution(&self, id: &str) -> Result<Value, AppError>;
    async fn delete_execution(&self, id: &str) -> Result<Value, AppError>;
    async fn run_webhook(
        &self,
        path: &str,
        data: Value,
        headers: &[(String, String)],
    ) -> Result<Value, AppError>;
}

/// Builds an API client bound to one request's configuration.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, config: &N8nConfig) -> Result<Arc<dyn N8nApi>, AppError>;
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: Client,
}

impl HttpConnector {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http })
    }
}

impl ApiConnector for HttpConnector {
    fn connect(&self, config: &N8nConfig) -> Result<Arc<dyn N8nApi>, AppError> {
        Ok(Arc::new(N8nClient::new(self.http.clone(), config)?))
    }
}

#[derive(Debug, Clone)]
pub struct N8nClient {
    http: Client,
    base_url: String,
    api_key: String,
    webhook_auth: Option<(String, String)>,
}

impl N8nClient {
    pub fn new(http: Client, config: &N8nConfig) -> Result<Self, AppError> {
        let base_url = config.api_base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AppError::invalid_params(
                "invalid_api_url",
                "n8n apiUrl must be an absolute http(s) URL",
            ));
        }

        let webhook_auth = match (&config.webhook_username, &config.webhook_password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            webhook_auth,
        })
    }

    fn api(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "n8n api request");
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
    }

    /// `https://host/api/v1` -> `https://host/webhook/<path>`
    pub fn webhook_url(&self, path: &str) -> String {
        let root = self
            .base_url
            .strip_suffix(API_PATH_SUFFIX)
            .unwrap_or(&self.base_url);
        format!("{}/webhook/{}", root, path.trim_start_matches('/'))
    }
}

async fn send(request: RequestBuilder) -> Result<Value, AppError> {
    let response = request
        .send()
        .await
        .map_err(|err| AppError::upstream(None, format!("failed to reach n8n: {err}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| AppError::upstream(Some(status.as_u16()), format!("failed to read n8n response: {err}")))?;

    if !status.is_success() {
        return Err(AppError::upstream(
            Some(status.as_u16()),
            upstream_message(status.as_u16(), &body),
        ));
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}

/// n8n reports failures as `{"message": "..."}`; fall back to the raw body.
pub fn upstream_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    if detail.is_empty() {
        format!("n8n responded with status {status}")
    } else {
        format!("n8n responded with status {status}: {detail}")
    }
}

#[async_trait]
impl N8nApi for N8nClient {
    async fn list_workflows(&self, active: Option<bool>) -> Result<Value, AppError> {
        let mut request = self.api(reqwest::Method::GET, "/workflows");
        if let Some(active) = active {
            request = request.query(&[("active", active.to_string())]);
        }
        send(request).await
    }

    async fn get_workflow(&self, id: &str) -> Result<Value, AppError> {
        send(self.api(reqwest::Method::GET, &format!("/workflows/{id}"))).await
    }

    async fn create_workflow(&self, workflow: Value) -> Result<Value, AppError> {
        send(self.api(reqwest::Method::POST, "/workflows").json(&workflow)).await
    }

    async fn update_workflow(&self, id: &str, workflow: Value) -> Result<Value, AppError> {
        send(
            self.api(reqwest::Method::PUT, &format!("/workflows/{id}"))
                .json(&workflow),
        )
        .await
    }

    async fn delete_workflow(&self, id: &str) -> Result<Value, AppError> {
        send(self.api(reqwest::Method::DELETE, &format!("/workflows/{id}"))).await
    }

    async fn activate_workflow(&self, id: &str) -> Result<Value, AppError> {
        send(self.api(reqwest::Method::POST, &format!("/workflows/{id}/activate"))).await
    }

    async fn deactivate_workflow(&self, id: &str) -> Result<Value, AppError> {
        send(self.api(reqwest::Method::POST, &format!("/workflows/{id}/deactivate"))).await
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Value, AppError> {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(workflow_id) = &query.workflow_id {
            pairs.push(("workflowId", workflow_id.clone()));
        }
        if let Some(status) = &query.status {
            pairs.push(("status", status.clone()));
        }
        if let Some(limit) = query.limit {
            pairs.push(("limit", limit.to_string()));
        }
        send(self.api(reqwest::Method::GET, "/executions").query(&pairs)).await
    }

    async fn get_execution(&self, id: &str) -> Result<Value, AppError> {
        send(self.api(reqwest::Method::GET, &format!("/executions/{id}"))).await
    }

    async fn delete_execution(&self, id: &str) -> Result<Value, AppError> {
        send(self.api(reqwest::Method::DELETE, &format!("/executions/{id}"))).await
    }

    async fn run_webhook(
        &self,
        path: &str,
        data: Value,
        headers: &[(String, String)],
    ) -> Result<Value, AppError> {
        let url = self.webhook_url(path);
        debug!(url = %url, "n8n webhook request");
        let mut request = self.http.post(url).json(&data);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some((username, password)) = &self.webhook_auth {
            request = request.basic_auth(username, Some(password));
        }
        send(request).await
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{ApiConnector, ExecutionQuery, N8nApi};
    use crate::{domain::request_config::N8nConfig, errors::AppError};

    /// In-memory n8n double. Workflow id `missing` fails like a 404 and
    /// id `explode` panics inside the handler.
    #[derive(Default)]
    pub struct MockApi {
        pub calls: AtomicUsize,
    }

    impl MockApi {
        fn record(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn workflow(id: &str) -> Result<Value, AppError> {
            match id {
                "missing" => Err(AppError::upstream(
                    Some(404),
                    "n8n responded with status 404: Workflow not found",
                )),
                "explode" => panic!("handler blew up"),
                _ => Ok(json!({ "id": id, "name": format!("Workflow {id}"), "active": false })),
            }
        }
    }

    #[async_trait]
    impl N8nApi for MockApi {
        async fn list_workflows(&self, active: Option<bool>) -> Result<Value, AppError> {
            self.record();
            let workflows = vec![
                json!({ "id": "1", "name": "Daily report", "active": true }),
                json!({ "id": "2", "name": "Lead sync", "active": false }),
            ];
            let data: Vec<Value> = workflows
                .into_iter()
                .filter(|workflow| active.map_or(true, |flag| workflow["active"] == flag))
                .collect();
            Ok(json!({ "data": data, "nextCursor": null }))
        }

        async fn get_workflow(&self, id: &str) -> Result<Value, AppError> {
            self.record();
            Self::workflow(id)
        }

        async fn create_workflow(&self, workflow: Value) -> Result<Value, AppError> {
            self.record();
            let mut created = workflow;
            created["id"] = json!("new-1");
            Ok(created)
        }

        async fn update_workflow(&self, id: &str, workflow: Value) -> Result<Value, AppError> {
            self.record();
            let mut updated = workflow;
            updated["id"] = json!(id);
            Ok(updated)
        }

        async fn delete_workflow(&self, id: &str) -> Result<Value, AppError> {
            self.record();
            Self::workflow(id)
        }

        async fn activate_workflow(&self, id: &str) -> Result<Value, AppError> {
            self.record();
            Ok(json!({ "id": id, "active": true }))
        }

        async fn deactivate_workflow(&self, id: &str) -> Result<Value, AppError> {
            self.record();
            Ok(json!({ "id": id, "active": false }))
        }

        async fn list_executions(&self, query: &ExecutionQuery) -> Result<Value, AppError> {
            self.record();
            Ok(json!({
                "data": [
                    { "id": "100", "workflowId": query.workflow_id.clone().unwrap_or_else(|| "1".to_string()), "status": "success", "finished": true },
                    { "id": "101", "workflowId": "1", "status": "error", "finished": true },
                    { "id": "102", "workflowId": "2", "status": "running", "finished": false }
                ],
                "nextCursor": null
            }))
        }

        async fn get_execution(&self, id: &str) -> Result<Value, AppError> {
            self.record();
            Ok(json!({ "id": id, "status": "success", "finished": true }))
        }

        async fn delete_execution(&self, id: &str) -> Result<Value, AppError> {
            self.record();
            Ok(json!({ "id": id }))
        }

        async fn run_webhook(
            &self,
            path: &str,
            data: Value,
            _headers: &[(String, String)],
        ) -> Result<Value, AppError> {
            self.record();
            Ok(json!({ "path": path, "received": data }))
        }
    }

    #[derive(Default)]
    pub struct MockConnector {
        pub api: Arc<MockApi>,
        pub connects: AtomicUsize,
    }

    impl MockConnector {
        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn api_calls(&self) -> usize {
            self.api.calls.load(Ordering::SeqCst)
        }
    }

    impl ApiConnector for MockConnector {
        fn connect(&self, _config: &N8nConfig) -> Result<Arc<dyn N8nApi>, AppError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.api.clone())
        }
    }
}
