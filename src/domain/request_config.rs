//! Request-scoped n8n configuration
//!
//! Environment defaults are expanded into a nested JSON object first, then every
//! dotted query parameter (`n8n.apiKey=...`) is written on top of it in arrival
//! order. The typed configuration is read out of the merged tree.

use serde_json::{Map, Value};

use crate::{config::N8nDefaults, errors::AppError};

/// Flat `key=value` pairs in the order the transport received them.
pub type RawParams = [(String, String)];

/// Configuration after merging, before required fields are enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialConfig {
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub webhook_username: Option<String>,
    pub webhook_password: Option<String>,
    pub debug: bool,
}

/// Configuration handed to tool handlers and resource readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct N8nConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub webhook_username: Option<String>,
    pub webhook_password: Option<String>,
    pub debug: bool,
}

impl PartialConfig {
    pub fn require(&self) -> Result<N8nConfig, AppError> {
        let missing: Vec<&str> = [
            ("n8n.apiUrl", self.api_base_url.is_none()),
            ("n8n.apiKey", self.api_key.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        match (&self.api_base_url, &self.api_key) {
            (Some(api_base_url), Some(api_key)) => Ok(N8nConfig {
                api_base_url: api_base_url.clone(),
                api_key: api_key.clone(),
                webhook_username: self.webhook_username.clone(),
                webhook_password: self.webhook_password.clone(),
                debug: self.debug,
            }),
            _ => Err(AppError::missing_config(format!(
                "{} must be provided via query parameters or N8N_API_URL/N8N_API_KEY",
                missing.join(" and ")
            ))),
        }
    }
}

/// Merges environment defaults with per-request parameters. Required fields
/// are enforced later by [`PartialConfig::require`], only for methods that
/// reach n8n.
pub fn merge(defaults: &N8nDefaults, raw: &RawParams) -> PartialConfig {
    let mut tree = defaults_tree(defaults);
    for (key, value) in raw {
        insert_dotted(&mut tree, key, Value::String(value.clone()));
    }

    let n8n = tree.get("n8n");
    let field = |nested: &str, flat: &str| {
        n8n.and_then(|section| section.get(nested))
            .or_else(|| tree.get(flat))
            .and_then(value_as_string)
    };

    PartialConfig {
        api_base_url: field("apiUrl", "n8nApiUrl"),
        api_key: field("apiKey", "n8nApiKey"),
        webhook_username: field("webhookUsername", "n8nWebhookUsername"),
        webhook_password: field("webhookPassword", "n8nWebhookPassword"),
        debug: tree.get("debug").is_some_and(value_as_flag),
    }
}

/// Writes `value` at the dotted `key`. A non-object found on the way is
/// replaced by an empty object; the last write wins.
pub fn insert_dotted(tree: &mut Value, key: &str, value: Value) {
    let mut segments: Vec<&str> = key.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = tree;
    for segment in segments {
        current = ensure_object(current)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current).insert(leaf.to_string(), value);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

fn defaults_tree(defaults: &N8nDefaults) -> Value {
    let mut n8n = Map::new();
    let entries = [
        ("apiUrl", &defaults.api_url),
        ("apiKey", &defaults.api_key),
        ("webhookUsername", &defaults.webhook_username),
        ("webhookPassword", &defaults.webhook_password),
    ];
    for (key, value) in entries {
        if let Some(value) = value {
            n8n.insert(key.to_string(), Value::String(value.clone()));
        }
    }

    let mut root = Map::new();
    root.insert("n8n".to_string(), Value::Object(n8n));
    root.insert("debug".to_string(), Value::Bool(defaults.debug));
    Value::Object(root)
}

fn value_as_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn value_as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
