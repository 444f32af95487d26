use std::{env, net::SocketAddr, time::Duration};

use reqwest::Url;
use thiserror::Error;

pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_SSE_KEEPALIVE_SECS: u64 = 30;
pub const DEFAULT_SSE_MAX_LIFETIME_SECS: u64 = 5 * 60;

/// n8n connection defaults taken from the process environment.
///
/// Per-request query parameters are layered on top of these by
/// [`crate::domain::request_config::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct N8nDefaults {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub webhook_username: Option<String>,
    pub webhook_password: Option<String>,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub target_url: Url,
    pub api_key: Option<String>,
}

/// Which adapter answers on `/mcp/sse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseMode {
    Native,
    Bridge(BridgeSettings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub session_ttl: Duration,
    pub sse_keepalive: Duration,
    pub sse_max_lifetime: Duration,
    pub sse_mode: SseMode,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            sse_keepalive: Duration::from_secs(DEFAULT_SSE_KEEPALIVE_SECS),
            sse_max_lifetime: Duration::from_secs(DEFAULT_SSE_MAX_LIFETIME_SECS),
            sse_mode: SseMode::Native,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub auth_key: Option<String>,
    pub n8n: N8nDefaults,
    pub transport: TransportSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PORT must be a valid u16")]
    InvalidPort,
    #[error("{0} must be a positive number of seconds")]
    InvalidDuration(&'static str),
    #[error("MCP_BRIDGE_TARGET_URL must be an absolute http(s) URL")]
    InvalidBridgeUrl,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let bind_port = non_empty("PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(3000);

        let n8n = N8nDefaults {
            api_url: non_empty("N8N_API_URL"),
            api_key: non_empty("N8N_API_KEY"),
            webhook_username: non_empty("N8N_WEBHOOK_USERNAME"),
            webhook_password: non_empty("N8N_WEBHOOK_PASSWORD"),
            debug: non_empty("DEBUG").is_some_and(|value| value.eq_ignore_ascii_case("true")),
        };

        let seconds = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            let secs = non_empty(key)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .ok_or(ConfigError::InvalidDuration(key))
                })
                .transpose()?
                .unwrap_or(default);
            Ok(Duration::from_secs(secs))
        };

        let sse_mode = match non_empty("MCP_BRIDGE_TARGET_URL") {
            Some(raw) => {
                let target_url = Url::parse(&raw).map_err(|_| ConfigError::InvalidBridgeUrl)?;
                if !matches!(target_url.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidBridgeUrl);
                }
                SseMode::Bridge(BridgeSettings {
                    target_url,
                    api_key: non_empty("MCP_BRIDGE_API_KEY"),
                })
            }
            None => SseMode::Native,
        };

        let config = Self {
            bind_addr,
            bind_port,
            auth_key: non_empty("MCP_AUTH_KEY"),
            n8n,
            transport: TransportSettings {
                session_ttl: seconds("MCP_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
                sse_keepalive: seconds("SSE_KEEPALIVE_SECS", DEFAULT_SSE_KEEPALIVE_SECS)?,
                sse_max_lifetime: seconds("SSE_MAX_LIFETIME_SECS", DEFAULT_SSE_MAX_LIFETIME_SECS)?,
                sse_mode,
            },
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
