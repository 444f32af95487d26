use std::sync::Arc;

use crate::config::{Config, N8nDefaults, TransportSettings};
use crate::domain::request_config::PartialConfig;
use crate::n8n_client::mock::MockConnector;
use crate::AppState;

pub const TEST_API_URL: &str = "https://n8n.example.com/api/v1";
pub const TEST_API_KEY: &str = "n8n-test-key";

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1".to_string(),
        bind_port: 0,
        auth_key: None,
        n8n: N8nDefaults::default(),
        transport: TransportSettings::default(),
    }
}

pub fn state_for(config: &Config) -> (AppState, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::default());
    let state = AppState::new(config, connector.clone()).expect("state should build");
    (state, connector)
}

pub fn test_state() -> (AppState, Arc<MockConnector>) {
    state_for(&test_config())
}

pub fn configured() -> PartialConfig {
    PartialConfig {
        api_base_url: Some(TEST_API_URL.to_string()),
        api_key: Some(TEST_API_KEY.to_string()),
        ..PartialConfig::default()
    }
}
