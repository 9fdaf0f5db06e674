use crate::error::{ClientError, Result};
use jrx_runtime::RuntimeConfig;
use jrx_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full client configuration, loadable from a TOML file:
///
/// ```toml
/// [runtime]
/// app_root = "app"
///
/// [transport]
/// base_url = "http://127.0.0.1:8080"
/// fallback = "polling"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub runtime: RuntimeConfig,
    pub transport: TransportConfig,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            runtime: RuntimeConfig::from_env(),
            transport: TransportConfig::from_env(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate().map_err(ClientError::Config)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.runtime
            .validate()
            .map_err(|e| format!("runtime: {e}"))?;
        self.transport
            .validate()
            .map_err(|e| format!("transport: {e}"))
    }
}
