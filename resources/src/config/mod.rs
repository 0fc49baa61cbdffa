pub mod informer;

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

pub use self::informer::{BackoffConfig, InformerConfig};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rinformer/config.yaml";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    /// API server URL
    pub api_server_url: String,
    /// API server watch URL
    pub api_server_watch_url: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            api_server_url: "http://localhost:8080".to_string(),
            api_server_watch_url: "ws://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub informer: InformerConfig,
}

impl AppConfig {
    /// Load configuration from an optional YAML file, overridden by
    /// `RINFORMER__`-prefixed environment variables
    /// (e.g. `RINFORMER__CLUSTER__API_SERVER_URL`).
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("RINFORMER").separator("__"))
            .build()
            .with_context(|| "Failed to read config".to_string())?
            .try_deserialize::<AppConfig>()
            .with_context(|| "Failed to parse config".to_string())
    }
}
