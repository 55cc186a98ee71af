use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::transaction::ids::IdempotencyKey;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// Lifetime of a record from creation
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    IdempotencyKey::DEFAULT_TTL_SECONDS
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "txn_core.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            idempotency: IdempotencyConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config yaml")
    }
}
