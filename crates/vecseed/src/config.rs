use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `VECSEED_SERVICE__URI`
pub const ENV_PREFIX: &str = "VECSEED_";

const REDACTED: &str = "***";

/// Connection settings for the target service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub uri: String,
    /// Bearer token; `user:password` works for servers with auth enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Working database for every collection-scoped call
    pub database: String,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:19530".to_string(),
            token: None,
            database: "default".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_ms: 2000,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Shape of the bulk load into the primary collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub seed: u64,
    pub phases: usize,
    pub batch_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            phases: 3,
            batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityConfig {
    pub search_count: usize,
    pub top_k: usize,
    pub filter: String,
    pub query_limit: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            search_count: 10,
            top_k: 10,
            filter: "score > 50".to_string(),
            query_limit: 10,
        }
    }
}

/// Top-level configuration for a seeding run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Pause that lets flushes and compaction register before reading state back
    pub settle_ms: u64,
    pub service: ServiceConfig,
    pub readiness: ReadinessConfig,
    pub load: LoadConfig,
    pub activity: ActivityConfig,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            settle_ms: 2000,
            service: ServiceConfig::default(),
            readiness: ReadinessConfig::default(),
            load: LoadConfig::default(),
            activity: ActivityConfig::default(),
        }
    }
}

impl SeedConfig {
    /// Defaults, then the optional TOML file, then `VECSEED_` environment variables
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(SeedConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load the layered configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(anyhow::anyhow!(
                    "Config file not found: {}",
                    path.display()
                ));
            }
        }
        Self::figment(path)
            .extract()
            .context("Failed to load configuration")
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Copy safe to print: a configured token is masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.service.token.is_some() {
            config.service.token = Some(REDACTED.to_string());
        }
        config
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
