//! Configuration loading
//!
//! Settings come from an optional TOML file plus `SIGNOFF_*` environment
//! variables; explicit builder overrides win over both. A `.env` file is
//! honored for local development.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent event consumers.
    pub concurrency: usize,
    /// Sleep between empty claim attempts.
    pub poll_interval_ms: u64,
    /// Claims older than this are considered stale and redelivered.
    pub claim_timeout_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 100,
            claim_timeout_secs: 30.0,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from the default search path and environment.
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let config_path = self
            .config_path
            .or_else(|| env::var("SIGNOFF_CONFIG_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("signoff.toml"));

        let mut config: Config = config::Config::builder()
            .add_source(config::File::from(config_path).required(false))
            .add_source(config::Environment::with_prefix("SIGNOFF").separator("__"))
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if let Ok(url) = env::var("SIGNOFF_DATABASE_URL") {
            config.database.url = Some(url);
        }
        if let Some(url) = self.database_url {
            config.database.url = Some(url);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.poll_interval_ms, 100);
    }

    #[test]
    fn test_builder_override_wins() {
        let config = Config::builder()
            .database_url(Some("postgresql://localhost/signoff_test".to_string()))
            .build()
            .unwrap();

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgresql://localhost/signoff_test")
        );
    }
}
