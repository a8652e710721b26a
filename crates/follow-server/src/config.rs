//! Server configuration
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file
//! (`followgraph.toml`, or the path in `FOLLOWGRAPH_CONFIG`), then
//! `FOLLOWGRAPH_*` environment variables with `__` separating nested keys,
//! e.g. `FOLLOWGRAPH_CACHE__BACKEND=redis`.

use anyhow::{Context, Result};
use config::{Config, Environment, File, Map};
use serde::Deserialize;
use std::time::Duration;

pub const CONFIG_PATH_VAR: &str = "FOLLOWGRAPH_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "followgraph.toml";
const ENV_PREFIX: &str = "FOLLOWGRAPH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub request_timeout_ms: u64,
    pub cache: CacheConfig,
}

impl ServerConfig {
    /// Load from the config file named by the environment (if any) and the
    /// process environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).ok();
        let file = match &path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Self::build(file, None)
    }

    /// Assemble from an explicit file source and, when given, a fixed map
    /// standing in for the process environment.
    fn build<S>(file: S, env: Option<Map<String, String>>) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env);

        let settings = Config::builder()
            .set_default("bind_address", "0.0.0.0:16790")?
            .set_default("database_url", "sqlite://data/followgraph.db")?
            .set_default("database_max_connections", 5)?
            .set_default("request_timeout_ms", 3000)?
            .set_default("cache.backend", "memory")?
            .set_default("cache.redis_url", "redis://127.0.0.1:6379")?
            .set_default("cache.ttl_secs", 86400)?
            .add_source(file)
            .add_source(environment)
            .build()
            .context("Failed to assemble configuration")?;

        let config: ServerConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be at least 1");
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be positive");
        }
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be positive");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
