//! Configuration Module
//!
//! Provides TOML-based configuration for CacheCast with support for:
//! - Logging level
//! - Cluster listener, pool and timing parameters
//! - Member discovery (static list or DNS service lookup)
//! - Environment variable overrides (CACHECAST__* prefix)

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use cluster::{ClusterConfig, DEFAULT_PORT};
pub(crate) use cluster::resolve_local_ip;
pub use discovery::{DiscoveryConfig, DiscoveryMode};

mod cluster;
mod discovery;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static regex");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Cluster listener and membership configuration
    pub cluster: ClusterConfig,
    /// Member discovery configuration
    pub discovery: DiscoveryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `CACHECAST__` prefix with double underscores for nesting:
    ///    - `CACHECAST__CLUSTER__BIND=0.0.0.0:9912` overrides `cluster.bind`
    ///    - `CACHECAST__CLUSTER__POD_NAME=api-1` overrides `cluster.pod_name`
    ///    - `CACHECAST__DISCOVERY__MODE=dns` overrides `discovery.mode`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("cluster.bind", "0.0.0.0:9911")?
            .set_default("cluster.worker_pool_name", "cachecast-cluster")?
            .set_default("cluster.worker_pool_size", 1024)?
            .set_default("cluster.work_queue_capacity", 128)?
            .set_default("cluster.connect_timeout", "10s")?
            .set_default("cluster.write_timeout", "30s")?
            .set_default("cluster.read_timeout", "10m")?
            .set_default("cluster.accept_timeout", "60s")?
            .set_default("cluster.normal_check_interval", "5m")?
            .set_default("cluster.error_check_interval", "1m")?
            .set_default("discovery.mode", "static")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("CACHECAST")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("discovery.members")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cluster = &self.cluster;

        if cluster.worker_pool_size == 0 {
            return Err(ConfigError::Validation(
                "cluster.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if cluster.work_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "cluster.work_queue_capacity must be at least 1".to_string(),
            ));
        }
        if cluster.worker_pool_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cluster.worker_pool_name must not be empty".to_string(),
            ));
        }
        if cluster.accept_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "cluster.accept_timeout must be greater than zero".to_string(),
            ));
        }
        if cluster.error_check_interval > cluster.normal_check_interval {
            return Err(ConfigError::Validation(format!(
                "cluster.error_check_interval ({:?}) must not exceed normal_check_interval ({:?})",
                cluster.error_check_interval, cluster.normal_check_interval
            )));
        }

        if self.discovery.mode == DiscoveryMode::Dns
            && self
                .discovery
                .service
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "discovery.service is required when discovery.mode = \"dns\"".to_string(),
            ));
        }

        Ok(())
    }
}
