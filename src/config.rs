//! Configuration management for quotad.
//!
//! Settings come from an optional YAML file, overridden by environment
//! variables of the form `QUOTAD__SECTION__KEY` (for example
//! `QUOTAD__STORE__BACKEND=redis`).

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{QuotaError, Result};
use crate::ratelimit::{LimiterSettings, WindowEdge};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "QUOTAD";

/// Main configuration for the quotad service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotadConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared state store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Which store holds policies and counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; counters are not shared between replicas
    #[default]
    Memory,
    /// Redis, shared by every replica
    Redis,
}

/// Shared state store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Budget for one store round trip in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// How often the memory store purges expired counters, in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            timeout_ms: default_store_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_store_timeout_ms() -> u64 {
    1000
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Whether an entry exactly one window old still counts
    #[serde(default)]
    pub sliding_window_edge: WindowEdge,

    /// Ceiling on the cost of one check, on top of the policy limit
    #[serde(default)]
    pub max_cost: Option<u64>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl QuotadConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    fn load_with_env(path: Option<&str>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        builder
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize::<QuotadConfig>())
            .map_err(|e| QuotaError::Config(e.to_string()))
    }

    /// Load configuration from a file path, without environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| QuotaError::Config(e.to_string()))
    }

    /// Parse a YAML document through the layered loader.
    pub fn from_yaml_layered(yaml: &str, env: Environment) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize::<QuotadConfig>())
            .map_err(|e| QuotaError::Config(e.to_string()))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    /// Interval between memory store sweeps; never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.store.sweep_interval_ms.max(1))
    }

    /// Settings for the check orchestrator.
    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings {
            store_timeout: self.store_timeout(),
            window_edge: self.rate_limiting.sliding_window_edge,
            max_cost: self.rate_limiting.max_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = QuotadConfig::default();
        assert_eq!(config.server.grpc_addr, SocketAddr::from(([127, 0, 0, 1], 8081)));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.store_timeout(), Duration::from_millis(1000));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.rate_limiting.sliding_window_edge, WindowEdge::Inclusive);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  grpc_addr: "0.0.0.0:9000"
store:
  backend: redis
  redis_url: "redis://cache:6379"
  timeout_ms: 250
rate_limiting:
  sliding_window_edge: exclusive
  max_cost: 5
logging:
  format: json
"#;
        let config = QuotadConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.grpc_addr.port(), 9000);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://cache:6379");

        let settings = config.limiter_settings();
        assert_eq!(settings.store_timeout, Duration::from_millis(250));
        assert_eq!(settings.window_edge, WindowEdge::Exclusive);
        assert_eq!(settings.max_cost, Some(5));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = QuotadConfig::from_yaml("store:\n  backend: memory\n").unwrap();
        assert_eq!(config.server.grpc_addr.port(), 8081);
        assert_eq!(config.store.timeout_ms, 1000);
        assert!(config.rate_limiting.max_cost.is_none());

        let config = QuotadConfig::from_yaml("store:\n  sweep_interval_ms: 0\n").unwrap();
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = QuotadConfig::from_yaml("store:\n  backend: cassandra\n").unwrap_err();
        assert!(matches!(err, QuotaError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let yaml = "store:\n  backend: memory\n  timeout_ms: 250\n";
        let config = QuotadConfig::from_yaml_layered(
            yaml,
            env(&[
                ("QUOTAD__STORE__BACKEND", "redis"),
                ("QUOTAD__SERVER__GRPC_ADDR", "127.0.0.1:7000"),
            ]),
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.timeout_ms, 250);
        assert_eq!(config.server.grpc_addr.port(), 7000);
    }

    #[test]
    fn test_load_without_file() {
        let config = QuotadConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_load_missing_file() {
        let err = QuotadConfig::load_with_env(Some("/nonexistent/quotad.yaml"), env(&[])).unwrap_err();
        assert!(matches!(err, QuotaError::Config(_)));
    }
}
