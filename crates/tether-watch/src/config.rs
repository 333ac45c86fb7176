//! Watcher configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TETHER_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_core::{BackoffConfig, PoolConfig};

/// Watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// HTTP proxy to tunnel through, e.g. `http://proxy:3128`.
    #[serde(default = "default_proxy")]
    pub proxy: Option<String>,

    /// Bearer token sent with every LISTEN/UNLISTEN.
    #[serde(default = "default_auth_token")]
    pub auth_token: String,

    /// Topic keys to subscribe to.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Pool limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Keepalive configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Reconnect backoff.
    #[serde(default)]
    pub backoff: BackoffSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum topics per connection.
    #[serde(default = "default_topics_per_connection")]
    pub topics_per_connection: usize,

    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// PING interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// How long to wait for a PONG, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// First retry delay in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,

    /// Upper bound on the retry delay in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_endpoint() -> String {
    std::env::var("TETHER_ENDPOINT")
        .unwrap_or_else(|_| tether_core::config::DEFAULT_ENDPOINT.to_string())
}

fn default_proxy() -> Option<String> {
    std::env::var("TETHER_PROXY").ok().filter(|p| !p.is_empty())
}

fn default_auth_token() -> String {
    std::env::var("TETHER_AUTH_TOKEN").unwrap_or_default()
}

fn default_topics_per_connection() -> usize {
    50
}

fn default_max_connections() -> usize {
    8
}

fn default_heartbeat_interval() -> u64 {
    180_000 // 3 minutes
}

fn default_heartbeat_timeout() -> u64 {
    10_000
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    180_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            proxy: default_proxy(),
            auth_token: default_auth_token(),
            topics: Vec::new(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            backoff: BackoffSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            topics_per_connection: default_topics_per_connection(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            max_ms: default_backoff_max(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "tether.toml",
            "/etc/tether/tether.toml",
            "~/.config/tether/tether.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Build the pool configuration.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            endpoint: self.endpoint.clone(),
            proxy: self.proxy.clone(),
            topics_limit: self.limits.topics_per_connection,
            max_connections: self.limits.max_connections,
            ping_interval: Duration::from_millis(self.heartbeat.interval_ms),
            ping_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            backoff: BackoffConfig {
                base: Duration::from_millis(self.backoff.base_ms),
                maximum: Duration::from_millis(self.backoff.max_ms),
                ..BackoffConfig::default()
            },
            ..PoolConfig::default()
        }
    }
}
