//! Configuration management
//!
//! Handles loading and validating client configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::connection::{
    ManagerConfig, ReconnectPolicy, DEFAULT_BASE_INTERVAL, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_SETTLE_DELAY,
    DEFAULT_STALE_FACTOR,
};
use crate::protocol::{self, Endpoint};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Remote endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// `ws://` or `wss://` address of the execution stream
    pub url: String,
    /// Caller correlator sent as a query parameter
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session correlator; also triggers the subscribe frame
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Channel named in the subscribe frame
    #[serde(default = "default_channel")]
    pub channel: String,
}

/// Lifecycle tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Connect on start
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// First backoff delay in milliseconds
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Automatic reconnect ceiling
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Watchdog for attempts that never open
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Ping period
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Silence threshold as a multiple of the ping period
    #[serde(default = "default_stale_factor")]
    pub stale_factor: f64,
    /// Pause between teardown and the fresh attempt of a manual reconnect
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_interval_ms: default_base_interval_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            stale_factor: default_stale_factor(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_channel() -> String { protocol::DEFAULT_CHANNEL.to_string() }
fn default_true() -> bool { true }
fn default_base_interval_ms() -> u64 { DEFAULT_BASE_INTERVAL.as_millis() as u64 }
fn default_max_delay_ms() -> u64 { DEFAULT_MAX_DELAY.as_millis() as u64 }
fn default_max_attempts() -> u32 { DEFAULT_MAX_ATTEMPTS }
fn default_connect_timeout_ms() -> u64 { DEFAULT_CONNECT_TIMEOUT.as_millis() as u64 }
fn default_heartbeat_interval_ms() -> u64 { DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64 }
fn default_stale_factor() -> f64 { DEFAULT_STALE_FACTOR }
fn default_settle_delay_ms() -> u64 { DEFAULT_SETTLE_DELAY.as_millis() as u64 }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9464)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        Endpoint::parse(&self.endpoint.url)?;

        let conn = &self.connection;
        if conn.base_interval_ms == 0 {
            anyhow::bail!("base_interval_ms must be > 0");
        }
        if conn.max_delay_ms < conn.base_interval_ms {
            anyhow::bail!("max_delay_ms must be >= base_interval_ms");
        }
        if conn.connect_timeout_ms == 0 {
            anyhow::bail!("connect_timeout_ms must be > 0");
        }
        if conn.heartbeat_interval_ms == 0 {
            anyhow::bail!("heartbeat_interval_ms must be > 0");
        }
        if !(conn.stale_factor.is_finite() && conn.stale_factor >= 1.0) {
            anyhow::bail!("stale_factor must be >= 1.0");
        }
        if self.endpoint.channel.is_empty() {
            anyhow::bail!("channel must not be empty");
        }
        Ok(())
    }

    /// Build the runtime configuration of a manager
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let mut endpoint = Endpoint::parse(&self.endpoint.url)?;
        if let Some(user_id) = &self.endpoint.user_id {
            endpoint = endpoint.with_user_id(user_id.clone());
        }
        if let Some(conversation_id) = &self.endpoint.conversation_id {
            endpoint = endpoint.with_conversation_id(conversation_id.clone());
        }

        let conn = &self.connection;
        let heartbeat_interval = Duration::from_millis(conn.heartbeat_interval_ms);

        let mut config = ManagerConfig::new(endpoint);
        config.channel = self.endpoint.channel.clone();
        config.enabled = conn.enabled;
        config.reconnect = ReconnectPolicy {
            base_interval: Duration::from_millis(conn.base_interval_ms),
            max_delay: Duration::from_millis(conn.max_delay_ms),
            max_attempts: conn.max_attempts,
        };
        config.connect_timeout = Duration::from_millis(conn.connect_timeout_ms);
        config.heartbeat_interval = heartbeat_interval;
        config.stale_threshold = heartbeat_interval.mul_f64(conn.stale_factor);
        config.settle_delay = Duration::from_millis(conn.settle_delay_ms);
        Ok(config)
    }
}
