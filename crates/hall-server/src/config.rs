//! Server configuration.
//!
//! Values come from the first `studyhall.toml` found (or `--config <path>`),
//! then `STUDYHALL_HOST` / `STUDYHALL_PORT` override the bind address.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

const SEARCH_PATHS: [&str; 3] = [
    "studyhall.toml",
    "/etc/studyhall/studyhall.toml",
    "~/.config/studyhall/studyhall.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub transport: TransportConfig,
    pub limits: LimitsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub websocket_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Concurrent WebSocket connections; further upgrades get 503.
    pub max_connections: usize,
    /// Live rooms; joins that would open another room are refused.
    pub max_rooms: usize,
    /// Largest inbound text frame in bytes.
    pub max_message_size: usize,
}

/// Prometheus exporter, served on its own port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_rooms: 10_000,
            max_message_size: studyhall_protocol::codec::MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load the first config file on the search path, or defaults, then
    /// apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override is malformed.
    pub fn load() -> Result<Self> {
        let found = SEARCH_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        match found {
            Some(path) => Self::from_file(path),
            None => Self::default().with_overrides(|key| std::env::var(key).ok()),
        }
    }

    /// Load a specific file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(host) = lookup("STUDYHALL_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("STUDYHALL_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid STUDYHALL_PORT: {}", port))?;
        }
        Ok(self)
    }

    /// Socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
