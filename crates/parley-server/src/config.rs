//! Server configuration.
//!
//! Settings come from a TOML file (see [`Config::load`] for the search
//! order), then `PARLEY_HOST` and `PARLEY_PORT` override the bind address.
//! Every section and key is optional.

use anyhow::{ensure, Context, Result};
use parley_protocol::WireFormat;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";

/// Files tried in order when `PARLEY_CONFIG` is unset.
const SEARCH_PATHS: [&str; 3] = [
    "parley.toml",
    "/etc/parley/parley.toml",
    "~/.config/parley/parley.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub transport: TransportConfig,
    pub limits: LimitsConfig,
    pub heartbeat: HeartbeatConfig,
    pub cors: CorsConfig,
    pub metrics: MetricsConfig,
}

/// Where clients connect and what they receive by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Route serving the WebSocket upgrade.
    pub websocket_path: String,
    /// Outbound encoding for connections without a `?format=` query.
    pub default_format: WireFormat,
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upgrades beyond this many open connections get `503`.
    pub max_connections: usize,
    /// Inbound frames larger than this many bytes are dropped.
    pub max_message_size: usize,
}

/// Liveness checking for idle sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// A connection silent for longer than this is closed.
    pub timeout_ms: u64,
}

impl HeartbeatConfig {
    /// Ping period. Never zero.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// CORS. When enabled, any origin is allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
}

/// Prometheus exporter.
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
            port: 3002,
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            cors: CorsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".to_string(),
            default_format: WireFormat::Json,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_message_size: 64 * 1024,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 25_000,
            timeout_ms: 60_000,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { enabled: true }
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
    /// Load configuration.
    ///
    /// A path in `PARLEY_CONFIG` wins; otherwise the first existing file of
    /// `./parley.toml`, `/etc/parley/parley.toml` and
    /// `~/.config/parley/parley.toml` is used, falling back to defaults.
    /// Environment overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be read or parsed, or the
    /// result fails [`Config::validate`].
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(shellexpand::tilde(&path).as_ref())?,
            Err(_) => match SEARCH_PATHS
                .iter()
                .map(|path| shellexpand::tilde(path))
                .find(|path| Path::new(path.as_ref()).exists())
            {
                Some(path) => Self::from_file(path.as_ref())?,
                None => Self::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
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

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply `PARLEY_HOST` and `PARLEY_PORT` as returned by `var`.
    ///
    /// # Errors
    ///
    /// Returns an error if `PARLEY_PORT` is not a port number.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("PARLEY_HOST") {
            self.host = host;
        }
        if let Some(port) = var("PARLEY_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("PARLEY_PORT is not a port: {:?}", port))?;
        }
        Ok(())
    }

    /// Reject settings the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first bad setting.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/'"
        );
        ensure!(self.limits.max_connections > 0, "limits.max_connections must be positive");
        ensure!(self.limits.max_message_size > 0, "limits.max_message_size must be positive");
        ensure!(
            self.heartbeat.timeout_ms > self.heartbeat.interval_ms,
            "heartbeat.timeout_ms must exceed heartbeat.interval_ms"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
