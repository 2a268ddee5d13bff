//! Configuration loading for keyhub-relay.
//!
//! Configuration is loaded from a TOML file (default: `keyhub.toml`). Every
//! section and field has a default, so a missing file or an empty one yields
//! a working server on port 3000. The `PORT` environment variable overrides
//! `server.port`.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration for keyhub-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Connection and rate limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Liveness monitor configuration.
    #[serde(default)]
    pub liveness: LivenessConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Listener configuration.
///
/// HTTP endpoints and the WebSocket relay share one listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host (default: 0.0.0.0).
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port (default: 3000).
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Connection and rate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Outbound frames queued per connection before relayed payloads are
    /// dropped (default: 256).
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Encoded bytes queued per connection before relayed payloads are
    /// dropped (default: 16MB).
    ///
    /// Whichever of this and `outbound_buffer` is reached first applies, so
    /// a stalled reader holds at most this much memory.
    #[serde(default = "default_outbound_buffer_bytes")]
    pub outbound_buffer_bytes: usize,
    /// Largest accepted WebSocket message in bytes (default: 1MB).
    ///
    /// Must not exceed `outbound_buffer_bytes`.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Frames per connection per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Frames per second across all connections (default: 1000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Maximum simultaneously open relay connections (default: 10000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Liveness monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// Probe interval in seconds (default: 30).
    ///
    /// A connection is terminated on the tick after the one whose probe it
    /// failed to answer.
    #[serde(default = "default_liveness_interval")]
    pub interval_secs: u64,
    /// Enable the liveness monitor (default: true).
    #[serde(default = "default_liveness_enabled")]
    pub enabled: bool,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable the Prometheus metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_outbound_buffer_bytes() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_requests_per_second() -> u32 {
    1000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_liveness_interval() -> u64 {
    30
}

fn default_liveness_enabled() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            outbound_buffer_bytes: default_outbound_buffer_bytes(),
            max_frame_bytes: default_max_frame_bytes(),
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_liveness_interval(),
            enabled: default_liveness_enabled(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Resolve the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self.host.parse().map_err(|_| ConfigError::Invalid {
            field: "server.host",
            reason: format!("not an IP address: {}", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply a `PORT` override (as read from the environment).
    ///
    /// `None` or an empty value leaves the configured port untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid port number.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> Result<(), ConfigError> {
        let Some(value) = port.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(());
        };
        self.server.port = value.parse().map_err(|_| ConfigError::Invalid {
            field: "PORT",
            reason: format!("not a port number: {value}"),
        })?;
        Ok(())
    }

    /// Check that limits and intervals are usable.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |field: &'static str| ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        };

        if self.limits.outbound_buffer == 0 {
            return Err(zero("limits.outbound_buffer"));
        }
        if self.limits.max_frame_bytes == 0 {
            return Err(zero("limits.max_frame_bytes"));
        }
        if self.limits.outbound_buffer_bytes < self.limits.max_frame_bytes {
            return Err(ConfigError::Invalid {
                field: "limits.outbound_buffer_bytes",
                reason: format!(
                    "must be at least limits.max_frame_bytes ({})",
                    self.limits.max_frame_bytes
                ),
            });
        }
        if self.limits.messages_per_minute == 0 {
            return Err(zero("limits.messages_per_minute"));
        }
        if self.limits.global_requests_per_second == 0 {
            return Err(zero("limits.global_requests_per_second"));
        }
        if self.limits.max_connections == 0 {
            return Err(zero("limits.max_connections"));
        }
        if self.liveness.interval_secs == 0 {
            return Err(zero("liveness.interval_secs"));
        }
        self.server.socket_addr()?;
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
