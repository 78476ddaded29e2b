//! # Configuration Management
//!
//! Settings for servers, clients and logging.
//!
//! ## Configuration Sources
//! - TOML files via [`NetworkConfig::from_file`]
//! - Direct instantiation with defaults
//! - `TD2D_*` environment overrides via [`NetworkConfig::from_env`]
//!
//! Timeouts and intervals are game durations and are written to TOML as
//! tick counts (one tick is 15 ms, 60 ticks make a game "second").

use crate::error::{ProtocolError, Result};
use crate::protocol::version::LEGACY_PROTOCOL_VERSION;
use crate::utils::timers::{ticks, SECOND};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default TCP port
pub const DEFAULT_TCP_PORT: u16 = 7606;

/// Default UDP port
pub const DEFAULT_UDP_PORT: u16 = 8606;

/// Packet types that are never traced per packet by default
pub const DEFAULT_QUIET_PACKETS: &[&str] = &["PassthroughPlayerState"];

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `TD2D_*` environment variables.
    ///
    /// Unparseable values are rejected rather than ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = env_var("TD2D_SERVER_HOST") {
            config.server.host = Some(host);
        }
        if let Some(host) = env_var("TD2D_CLIENT_HOST") {
            config.client.host = Some(host);
        }
        if let Some(port) = env_parse::<u16>("TD2D_TCP_PORT")? {
            config.server.tcp_port = port;
            config.client.tcp_port = port;
        }
        if let Some(port) = env_parse::<u16>("TD2D_UDP_PORT")? {
            config.server.udp_port = port;
            config.client.udp_port = port;
        }
        if let Some(legacy) = env_parse::<bool>("TD2D_LEGACY_IP")? {
            config.server.legacy_ip = legacy;
            config.client.legacy_ip = legacy;
        }
        if let Some(version) = env_parse::<u16>("TD2D_VERSION")? {
            config.server.version = version;
            config.client.version = version;
        }
        if let Some(count) = env_parse::<u64>("TD2D_HEARTBEAT_TICKS")? {
            config.server.heartbeat_interval = ticks(count);
        }
        if let Some(count) = env_parse::<u64>("TD2D_SERVER_TIMEOUT_TICKS")? {
            config.server.timeout = ticks(count);
        }
        if let Some(count) = env_parse::<u64>("TD2D_CLIENT_TIMEOUT_TICKS")? {
            config.client.timeout = ticks(count);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate every section.
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{raw}'"))),
    }
}

fn default_quiet_packets() -> Vec<String> {
    DEFAULT_QUIET_PACKETS.iter().map(|s| s.to_string()).collect()
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address; `None` listens on every interface of the chosen family
    pub host: Option<String>,

    /// TCP listen port (0 picks an ephemeral port)
    pub tcp_port: u16,

    /// UDP listen port (0 picks an ephemeral port)
    pub udp_port: u16,

    /// Listen on IPv4 instead of IPv6
    pub legacy_ip: bool,

    /// Protocol version spoken by every peer
    pub version: u16,

    /// Interval between heartbeat broadcasts
    #[serde(with = "ticks_serde")]
    pub heartbeat_interval: Duration,

    /// Idle time after which a silent peer is dropped
    #[serde(with = "ticks_serde")]
    pub timeout: Duration,

    /// Relay unhandled passthrough packets to the other peers
    pub relay_passthrough: bool,

    /// Packet types excluded from per-packet tracing
    pub quiet_packets: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            legacy_ip: false,
            version: LEGACY_PROTOCOL_VERSION,
            heartbeat_interval: ticks(2 * SECOND),
            timeout: ticks(10 * SECOND),
            relay_passthrough: true,
            quiet_packets: default_quiet_packets(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(host) = &self.host {
            if host.is_empty() {
                errors.push("Server host cannot be empty (omit it to listen everywhere)".to_string());
            } else if host.parse::<std::net::IpAddr>().is_err() {
                errors.push(format!("Server host must be an IP address: '{host}'"));
            }
        }

        if self.heartbeat_interval < ticks(1) {
            errors.push("Heartbeat interval too short (minimum: 1 tick)".to_string());
        }

        if self.timeout <= self.heartbeat_interval {
            errors.push(format!(
                "Timeout ({} ms) must be longer than the heartbeat interval ({} ms)",
                self.timeout.as_millis(),
                self.heartbeat_interval.as_millis()
            ));
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address; `None` connects to loopback
    pub host: Option<String>,

    pub tcp_port: u16,

    pub udp_port: u16,

    /// Use IPv4 instead of IPv6
    pub legacy_ip: bool,

    pub version: u16,

    /// Connect timeout, and idle time after which the server is considered gone
    #[serde(with = "ticks_serde")]
    pub timeout: Duration,

    /// Packet types excluded from per-packet tracing
    pub quiet_packets: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            legacy_ip: false,
            version: LEGACY_PROTOCOL_VERSION,
            timeout: ticks(4 * SECOND),
            quiet_packets: default_quiet_packets(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if matches!(&self.host, Some(host) if host.is_empty()) {
            errors.push("Client host cannot be empty (omit it to use loopback)".to_string());
        }

        if self.tcp_port == 0 {
            errors.push("Client TCP port cannot be 0".to_string());
        }
        if self.udp_port == 0 {
            errors.push("Client UDP port cannot be 0".to_string());
        }

        if self.timeout < ticks(1) {
            errors.push("Client timeout too short (minimum: 1 tick)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("td2d-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            match &self.log_file_path {
                Some(path) => {
                    if let Some(parent) = Path::new(path).parent() {
                        if !parent.as_os_str().is_empty() && !parent.exists() {
                            errors.push(format!(
                                "Log file directory does not exist: {}",
                                parent.display()
                            ));
                        }
                    }
                }
                None => {
                    errors.push("log_file_path must be specified when log_to_file is true".to_string())
                }
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors.push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Durations as whole tick counts
mod ticks_serde {
    use crate::utils::timers::{ticks, to_ticks};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        to_ticks(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let count = u64::deserialize(deserializer)?;
        Ok(ticks(count))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.server.tcp_port, 7606);
        assert_eq!(config.server.udp_port, 8606);
        assert_eq!(config.server.version, 100);
        assert_eq!(config.server.timeout, Duration::from_millis(9000));
        assert_eq!(config.client.timeout, Duration::from_millis(3600));
    }

    #[test]
    fn test_durations_written_as_ticks() {
        let text = NetworkConfig::example_config();
        assert!(text.contains("heartbeat_interval = 120"), "{text}");
        assert!(text.contains("timeout = 600"), "{text}");

        let parsed = NetworkConfig::from_toml("[server]\ntimeout = 60\n").unwrap();
        assert_eq!(parsed.server.timeout, ticks(SECOND));
        assert_eq!(parsed.server.tcp_port, DEFAULT_TCP_PORT);
    }
}
