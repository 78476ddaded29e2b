//! Structured logging setup.
//!
//! Installs a `tracing` subscriber driven by [`LoggingConfig`]. `RUST_LOG`,
//! when set, takes precedence over the configured level.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is not set
pub fn default_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(config.log_level.as_str().to_ascii_lowercase())
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed or the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_env_filter(config));

    let file = match (&config.log_to_file, &config.log_file_path) {
        (true, Some(path)) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file: {e}")))?,
        ),
        _ => None,
    };

    let console = config.log_to_console.then(|| {
        if config.json_format {
            fmt::layer().json().with_target(true).boxed()
        } else {
            fmt::layer().with_target(true).boxed()
        }
    });
    let file = file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .json()
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    info!(app = %config.app_name, "Logging initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tracing::Level;

    #[test]
    fn test_default_filter_follows_level() {
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            ..LoggingConfig::default()
        };
        assert_eq!(default_env_filter(&config).to_string(), "debug");
    }

    #[test]
    fn test_subscriber_installs_once() {
        let config = LoggingConfig {
            log_to_console: false,
            ..LoggingConfig::default()
        };
        init_logging(&config).unwrap();
        assert!(matches!(init_logging(&config), Err(ProtocolError::ConfigError(_))));
    }
}
