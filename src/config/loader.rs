//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    // Check if file exists
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    // Read file contents
    let contents = std::fs::read_to_string(path)?;

    // Parse JSON
    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    // Validate configuration
    config.validate()?;

    info!(
        "Configuration loaded: {} ports, callback {}",
        config.ports.len(),
        if config.callback.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `WAKE_RELAY_LISTEN_ADDR`: Override the per-port bind address
/// - `WAKE_RELAY_LOG_LEVEL`: Override log level
/// - `WAKE_RELAY_MAX_CONNECTIONS`: Override max connections
/// - `WAKE_RELAY_CALLBACK_PORT`: Override the callback listener port
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    // Override bind address
    if let Ok(addr) = std::env::var("WAKE_RELAY_LISTEN_ADDR") {
        config.relay.listen_address = addr;
        debug!(
            "Listen address overridden to {}",
            config.relay.listen_address
        );
    }

    // Override log level
    if let Ok(level) = std::env::var("WAKE_RELAY_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    // Override max connections
    if let Ok(max) = std::env::var("WAKE_RELAY_MAX_CONNECTIONS") {
        config.relay.max_connections = max.parse().map_err(|_| ConfigError::EnvError {
            name: "WAKE_RELAY_MAX_CONNECTIONS".into(),
            reason: format!("Invalid number: {max}"),
        })?;
        debug!(
            "Max connections overridden to {}",
            config.relay.max_connections
        );
    }

    // Override callback port
    if let Ok(port) = std::env::var("WAKE_RELAY_CALLBACK_PORT") {
        config.callback.port = port.parse().map_err(|_| ConfigError::EnvError {
            name: "WAKE_RELAY_CALLBACK_PORT".into(),
            reason: format!("Invalid port: {port}"),
        })?;
        debug!("Callback port overridden to {}", config.callback.port);
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
