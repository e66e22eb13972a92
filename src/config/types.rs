//! Configuration types for wake-relay
//!
//! This module defines all configuration structures used by the relay.
//! Configuration is loaded from JSON files and validated at startup.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::mac::MacAddress;
use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Relayed ports, one entry per listening port
    pub ports: Vec<PortConfig>,

    /// Inbound readiness-callback listener
    #[serde(default)]
    pub callback: CallbackConfig,

    /// Wake episode timing knobs
    #[serde(default)]
    pub wake: WakeConfig,

    /// Relay limits and buffer sizing
    #[serde(default)]
    pub relay: RelayConfig,

    /// Geolocation lookup service
    #[serde(default)]
    pub geo: GeoConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if any section fails validation or two port
    /// entries collide.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one port must be configured".into(),
            ));
        }

        let mut seen: HashSet<u16> = HashSet::new();
        for port in &self.ports {
            port.validate()?;
            if !seen.insert(port.listen_port) {
                return Err(ConfigError::DuplicatePort {
                    port: port.listen_port,
                });
            }
        }

        self.callback.validate()?;
        if self.callback.enabled && seen.contains(&self.callback.port) {
            return Err(ConfigError::ValidationError(format!(
                "Callback port {} collides with a relayed listen port",
                self.callback.port
            )));
        }

        self.wake.validate()?;
        self.relay.validate()?;
        self.geo.validate()?;

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            ports: vec![PortConfig::example()],
            callback: CallbackConfig::default(),
            wake: WakeConfig::default(),
            relay: RelayConfig::default(),
            geo: GeoConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Per-port relay configuration
///
/// Immutable after load; keyed by `listen_port`, which must be unique across
/// the whole file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortConfig {
    /// Local port to accept clients on
    pub listen_port: u16,

    /// Target host (IP or resolvable name)
    pub target_host: String,

    /// Target service port
    pub target_port: u16,

    /// Wake identifier for the target machine
    pub mac_address: MacAddress,

    /// Optional automation trigger invoked at episode start
    #[serde(default)]
    pub automation: Option<AutomationConfig>,

    /// Region allow-list for public clients (empty = allow all)
    #[serde(default)]
    pub allowed_regions: Vec<String>,
}

impl PortConfig {
    /// Example entry used by `--generate-config`
    #[must_use]
    pub fn example() -> Self {
        Self {
            listen_port: 9000,
            target_host: "10.0.0.5".into(),
            target_port: 80,
            mac_address: MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            automation: None,
            allowed_regions: Vec::new(),
        }
    }

    /// Validate port configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_port == 0 {
            return Err(ConfigError::ValidationError(
                "listen_port must be greater than 0".into(),
            ));
        }

        if self.target_host.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Port {}: target_host cannot be empty",
                self.listen_port
            )));
        }

        if self.target_port == 0 {
            return Err(ConfigError::ValidationError(format!(
                "Port {}: target_port must be greater than 0",
                self.listen_port
            )));
        }

        if let Some(ref automation) = self.automation {
            automation.validate(self.listen_port)?;
        }

        Ok(())
    }

    /// Target endpoint as a connectable (host, port) pair
    #[must_use]
    pub fn target(&self) -> (&str, u16) {
        (self.target_host.as_str(), self.target_port)
    }

    /// Whether public clients must pass the region allow-list
    #[must_use]
    pub fn has_region_filter(&self) -> bool {
        !self.allowed_regions.is_empty()
    }
}

/// Automation trigger configuration (Home-Assistant-style service call)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutomationConfig {
    /// Base URL of the automation service (e.g. "http://homeassistant.local:8123")
    pub endpoint: String,

    /// Bearer token
    pub token: String,

    /// Automation entity to trigger (e.g. "automation.wake_server")
    pub automation_id: String,
}

impl AutomationConfig {
    /// Validate automation configuration
    pub fn validate(&self, listen_port: u16) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Port {listen_port}: automation endpoint cannot be empty"
            )));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Port {listen_port}: automation token cannot be empty"
            )));
        }
        if self.automation_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Port {listen_port}: automation_id cannot be empty"
            )));
        }
        Ok(())
    }
}

/// Inbound readiness-callback listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackConfig {
    /// Enable the listener
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listener port
    #[serde(default = "default_callback_port")]
    pub port: u16,
}

impl CallbackConfig {
    /// Validate callback configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled {
            if self.bind_address.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Callback bind_address cannot be empty".into(),
                ));
            }
            if self.port == 0 {
                return Err(ConfigError::ValidationError(
                    "Callback port must be greater than 0".into(),
                ));
            }
        }
        Ok(())
    }

    /// Bind target as "address:port"
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_callback_port(),
        }
    }
}

/// Wake episode timing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WakeConfig {
    /// Readiness probe gives up after this many seconds
    #[serde(default = "default_probe_deadline_secs")]
    pub probe_deadline_secs: u64,

    /// Pause between probe attempts in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Timeout of a single probe connect in seconds
    #[serde(default = "default_probe_connect_timeout_secs")]
    pub probe_connect_timeout_secs: u64,

    /// Upper bound on a whole episode (covers callback-only resolution)
    #[serde(default = "default_episode_deadline_secs")]
    pub episode_deadline_secs: u64,

    /// Successful automation calls are not repeated within this window
    #[serde(default = "default_trigger_cooldown_secs")]
    pub trigger_cooldown_secs: u64,

    /// Clients reconnecting within this window skip the wake episode
    #[serde(default = "default_reconnect_grace_secs")]
    pub reconnect_grace_secs: u64,
}

impl WakeConfig {
    /// Validate wake configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "probe_interval_ms must be greater than 0".into(),
            ));
        }
        if self.probe_deadline_secs == 0 {
            return Err(ConfigError::ValidationError(
                "probe_deadline_secs must be greater than 0".into(),
            ));
        }
        if self.episode_deadline_secs == 0 {
            return Err(ConfigError::ValidationError(
                "episode_deadline_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get probe deadline as Duration
    #[must_use]
    pub const fn probe_deadline(&self) -> Duration {
        Duration::from_secs(self.probe_deadline_secs)
    }

    /// Get probe interval as Duration
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Get single-probe connect timeout as Duration
    #[must_use]
    pub const fn probe_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_connect_timeout_secs)
    }

    /// Get episode deadline as Duration
    #[must_use]
    pub const fn episode_deadline(&self) -> Duration {
        Duration::from_secs(self.episode_deadline_secs)
    }

    /// Get trigger cooldown as Duration
    #[must_use]
    pub const fn trigger_cooldown(&self) -> Duration {
        Duration::from_secs(self.trigger_cooldown_secs)
    }

    /// Get fast-reconnect grace window as Duration
    #[must_use]
    pub const fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            probe_deadline_secs: default_probe_deadline_secs(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_connect_timeout_secs: default_probe_connect_timeout_secs(),
            episode_deadline_secs: default_episode_deadline_secs(),
            trigger_cooldown_secs: default_trigger_cooldown_secs(),
            reconnect_grace_secs: default_reconnect_grace_secs(),
        }
    }
}

/// Relay limits and buffer sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Address the per-port listeners bind to
    #[serde(default = "default_bind_address")]
    pub listen_address: String,

    /// Buffer size for bidirectional copy
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Target connect timeout in seconds (post-readiness splice)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum concurrent client connections across all ports
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Graceful shutdown drain timeout in seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl RelayConfig {
    /// Validate relay configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "listen_address cannot be empty".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "buffer_size must be greater than 0".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get drain timeout as Duration
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_bind_address(),
            buffer_size: default_buffer_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_connections: default_max_connections(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// Geolocation lookup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeoConfig {
    /// Base URL of the lookup service
    #[serde(default = "default_geo_endpoint")]
    pub endpoint: String,

    /// Lookup timeout in seconds
    #[serde(default = "default_geo_timeout_secs")]
    pub timeout_secs: u64,
}

impl GeoConfig {
    /// Validate geolocation configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "geo endpoint cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Get lookup timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geo_endpoint(),
            timeout_secs: default_geo_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default)]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            timestamps: true,
            target: false,
        }
    }
}

// Default value functions for serde
const fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

const fn default_callback_port() -> u16 {
    8080
}

const fn default_probe_deadline_secs() -> u64 {
    60
}

const fn default_probe_interval_ms() -> u64 {
    1000
}

const fn default_probe_connect_timeout_secs() -> u64 {
    2
}

const fn default_episode_deadline_secs() -> u64 {
    90
}

const fn default_trigger_cooldown_secs() -> u64 {
    60
}

const fn default_reconnect_grace_secs() -> u64 {
    10
}

const fn default_buffer_size() -> usize {
    64 * 1024
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_max_connections() -> usize {
    1024
}

const fn default_drain_timeout_secs() -> u64 {
    5
}

fn default_geo_endpoint() -> String {
    "https://ipapi.co".into()
}

const fn default_geo_timeout_secs() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
