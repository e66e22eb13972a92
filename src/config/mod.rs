//! Configuration module for wake-relay
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use wake_relay::config::{load_config, Config};
//!
//! let config = load_config("/etc/wake-relay/config.json").unwrap();
//! println!("Relayed ports: {}", config.ports.len());
//! ```

mod loader;
mod mac;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use mac::MacAddress;
pub use types::{
    AutomationConfig, CallbackConfig, Config, GeoConfig, LogConfig, PortConfig, RelayConfig,
    WakeConfig,
};
