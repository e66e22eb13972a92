//! wake-relay: Wake-on-LAN triggered, admission-gated TCP relay
//!
//! This crate fronts services on machines that are usually asleep. Each
//! configured port accepts TCP clients, wakes the target machine on the
//! first arrival, holds clients in a queue while the target boots, and
//! splices traffic both ways once the target is reachable.
//!
//! # Features
//!
//! - **Wake Episodes**: First client triggers Wake-on-LAN plus an optional
//!   automation call; later clients join the same episode
//! - **Readiness Detection**: TCP probing with a deadline, or an external
//!   HTTP callback that confirms or declines the wake
//! - **Admission Filtering**: Region allow-lists for public clients,
//!   backed by a geolocation lookup that denies on failure
//! - **Fast Reconnect**: Clients that drop and return within a grace
//!   window bypass the wake machinery entirely
//! - **Connection Management**: Backpressure, statistics, and graceful
//!   shutdown shared across all port engines
//!
//! # Architecture
//!
//! ```text
//! Client → listen port → Admission → RelayEngine → Target
//!                                       ↓    ↑
//!                                 Wake Episode
//!                              (WoL + automation)
//!                                       ↓    ↑
//!                             Prober / HTTP Callback
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use wake_relay::config::load_config;
//! use wake_relay::relay::RelayOrchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration
//! let config = load_config("/etc/wake-relay/config.json")?;
//!
//! // One engine per configured port
//! let orchestrator = RelayOrchestrator::new(&config)?;
//! let handles = orchestrator.spawn_relay_loops().await?;
//!
//! // Accept clients until shutdown, then drain
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`admission`]: Client admission (private/loopback passthrough, region checks)
//! - [`callback`]: HTTP listener for external readiness reports
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`io`]: Bidirectional splice and buffer sizing
//! - [`relay`]: Per-port engines, wake episodes, and the orchestrator
//! - [`wake`]: Wake-on-LAN packets and the automation caller

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod admission;
pub mod callback;
pub mod config;
pub mod error;
pub mod io;
pub mod relay;
pub mod wake;

// Re-export commonly used types at the crate root
pub use admission::{AdmissionFilter, GeoClient, RegionLookup};
pub use callback::CallbackReport;
pub use config::{load_config, Config, PortConfig};
pub use error::{
    AdmissionError, CallbackError, ConfigError, RelayError, Result, WakeError, WakeRelayError,
};
pub use relay::{
    EpisodeOutcome, EpisodeRegistry, RelayEngine, RelayOrchestrator, RelayStats, StatsSnapshot,
};
pub use wake::{send_wake_signal, AutomationCaller};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
