//! Relay engine module
//!
//! This module holds the wake-triggered relay core:
//! - Per-port relay engine and its readiness state machine
//! - Wake episode resolution (one-shot signal plus callback registry)
//! - Readiness prober
//! - Port orchestrator and process lifecycle
//! - Statistics collection

mod engine;
mod episode;
mod orchestrator;
mod prober;
mod stats;

pub use engine::{run_relay_loop, EngineContext, RelayEngine};
pub use episode::{EpisodeFailure, EpisodeOutcome, EpisodeRegistry, EpisodeSignal};
pub use orchestrator::RelayOrchestrator;
pub use prober::{probe_once, probe_until_ready};
pub use stats::{ActiveRelayGuard, RelayStats, StatsSnapshot};
