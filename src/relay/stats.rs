//! Relay statistics tracking
//!
//! Per-engine counters for connections, wake episodes, and relayed bytes.
//! The active-relay gauge is tied to guard objects held by the relay tasks
//! themselves, so it cannot drift from the real set of open pairs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Atomic relay statistics
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Total connections accepted
    accepted: AtomicU64,
    /// Connections that passed admission
    admitted: AtomicU64,
    /// Connections denied by the admission filter
    denied: AtomicU64,
    /// Connections rejected due to the connection limit
    rejected: AtomicU64,
    /// Connections held in a pending queue at least once
    queued: AtomicU64,
    /// Wake episodes started
    episodes_started: AtomicU64,
    /// Wake episodes that confirmed readiness
    episodes_confirmed: AtomicU64,
    /// Wake episodes that failed or expired
    episodes_failed: AtomicU64,
    /// Relay pairs opened
    relays_opened: AtomicU64,
    /// Relay pairs that closed cleanly
    relays_completed: AtomicU64,
    /// Relay pairs that ended with a transport error
    relays_errored: AtomicU64,
    /// Currently open relay pairs (guard-held gauge)
    active_relays: AtomicU64,
    /// Total bytes forwarded client -> target
    bytes_client_to_target: AtomicU64,
    /// Total bytes forwarded target -> client
    bytes_target_to_client: AtomicU64,
}

impl RelayStats {
    /// Create new relay statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted connection
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection that passed admission
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection denied by admission
    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection rejected at the connection limit
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection placed in the pending queue
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a wake episode start
    pub fn record_episode_started(&self) {
        self.episodes_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a confirmed wake episode
    pub fn record_episode_confirmed(&self) {
        self.episodes_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed or expired wake episode
    pub fn record_episode_failed(&self) {
        self.episodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Open a relay pair, returning a guard that owns the active-gauge slot
    ///
    /// The gauge is decremented when the guard drops, whether the relay
    /// completed, errored, or its task was torn down mid-stream.
    #[must_use]
    pub fn relay_guard(self: &Arc<Self>) -> ActiveRelayGuard {
        self.relays_opened.fetch_add(1, Ordering::Relaxed);
        self.active_relays.fetch_add(1, Ordering::Relaxed);
        ActiveRelayGuard {
            stats: Arc::clone(self),
        }
    }

    /// Get total accepted connections
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Get admitted connections
    #[must_use]
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Get denied connections
    #[must_use]
    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    /// Get rejected connections
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Get queued connections
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Get started episodes
    #[must_use]
    pub fn episodes_started(&self) -> u64 {
        self.episodes_started.load(Ordering::Relaxed)
    }

    /// Get confirmed episodes
    #[must_use]
    pub fn episodes_confirmed(&self) -> u64 {
        self.episodes_confirmed.load(Ordering::Relaxed)
    }

    /// Get failed episodes
    #[must_use]
    pub fn episodes_failed(&self) -> u64 {
        self.episodes_failed.load(Ordering::Relaxed)
    }

    /// Get opened relay pairs
    #[must_use]
    pub fn relays_opened(&self) -> u64 {
        self.relays_opened.load(Ordering::Relaxed)
    }

    /// Get cleanly completed relay pairs
    #[must_use]
    pub fn relays_completed(&self) -> u64 {
        self.relays_completed.load(Ordering::Relaxed)
    }

    /// Get errored relay pairs
    #[must_use]
    pub fn relays_errored(&self) -> u64 {
        self.relays_errored.load(Ordering::Relaxed)
    }

    /// Get currently open relay pairs
    #[must_use]
    pub fn active_relays(&self) -> u64 {
        self.active_relays.load(Ordering::Relaxed)
    }

    /// Get total bytes forwarded client -> target
    #[must_use]
    pub fn bytes_client_to_target(&self) -> u64 {
        self.bytes_client_to_target.load(Ordering::Relaxed)
    }

    /// Get total bytes forwarded target -> client
    #[must_use]
    pub fn bytes_target_to_client(&self) -> u64 {
        self.bytes_target_to_client.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted(),
            admitted: self.admitted(),
            denied: self.denied(),
            rejected: self.rejected(),
            queued: self.queued(),
            episodes_started: self.episodes_started(),
            episodes_confirmed: self.episodes_confirmed(),
            episodes_failed: self.episodes_failed(),
            relays_opened: self.relays_opened(),
            relays_completed: self.relays_completed(),
            relays_errored: self.relays_errored(),
            active_relays: self.active_relays(),
            bytes_client_to_target: self.bytes_client_to_target(),
            bytes_target_to_client: self.bytes_target_to_client(),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Guard representing one open relay pair
///
/// Created by [`RelayStats::relay_guard`]. Consuming it via [`complete`]
/// or [`error`] classifies the outcome; dropping it (task cancellation)
/// only releases the gauge slot.
///
/// [`complete`]: ActiveRelayGuard::complete
/// [`error`]: ActiveRelayGuard::error
#[derive(Debug)]
#[must_use]
pub struct ActiveRelayGuard {
    stats: Arc<RelayStats>,
}

impl ActiveRelayGuard {
    /// Record a clean close with the bytes moved in each direction
    pub fn complete(self, client_to_target: u64, target_to_client: u64) {
        self.stats.relays_completed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_client_to_target
            .fetch_add(client_to_target, Ordering::Relaxed);
        self.stats
            .bytes_target_to_client
            .fetch_add(target_to_client, Ordering::Relaxed);
    }

    /// Record a transport-error close
    pub fn error(self) {
        self.stats.relays_errored.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for ActiveRelayGuard {
    fn drop(&mut self) {
        self.stats.active_relays.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Snapshot of relay statistics at a point in time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total connections accepted
    pub accepted: u64,
    /// Connections that passed admission
    pub admitted: u64,
    /// Connections denied by admission
    pub denied: u64,
    /// Connections rejected at the connection limit
    pub rejected: u64,
    /// Connections held in a pending queue
    pub queued: u64,
    /// Wake episodes started
    pub episodes_started: u64,
    /// Wake episodes confirmed
    pub episodes_confirmed: u64,
    /// Wake episodes failed
    pub episodes_failed: u64,
    /// Relay pairs opened
    pub relays_opened: u64,
    /// Relay pairs completed cleanly
    pub relays_completed: u64,
    /// Relay pairs errored
    pub relays_errored: u64,
    /// Relay pairs currently open
    pub active_relays: u64,
    /// Bytes forwarded client -> target
    pub bytes_client_to_target: u64,
    /// Bytes forwarded target -> client
    pub bytes_target_to_client: u64,
    /// Timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl StatsSnapshot {
    /// Total bytes forwarded in both directions
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_client_to_target + self.bytes_target_to_client
    }

    /// Add another snapshot's counters into this one
    ///
    /// Used by the orchestrator to aggregate per-engine snapshots; the
    /// timestamp keeps the later of the two.
    pub fn merge(&mut self, other: &Self) {
        self.accepted += other.accepted;
        self.admitted += other.admitted;
        self.denied += other.denied;
        self.rejected += other.rejected;
        self.queued += other.queued;
        self.episodes_started += other.episodes_started;
        self.episodes_confirmed += other.episodes_confirmed;
        self.episodes_failed += other.episodes_failed;
        self.relays_opened += other.relays_opened;
        self.relays_completed += other.relays_completed;
        self.relays_errored += other.relays_errored;
        self.active_relays += other.active_relays;
        self.bytes_client_to_target += other.bytes_client_to_target;
        self.bytes_target_to_client += other.bytes_target_to_client;
        self.timestamp_ms = self.timestamp_ms.max(other.timestamp_ms);
    }
}
