//! Wake episode resolution
//!
//! A wake episode is the bounded attempt, per port, to bring a target up and
//! confirm its reachability before draining queued connections. Its outcome
//! is carried by a single-resolution signal that the readiness prober and the
//! callback listener may each try to fulfill; the first attempt wins and
//! every later attempt is a no-op.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// How a wake episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeOutcome {
    /// The target's service port was confirmed reachable
    Confirmed,
    /// The target was not confirmed; queued connections are closed
    Failed(EpisodeFailure),
}

/// Why a wake episode failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeFailure {
    /// The automation trigger call returned failure
    TriggerCall,
    /// The readiness prober exhausted its deadline
    ProbeTimeout,
    /// The callback reported the target will not come up
    CallbackDeclined,
    /// Neither prober nor callback resolved within the episode deadline
    Expired,
    /// The process began shutting down mid-episode
    Shutdown,
}

impl fmt::Display for EpisodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::TriggerCall => "automation call failed",
            Self::ProbeTimeout => "probe deadline elapsed",
            Self::CallbackDeclined => "callback declined",
            Self::Expired => "episode deadline elapsed",
            Self::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// One-shot resolution handle for a wake episode
///
/// Cloneable via `Arc`; shared between the episode driver (which waits on
/// the paired receiver), the prober task, and the callback registry. Only
/// the first [`resolve`] delivers an outcome.
///
/// [`resolve`]: EpisodeSignal::resolve
#[derive(Debug)]
pub struct EpisodeSignal {
    tx: Mutex<Option<oneshot::Sender<EpisodeOutcome>>>,
}

impl EpisodeSignal {
    /// Create a signal and the receiver its episode driver waits on
    #[must_use]
    pub fn new() -> (Arc<Self>, oneshot::Receiver<EpisodeOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Attempt to resolve the episode
    ///
    /// Returns `true` if this call resolved it, `false` if it was already
    /// resolved. A dropped receiver still counts as resolved for the caller;
    /// the outcome simply has nowhere to go.
    pub fn resolve(&self, outcome: EpisodeOutcome) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Whether a resolution attempt has already happened
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Lookup table from listen port to the in-flight episode's signal
///
/// The callback listener holds one of these and nothing else: it can resolve
/// an episode but cannot touch engine state. Engines register their signal
/// when an episode starts and deregister when its driver finishes.
#[derive(Debug, Default)]
pub struct EpisodeRegistry {
    episodes: DashMap<u16, Arc<EpisodeSignal>>,
}

impl EpisodeRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the signal for a port's in-flight episode
    pub fn register(&self, port: u16, signal: Arc<EpisodeSignal>) {
        self.episodes.insert(port, signal);
    }

    /// Remove a port's entry once its episode driver has finished
    pub fn deregister(&self, port: u16) {
        self.episodes.remove(&port);
    }

    /// Resolve the episode for a port, if one is in flight
    ///
    /// Returns `None` when no episode is registered for the port,
    /// `Some(true)` if this call resolved it, `Some(false)` if it was
    /// already resolved.
    pub fn resolve(&self, port: u16, outcome: EpisodeOutcome) -> Option<bool> {
        self.episodes
            .get(&port)
            .map(|signal| signal.resolve(outcome))
    }

    /// Whether a port currently has an episode in flight
    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        self.episodes.contains_key(&port)
    }

    /// Number of in-flight episodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    /// Whether no episodes are in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}
