//! Port orchestrator
//!
//! Builds one relay engine per configured port plus the collaborators they
//! share (admission filter, automation client, episode registry, connection
//! limiter), owns the process-wide lifecycle, and aggregates statistics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::{run_relay_loop, EngineContext, RelayEngine};
use super::episode::EpisodeRegistry;
use super::stats::StatsSnapshot;
use crate::admission::{AdmissionFilter, GeoClient};
use crate::config::Config;
use crate::error::{ConfigError, RelayError, WakeRelayError};
use crate::wake::AutomationCaller;

/// Owns every relay engine and the process-wide lifecycle
pub struct RelayOrchestrator {
    engines: Vec<Arc<RelayEngine>>,
    registry: Arc<EpisodeRegistry>,
    listen_address: String,
    limiter: Arc<Semaphore>,
    max_connections: usize,
    drain_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
}

impl RelayOrchestrator {
    /// Build engines and shared collaborators from the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the outbound HTTP clients cannot be
    /// constructed (TLS root store setup).
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let geo = Arc::new(GeoClient::new(&config.geo)?);
        let admission = Arc::new(AdmissionFilter::new(geo));
        let automation = Arc::new(AutomationCaller::new()?);
        let registry = Arc::new(EpisodeRegistry::new());
        let limiter = Arc::new(Semaphore::new(config.relay.max_connections));
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutting_down = Arc::new(AtomicBool::new(false));

        let ctx = EngineContext {
            wake: config.wake.clone(),
            relay: config.relay.clone(),
            admission,
            automation,
            registry: Arc::clone(&registry),
            limiter: Arc::clone(&limiter),
            shutdown: shutdown_tx.clone(),
            shutting_down: Arc::clone(&shutting_down),
        };

        let engines: Vec<Arc<RelayEngine>> = config
            .ports
            .iter()
            .map(|port| Arc::new(RelayEngine::new(port.clone(), &ctx)))
            .collect();

        info!(
            "Initialized {} relay engines on ports {:?}",
            engines.len(),
            engines.iter().map(|e| e.listen_port()).collect::<Vec<_>>()
        );

        Ok(Self {
            engines,
            registry,
            listen_address: config.relay.listen_address.clone(),
            limiter,
            max_connections: config.relay.max_connections,
            drain_timeout: config.relay.drain_timeout(),
            shutdown_tx,
            shutting_down,
        })
    }

    /// The episode lookup table the callback listener resolves through
    #[must_use]
    pub fn registry(&self) -> Arc<EpisodeRegistry> {
        Arc::clone(&self.registry)
    }

    /// A sender for the process-wide shutdown broadcast
    #[must_use]
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Engines, one per configured port
    #[must_use]
    pub fn engines(&self) -> &[Arc<RelayEngine>] {
        &self.engines
    }

    /// Bind each port's listener and spawn its relay loop
    ///
    /// # Errors
    ///
    /// Returns an error if any listener fails to bind; binding happens
    /// before any loop is spawned, so a port collision is a clean startup
    /// failure.
    pub async fn spawn_relay_loops(
        &self,
    ) -> Result<Vec<JoinHandle<Result<(), WakeRelayError>>>, WakeRelayError> {
        let mut bound = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            let addr = format!("{}:{}", self.listen_address, engine.listen_port());
            match TcpListener::bind(&addr).await {
                Ok(listener) => bound.push((Arc::clone(engine), listener)),
                Err(err) => {
                    error!(
                        port = engine.listen_port(),
                        "Failed to bind {}: {}", addr, err
                    );
                    return Err(RelayError::from(err).into());
                }
            }
        }

        Ok(bound
            .into_iter()
            .map(|(engine, listener)| tokio::spawn(run_relay_loop(engine, listener)))
            .collect())
    }

    /// Connections currently holding a limiter permit (queued or relaying)
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.limiter.available_permits()
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Initiate graceful shutdown
    ///
    /// Broadcasts the shutdown signal, then waits for in-flight connections
    /// to drain, bounded by the configured drain timeout. Calling it a
    /// second time is a no-op.
    pub async fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        info!("Initiating relay shutdown");
        let _ = self.shutdown_tx.send(());

        let drain_start = std::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        while drain_start.elapsed() < self.drain_timeout {
            let active = self.active_connections();
            if active == 0 {
                info!("All connections drained");
                return;
            }

            debug!(
                "Waiting for {} connections to drain ({:.1}s remaining)",
                active,
                (self.drain_timeout - drain_start.elapsed()).as_secs_f64()
            );

            tokio::time::sleep(check_interval).await;
        }

        let remaining = self.active_connections();
        if remaining > 0 {
            warn!(
                "Drain timeout reached with {} connections still active",
                remaining
            );
        }
    }

    /// Sum of all engines' statistics
    #[must_use]
    pub fn aggregate_stats(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for engine in &self.engines {
            total.merge(&engine.stats().snapshot());
        }
        total
    }
}
