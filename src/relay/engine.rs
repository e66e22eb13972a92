//! Per-port relay engine
//!
//! Each configured port gets one `RelayEngine`. The engine owns the port's
//! entire mutable state — readiness, the pending queue, the in-flight
//! episode, the trigger cooldown, and the disconnect memory — behind a
//! single lock, so queue drains and readiness flips are atomic with respect
//! to newly admitted connections.
//!
//! State machine per port:
//!
//! ```text
//!          first admitted connection
//!   IDLE ────────────────────────────> WAKING ──confirmed──> READY
//!    ^                                   │                     │
//!    │        probe timeout / declined / │      target connect │
//!    └───────────────── expired ─────────┘ <────── failed ─────┘
//! ```
//!
//! Latent work (admission lookup, automation call, probing, waiting on the
//! callback) always runs in per-connection or per-episode tasks; the accept
//! loop itself never blocks on any of it.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::episode::{EpisodeFailure, EpisodeOutcome, EpisodeRegistry, EpisodeSignal};
use super::prober::probe_until_ready;
use super::stats::RelayStats;
use crate::admission::AdmissionFilter;
use crate::config::{PortConfig, RelayConfig, WakeConfig};
use crate::error::{RelayError, WakeRelayError};
use crate::io::{clamp_buffer_size, splice_with_buffer};
use crate::wake::{send_wake_signal, AutomationCaller, TriggerCooldown};

/// Collaborators shared by every engine in the process
#[derive(Clone)]
pub struct EngineContext {
    /// Wake episode timing knobs
    pub wake: WakeConfig,
    /// Relay limits and buffer sizing
    pub relay: RelayConfig,
    /// Region admission policy
    pub admission: Arc<AdmissionFilter>,
    /// Automation trigger client
    pub automation: Arc<AutomationCaller>,
    /// Port -> in-flight episode table shared with the callback listener
    pub registry: Arc<EpisodeRegistry>,
    /// Global connection limiter
    pub limiter: Arc<Semaphore>,
    /// Shutdown broadcast channel
    pub shutdown: broadcast::Sender<()>,
    /// Set once shutdown has been initiated
    pub shutting_down: Arc<AtomicBool>,
}

/// Mutable per-port state, guarded by the engine's exclusive lock
struct PortState {
    /// Target confirmed reachable
    ready: bool,
    /// In-flight wake episode; at most one at a time
    episode: Option<Arc<EpisodeSignal>>,
    /// Clients held until the episode resolves
    queue: VecDeque<QueuedClient>,
    /// Suppresses repeat automation calls after a success
    cooldown: TriggerCooldown,
    /// Relay endpoint IP -> last disconnect, feeding the fast-reconnect
    /// bypass
    disconnects: HashMap<IpAddr, Instant>,
}

/// A held client connection together with its connection-limit permit
struct QueuedClient {
    stream: TcpStream,
    peer: SocketAddr,
    permit: OwnedSemaphorePermit,
    queued_at: Instant,
}

/// Handed to the connection that founded a new episode
struct FoundedEpisode {
    signal: Arc<EpisodeSignal>,
    rx: oneshot::Receiver<EpisodeOutcome>,
    call_automation: bool,
}

/// Routing decision taken under the state lock
enum Routed {
    /// Target is ready; splice in the caller's own task
    SpliceNow(TcpStream, OwnedSemaphorePermit),
    /// Connection joined the pending queue; `Some` if it founded the episode
    Queued(Option<FoundedEpisode>),
}

/// The per-port relay engine
pub struct RelayEngine {
    port: PortConfig,
    wake: WakeConfig,
    relay: RelayConfig,
    admission: Arc<AdmissionFilter>,
    automation: Arc<AutomationCaller>,
    registry: Arc<EpisodeRegistry>,
    limiter: Arc<Semaphore>,
    shutdown: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    stats: Arc<RelayStats>,
    state: Mutex<PortState>,
}

impl RelayEngine {
    /// Create an engine for one configured port
    #[must_use]
    pub fn new(port: PortConfig, ctx: &EngineContext) -> Self {
        let cooldown = TriggerCooldown::new(ctx.wake.trigger_cooldown());
        Self {
            port,
            wake: ctx.wake.clone(),
            relay: ctx.relay.clone(),
            admission: Arc::clone(&ctx.admission),
            automation: Arc::clone(&ctx.automation),
            registry: Arc::clone(&ctx.registry),
            limiter: Arc::clone(&ctx.limiter),
            shutdown: ctx.shutdown.clone(),
            shutting_down: Arc::clone(&ctx.shutting_down),
            stats: Arc::new(RelayStats::new()),
            state: Mutex::new(PortState {
                ready: false,
                episode: None,
                queue: VecDeque::new(),
                cooldown,
                disconnects: HashMap::new(),
            }),
        }
    }

    /// The port this engine listens on
    #[must_use]
    pub fn listen_port(&self) -> u16 {
        self.port.listen_port
    }

    /// Target endpoint as "host:port"
    #[must_use]
    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.port.target_host, self.port.target_port)
    }

    /// This engine's statistics
    #[must_use]
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Handle one accepted connection end to end
    ///
    /// Runs in the connection's own task. Applies backpressure and
    /// admission, then routes the connection through the readiness state
    /// machine; returns once the connection is relayed, queued, or closed.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection was not relayed or queued:
    /// limit reached, admission denied, or shutdown in progress.
    pub async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), WakeRelayError> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(RelayError::ShuttingDown.into());
        }

        let permit = match Arc::clone(&self.limiter).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.record_rejected();
                let current = self.relay.max_connections - self.limiter.available_permits();
                warn!(
                    port = self.port.listen_port,
                    "Connection limit reached ({}/{}), rejecting {}",
                    current,
                    self.relay.max_connections,
                    peer
                );
                return Err(
                    RelayError::limit_reached(current, self.relay.max_connections).into(),
                );
            }
        };

        self.stats.record_accepted();
        debug!(
            port = self.port.listen_port,
            "Accepted connection from {} ({}/{} slots in use)",
            peer,
            self.relay.max_connections - self.limiter.available_permits(),
            self.relay.max_connections
        );

        if let Err(err) = self.admission.check(peer.ip(), &self.port).await {
            self.stats.record_denied();
            warn!(
                port = self.port.listen_port,
                "Connection from {} denied: {}", peer, err
            );
            return Err(err.into());
        }
        self.stats.record_admitted();

        // Fast-reconnect bypass: a client that disconnected moments ago
        // very likely finds the target still warm, so skip the episode and
        // try the target directly. A refused connect falls back to the
        // normal wake path instead of dropping the client.
        if self.within_reconnect_grace(peer.ip()) {
            debug!(
                port = self.port.listen_port,
                "Client {} back within grace window, attempting direct splice", peer
            );
            match self.connect_target().await {
                Ok(target) => {
                    let span = self.relay_span(peer);
                    self.run_splice(stream, peer, target, permit)
                        .instrument(span)
                        .await;
                    return Ok(());
                }
                Err(err) => {
                    debug!(
                        port = self.port.listen_port,
                        "Direct splice for {} failed ({}), entering wake path", peer, err
                    );
                }
            }
        }

        self.route_connection(stream, peer, permit).await;
        Ok(())
    }

    /// Route an admitted connection through the readiness state machine
    async fn route_connection(
        self: &Arc<Self>,
        mut stream: TcpStream,
        peer: SocketAddr,
        mut permit: OwnedSemaphorePermit,
    ) {
        loop {
            match self.route(stream, peer, permit) {
                Routed::SpliceNow(s, p) => match self.connect_target().await {
                    Ok(target) => {
                        let span = self.relay_span(peer);
                        self.run_splice(s, peer, target, p).instrument(span).await;
                        return;
                    }
                    Err(err) => {
                        // Target went down after confirmation. Clear
                        // readiness and loop: this connection becomes the
                        // first waiter of the next wake episode.
                        warn!(
                            port = self.port.listen_port,
                            "Target {} unreachable while ready ({}), re-entering wake path",
                            self.target_addr(),
                            err
                        );
                        self.state.lock().ready = false;
                        stream = s;
                        permit = p;
                    }
                },
                Routed::Queued(Some(founding)) => {
                    self.spawn_episode_driver(founding);
                    return;
                }
                Routed::Queued(None) => {
                    debug!(
                        port = self.port.listen_port,
                        "Client {} joined in-flight wake episode", peer
                    );
                    return;
                }
            }
        }
    }

    /// Decide under the state lock where a connection goes
    ///
    /// Drain atomicity lives here: a connection either observes `ready` and
    /// splices immediately, or lands in the queue before the episode's
    /// drain snapshot — it can never fall between the two.
    fn route(&self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) -> Routed {
        let mut state = self.state.lock();
        if state.ready {
            return Routed::SpliceNow(stream, permit);
        }

        state.queue.push_back(QueuedClient {
            stream,
            peer,
            permit,
            queued_at: Instant::now(),
        });
        self.stats.record_queued();

        if state.episode.is_some() {
            return Routed::Queued(None);
        }

        let (signal, rx) = EpisodeSignal::new();
        state.episode = Some(Arc::clone(&signal));
        let call_automation = self.port.automation.is_some() && state.cooldown.elapsed();
        self.registry
            .register(self.port.listen_port, Arc::clone(&signal));

        Routed::Queued(Some(FoundedEpisode {
            signal,
            rx,
            call_automation,
        }))
    }

    /// Spawn the driver task for a freshly founded episode
    fn spawn_episode_driver(self: &Arc<Self>, founding: FoundedEpisode) {
        let engine = Arc::clone(self);
        let span = info_span!("episode", port = self.port.listen_port);
        tokio::spawn(async move { engine.drive_episode(founding).await }.instrument(span));
    }

    /// Drive one wake episode: trigger, wake signal, prober, settle
    async fn drive_episode(self: Arc<Self>, founding: FoundedEpisode) {
        let FoundedEpisode {
            signal,
            mut rx,
            call_automation,
        } = founding;
        let port = self.port.listen_port;
        let started = Instant::now();
        // Subscribe before the automation call so a shutdown broadcast sent
        // while the call is in flight is not missed.
        let mut shutdown_rx = self.shutdown.subscribe();

        self.stats.record_episode_started();
        info!(port, "Wake episode started for target {}", self.target_addr());

        // Automation first: a failed trigger call fails the episode outright
        // before any wake signal or prober is spent on it.
        let mut trigger_failed = false;
        if call_automation {
            if let Some(automation) = self.port.automation.as_ref() {
                match self.automation.trigger(port, automation).await {
                    Ok(()) => self.state.lock().cooldown.record_success(),
                    Err(err) => {
                        warn!(port, "Wake episode failed: {}", err);
                        signal.resolve(EpisodeOutcome::Failed(EpisodeFailure::TriggerCall));
                        trigger_failed = true;
                    }
                }
            }
        } else if self.port.automation.is_some() {
            debug!(port, "Automation call suppressed by cooldown");
        }

        if !trigger_failed {
            send_wake_signal(self.port.mac_address);

            let prober_signal = Arc::clone(&signal);
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                probe_until_ready(
                    engine.port.listen_port,
                    &engine.port.target_host,
                    engine.port.target_port,
                    &engine.wake,
                    &prober_signal,
                )
                .await;
            });
        }

        // First resolution wins: prober, callback, the episode deadline, or
        // shutdown. The deadline and shutdown arms go through the signal too,
        // so a photo-finish with a real resolution still yields its outcome.
        let outcome = tokio::select! {
            resolved = &mut rx => resolved.unwrap_or(EpisodeOutcome::Failed(EpisodeFailure::Expired)),
            () = tokio::time::sleep(self.wake.episode_deadline()) => {
                if signal.resolve(EpisodeOutcome::Failed(EpisodeFailure::Expired)) {
                    EpisodeOutcome::Failed(EpisodeFailure::Expired)
                } else {
                    rx.await.unwrap_or(EpisodeOutcome::Failed(EpisodeFailure::Expired))
                }
            }
            _ = shutdown_rx.recv() => {
                if signal.resolve(EpisodeOutcome::Failed(EpisodeFailure::Shutdown)) {
                    EpisodeOutcome::Failed(EpisodeFailure::Shutdown)
                } else {
                    rx.await.unwrap_or(EpisodeOutcome::Failed(EpisodeFailure::Shutdown))
                }
            }
        };

        self.registry.deregister(port);

        match outcome {
            EpisodeOutcome::Confirmed => {
                self.stats.record_episode_confirmed();
                self.drain_queue(started).await;
            }
            EpisodeOutcome::Failed(reason) => {
                self.stats.record_episode_failed();
                let waiters = self.fail_queue();
                warn!(
                    port,
                    "Wake episode failed after {:.1}s ({}), closing {} queued connections",
                    started.elapsed().as_secs_f64(),
                    reason,
                    waiters.len()
                );
                // Dropping the waiters closes their sockets and releases
                // their permits.
                drop(waiters);
            }
        }
    }

    /// Flip readiness and splice every queued client, FIFO
    async fn drain_queue(self: &Arc<Self>, started: Instant) {
        let port = self.port.listen_port;
        let waiters = {
            let mut state = self.state.lock();
            state.ready = true;
            state.episode = None;
            std::mem::take(&mut state.queue)
        };

        info!(
            port,
            "Target confirmed after {:.1}s, draining {} queued connections",
            started.elapsed().as_secs_f64(),
            waiters.len()
        );

        for client in waiters {
            // Target connections open strictly in queue order; the relays
            // themselves then run concurrently.
            match self.connect_target().await {
                Ok(target) => {
                    let engine = Arc::clone(self);
                    let span = self.relay_span(client.peer);
                    tokio::spawn(
                        async move {
                            engine
                                .run_splice(client.stream, client.peer, target, client.permit)
                                .await;
                        }
                        .instrument(span),
                    );
                }
                Err(err) => {
                    warn!(
                        port,
                        "Closing queued client {} after {:.1}s in queue: {}",
                        client.peer,
                        client.queued_at.elapsed().as_secs_f64(),
                        err
                    );
                }
            }
        }
    }

    /// Close out a failed episode, returning the waiters for teardown
    fn fail_queue(&self) -> VecDeque<QueuedClient> {
        let mut state = self.state.lock();
        state.ready = false;
        state.episode = None;
        std::mem::take(&mut state.queue)
    }

    /// Relay bytes between a client and a fresh target connection
    ///
    /// The pair lives and dies together: the first EOF or error on either
    /// side tears both down, and both endpoints' disconnect timestamps
    /// feed the fast-reconnect bypass.
    async fn run_splice(
        self: &Arc<Self>,
        mut client: TcpStream,
        peer: SocketAddr,
        mut target: TcpStream,
        permit: OwnedSemaphorePermit,
    ) {
        let _permit = permit;
        let guard = self.stats.relay_guard();
        let buffer_size = clamp_buffer_size(self.relay.buffer_size);
        // Captured while the socket is still connected; teardown needs it.
        let target_peer = target.peer_addr().ok();
        let mut shutdown_rx = self.shutdown.subscribe();

        debug!(
            port = self.port.listen_port,
            "Relaying {} <-> {}",
            peer,
            self.target_addr()
        );

        let result = tokio::select! {
            result = splice_with_buffer(&mut client, &mut target, buffer_size) => Some(result),
            _ = shutdown_rx.recv() => None,
        };

        match result {
            Some(Ok(counts)) => {
                debug!(
                    port = self.port.listen_port,
                    "Relay for {} closed ({} bytes up, {} bytes down)",
                    peer,
                    counts.client_to_target,
                    counts.target_to_client
                );
                guard.complete(counts.client_to_target, counts.target_to_client);
            }
            Some(Err(err)) => {
                debug!(
                    port = self.port.listen_port,
                    "Relay for {} ended with transport error: {}", peer, err
                );
                guard.error();
            }
            None => {
                debug!(
                    port = self.port.listen_port,
                    "Relay for {} aborted by shutdown", peer
                );
                return;
            }
        }

        // The grace window covers both endpoints of the closed pair.
        self.note_disconnect(peer.ip());
        if let Some(addr) = target_peer {
            self.note_disconnect(addr.ip());
        }
    }

    /// Open a fresh connection to the configured target
    async fn connect_target(&self) -> Result<TcpStream, RelayError> {
        let (host, port) = self.port.target();
        match timeout(self.relay.connect_timeout(), TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                Ok(stream)
            }
            Ok(Err(err)) => Err(RelayError::target_connect(
                self.target_addr(),
                err.to_string(),
            )),
            Err(_) => Err(RelayError::connect_timeout(
                self.target_addr(),
                self.relay.connect_timeout_secs,
            )),
        }
    }

    /// Record a relay endpoint disconnect for the fast-reconnect bypass
    fn note_disconnect(&self, ip: IpAddr) {
        self.state.lock().disconnects.insert(ip, Instant::now());
    }

    /// Whether this IP was an endpoint of a relay closed within the grace
    /// window
    fn within_reconnect_grace(&self, ip: IpAddr) -> bool {
        self.state
            .lock()
            .disconnects
            .get(&ip)
            .is_some_and(|at| at.elapsed() < self.wake.reconnect_grace())
    }

    fn relay_span(&self, peer: SocketAddr) -> tracing::Span {
        info_span!("relay", port = self.port.listen_port, client = %peer)
    }
}

/// Run the accept loop for one engine
///
/// Accepts until shutdown; every accepted connection is handled in its own
/// task so admission lookups and wake waits never block the loop or any
/// other port's loop.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
/// Per-connection failures are logged and do not end the loop.
pub async fn run_relay_loop(
    engine: Arc<RelayEngine>,
    listener: TcpListener,
) -> Result<(), WakeRelayError> {
    let local_addr = listener.local_addr().map_err(RelayError::from)?;
    info!(
        port = engine.listen_port(),
        "Relay listening on {} for target {}",
        local_addr,
        engine.target_addr()
    );

    let mut shutdown_rx = engine.shutdown.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        if let Err(err) = engine.handle_connection(stream, peer).await {
                            debug!(
                                port = engine.listen_port(),
                                "Connection from {} not relayed: {}", peer, err
                            );
                        }
                    });
                }
                Err(err) => {
                    let err = RelayError::from(err);
                    if err.is_recoverable() {
                        warn!(port = engine.listen_port(), "Recoverable accept error: {}", err);
                        continue;
                    }
                    error!(port = engine.listen_port(), "Fatal accept error: {}", err);
                    return Err(err.into());
                }
            },
            _ = shutdown_rx.recv() => {
                info!(port = engine.listen_port(), "Relay loop stopping");
                break;
            }
        }
    }

    Ok(())
}
