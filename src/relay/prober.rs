//! Readiness prober
//!
//! Background polling loop that repeatedly attempts a short-timeout TCP
//! connection to a wake target until it answers or the probe deadline
//! elapses. The prober only ever talks to its episode through the one-shot
//! resolution signal, so a callback that beats it simply turns the rest of
//! the loop into a no-op.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::episode::{EpisodeFailure, EpisodeOutcome, EpisodeSignal};
use crate::config::WakeConfig;

/// Attempt a single probe connection
///
/// Returns `true` if the target accepted within `connect_timeout`. The probe
/// connection is closed immediately; it is never reused for relaying.
pub async fn probe_once(host: &str, port: u16, connect_timeout: Duration) -> bool {
    matches!(
        timeout(connect_timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Poll the target until it answers or the probe deadline elapses
///
/// Resolves the episode signal with `Confirmed` on the first successful
/// probe, or `Failed(ProbeTimeout)` once the deadline passes. Exits early
/// without probing further if something else resolved the episode first.
pub async fn probe_until_ready(
    listen_port: u16,
    target_host: &str,
    target_port: u16,
    wake: &WakeConfig,
    signal: &EpisodeSignal,
) {
    let start = Instant::now();
    let deadline = start + wake.probe_deadline();
    let mut attempts: u32 = 0;

    loop {
        if signal.is_resolved() {
            debug!(
                port = listen_port,
                "Prober exiting: episode already resolved after {} attempts", attempts
            );
            return;
        }

        if Instant::now() >= deadline {
            if signal.resolve(EpisodeOutcome::Failed(EpisodeFailure::ProbeTimeout)) {
                warn!(
                    port = listen_port,
                    "Target {}:{} not reachable after {} attempts ({}s)",
                    target_host,
                    target_port,
                    attempts,
                    wake.probe_deadline_secs
                );
            }
            return;
        }

        attempts += 1;
        if probe_once(target_host, target_port, wake.probe_connect_timeout()).await {
            if signal.resolve(EpisodeOutcome::Confirmed) {
                info!(
                    port = listen_port,
                    "Target {}:{} reachable after {} attempts ({:.1}s)",
                    target_host,
                    target_port,
                    attempts,
                    start.elapsed().as_secs_f64()
                );
            }
            return;
        }

        debug!(
            port = listen_port,
            "Probe attempt {} to {}:{} failed", attempts, target_host, target_port
        );
        sleep(wake.probe_interval()).await;
    }
}
