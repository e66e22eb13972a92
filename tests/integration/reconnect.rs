//! Fast-reconnect integration tests
//!
//! A client that disconnects and returns within the grace window connects
//! straight to the target, skipping queueing and wake episodes entirely.
//! When the direct connect fails, the client falls back into the normal
//! wake path; once the grace window has passed, reconnects are ordinary
//! arrivals again.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use wake_relay::admission::{AdmissionFilter, RegionLookup};
use wake_relay::config::{PortConfig, RelayConfig, WakeConfig};
use wake_relay::error::AdmissionError;
use wake_relay::relay::{run_relay_loop, EngineContext, EpisodeRegistry, RelayEngine};
use wake_relay::wake::AutomationCaller;

// ============================================================================
// Test Helpers
// ============================================================================

struct NoLookup;

#[async_trait::async_trait]
impl RegionLookup for NoLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<String, AdmissionError> {
        Err(AdmissionError::lookup_failed(ip, "not expected in this test"))
    }
}

fn test_context(wake: WakeConfig) -> EngineContext {
    let (shutdown, _) = broadcast::channel(8);
    EngineContext {
        wake,
        relay: RelayConfig {
            connect_timeout_secs: 2,
            ..RelayConfig::default()
        },
        admission: Arc::new(AdmissionFilter::new(Arc::new(NoLookup))),
        automation: Arc::new(AutomationCaller::new().unwrap()),
        registry: Arc::new(EpisodeRegistry::new()),
        limiter: Arc::new(Semaphore::new(64)),
        shutdown,
        shutting_down: Arc::new(AtomicBool::new(false)),
    }
}

fn port_config(listen_port: u16, target: SocketAddr) -> PortConfig {
    PortConfig {
        listen_port,
        target_host: target.ip().to_string(),
        target_port: target.port(),
        mac_address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
        automation: None,
        allowed_regions: Vec::new(),
    }
}

async fn start_engine(
    config: PortConfig,
    ctx: &EngineContext,
) -> (Arc<RelayEngine>, SocketAddr) {
    let engine = Arc::new(RelayEngine::new(config, ctx));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_relay_loop(Arc::clone(&engine), listener));
    (engine, addr)
}

fn spawn_echo_loop(listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    })
}

/// Echo target whose accept loop can be killed to free its port
async fn start_stoppable_echo() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = spawn_echo_loop(listener);
    (addr, handle)
}

/// Bring an echo target back up on the same address
async fn restart_echo_on(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    spawn_echo_loop(listener);
}

async fn roundtrip(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("relay did not deliver in time")
        .unwrap();
    assert_eq!(buf, payload);
}

async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("client was not closed");
    assert!(matches!(read, Ok(0) | Err(_)), "expected EOF or reset");
}

// ============================================================================
// Bypass Tests
// ============================================================================

/// A reconnect shortly after a disconnect relays immediately without a
/// second wake
#[tokio::test]
async fn test_quick_reconnect_relays_without_new_wake() {
    let wake = WakeConfig {
        probe_deadline_secs: 3,
        probe_interval_ms: 50,
        probe_connect_timeout_secs: 1,
        episode_deadline_secs: 5,
        trigger_cooldown_secs: 0,
        reconnect_grace_secs: 10,
    };
    let ctx = test_context(wake);
    let (target, _echo) = start_stoppable_echo().await;
    let (engine, relay_addr) = start_engine(port_config(9300, target), &ctx).await;

    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut first, b"session one").await;
    drop(first);
    sleep(Duration::from_millis(300)).await;

    let mut again = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut again, b"session two").await;

    assert_eq!(engine.stats().episodes_started(), 1);
    assert_eq!(engine.stats().relays_opened(), 2);
}

/// The full bypass story: a failed direct connect falls back into the wake
/// path, and a later in-grace reconnect bypasses even a not-ready port
#[tokio::test]
async fn test_bypass_fallback_then_direct_connect_while_not_ready() {
    let wake = WakeConfig {
        probe_deadline_secs: 1,
        probe_interval_ms: 50,
        probe_connect_timeout_secs: 1,
        episode_deadline_secs: 5,
        trigger_cooldown_secs: 0,
        reconnect_grace_secs: 10,
    };
    let ctx = test_context(wake);
    let (target, echo) = start_stoppable_echo().await;
    let (engine, relay_addr) = start_engine(port_config(9301, target), &ctx).await;

    // Phase 1: normal cycle establishes the grace window
    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut first, b"warmup").await;
    drop(first);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.stats().episodes_started(), 1);

    // Phase 2: the target goes away; an in-grace reconnect tries the direct
    // connect, fails, and falls back to founding a wake episode, which then
    // fails on the probe deadline
    echo.abort();
    sleep(Duration::from_millis(100)).await;

    let mut fallback = TcpStream::connect(relay_addr).await.unwrap();
    expect_closed(&mut fallback).await;
    assert_eq!(engine.stats().episodes_started(), 2);
    assert_eq!(engine.stats().episodes_failed(), 1);

    // Phase 3: the target returns; the port is not ready, but an in-grace
    // reconnect still connects directly without founding an episode
    restart_echo_on(target).await;
    let mut direct = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut direct, b"straight through").await;

    assert_eq!(engine.stats().episodes_started(), 2);
    assert_eq!(engine.stats().queued(), 2);
    assert_eq!(engine.stats().relays_opened(), 2);
}

/// Once the grace window has passed, a reconnect is an ordinary arrival
/// and founds a wake episode like any other
#[tokio::test]
async fn test_reconnect_after_grace_expiry_founds_new_episode() {
    let wake = WakeConfig {
        probe_deadline_secs: 1,
        probe_interval_ms: 50,
        probe_connect_timeout_secs: 1,
        episode_deadline_secs: 5,
        trigger_cooldown_secs: 0,
        reconnect_grace_secs: 2,
    };
    let ctx = test_context(wake);
    let (target, echo) = start_stoppable_echo().await;
    let (engine, relay_addr) = start_engine(port_config(9302, target), &ctx).await;

    // Normal cycle, then disconnect; the grace clock starts here
    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut first, b"warmup").await;
    drop(first);
    sleep(Duration::from_millis(300)).await;
    let disconnected_at = Instant::now();

    // Target down: a fallback client fails its episode, leaving the port
    // not ready (failed queue drops record no grace)
    echo.abort();
    sleep(Duration::from_millis(100)).await;
    let mut fallback = TcpStream::connect(relay_addr).await.unwrap();
    expect_closed(&mut fallback).await;
    assert_eq!(engine.stats().episodes_started(), 2);

    // Target back up, but wait out the grace window before reconnecting
    restart_echo_on(target).await;
    sleep_until(disconnected_at + Duration::from_millis(2500)).await;

    let mut late = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut late, b"woken again").await;

    // The late reconnect went through a full episode, not the bypass
    assert_eq!(engine.stats().episodes_started(), 3);
    assert_eq!(engine.stats().episodes_confirmed(), 2);
    assert_eq!(engine.stats().relays_opened(), 2);
}

/// The grace window covers both endpoints of a closed relay: an arrival
/// from the target machine's own address also bypasses the wake path
#[tokio::test]
async fn test_grace_covers_target_side_of_closed_relay() {
    let wake = WakeConfig {
        probe_deadline_secs: 1,
        probe_interval_ms: 50,
        probe_connect_timeout_secs: 1,
        episode_deadline_secs: 5,
        trigger_cooldown_secs: 0,
        reconnect_grace_secs: 10,
    };
    let ctx = test_context(wake);

    // The target gets its own loopback address, so its IP differs from the
    // 127.0.0.1 the clients connect from
    let listener = TcpListener::bind("127.0.0.2:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    let echo = spawn_echo_loop(listener);
    let (engine, relay_addr) = start_engine(port_config(9303, target), &ctx).await;

    // A normal cycle closes a relay whose endpoints are 127.0.0.1 and
    // 127.0.0.2
    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut first, b"warmup").await;
    drop(first);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.stats().episodes_started(), 1);

    // Knock the port out of ready: with the target down, a fallback client
    // fails its episode and the port returns to idle
    echo.abort();
    sleep(Duration::from_millis(100)).await;
    let mut fallback = TcpStream::connect(relay_addr).await.unwrap();
    expect_closed(&mut fallback).await;
    assert_eq!(engine.stats().episodes_started(), 2);

    // The target comes back and connects in from its own address; that IP
    // was the target end of the closed relay, so it is inside the grace
    // window and splices directly without founding an episode
    restart_echo_on(target).await;
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.2:0".parse().unwrap()).unwrap();
    let mut from_target = socket.connect(relay_addr).await.unwrap();
    roundtrip(&mut from_target, b"target came back").await;

    assert_eq!(engine.stats().episodes_started(), 2);
    assert_eq!(engine.stats().relays_opened(), 2);
}
