//! Wake episode integration tests
//!
//! Drives live relay listeners with real TCP clients against mock targets
//! and automation servers, covering the full episode lifecycle:
//! queue accumulation, probing, drain ordering, and failure handling.
//!
//! # Test Categories
//!
//! 1. **Cold Target**: Clients queue, the target comes up, everyone relays
//! 2. **Drain Order**: Queued clients reach the target in arrival order
//! 3. **Episode Sharing**: Later clients never re-trigger the automation
//! 4. **Trigger Cooldown**: A successful call stays valid across episodes;
//!    a failed one is retried immediately
//! 5. **Failure**: Failed automation calls and probe deadlines close the queue

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use wake_relay::admission::{AdmissionFilter, RegionLookup};
use wake_relay::config::{AutomationConfig, PortConfig, RelayConfig, WakeConfig};
use wake_relay::error::AdmissionError;
use wake_relay::relay::{run_relay_loop, EngineContext, EpisodeRegistry, RelayEngine};
use wake_relay::wake::AutomationCaller;

// ============================================================================
// Test Helpers
// ============================================================================

/// Lookup that must never be consulted; loopback clients skip admission
struct NoLookup;

#[async_trait::async_trait]
impl RegionLookup for NoLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<String, AdmissionError> {
        Err(AdmissionError::lookup_failed(ip, "not expected in this test"))
    }
}

fn fast_wake_config() -> WakeConfig {
    WakeConfig {
        probe_deadline_secs: 3,
        probe_interval_ms: 50,
        probe_connect_timeout_secs: 1,
        episode_deadline_secs: 5,
        trigger_cooldown_secs: 0,
        reconnect_grace_secs: 10,
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

/// Spawn an engine on an ephemeral loopback listener
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

/// Reserve a loopback address that nothing is listening on yet
async fn reserved_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn spawn_echo(listener: TcpListener) -> JoinHandle<()> {
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

/// Bring an echo target up on a previously reserved address
async fn start_echo_on(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    spawn_echo(listener);
}

/// Echo target whose accept loop can be killed to take the target down
async fn start_stoppable_echo_on(addr: SocketAddr) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();
    spawn_echo(listener)
}

/// Target that writes its accept index as one byte, then closes
async fn start_sequence_server_on(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let mut index = 0u8;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let _ = socket.write_all(&[index]).await;
            index = index.wrapping_add(1);
        }
    });
}

/// Automation endpoint that counts trigger calls and returns 200
async fn start_counting_automation(calls: Arc<AtomicUsize>) -> String {
    start_automation_stub(calls, StatusCode::OK).await
}

/// Automation endpoint that counts trigger calls and fails every one
async fn start_failing_automation(calls: Arc<AtomicUsize>) -> String {
    start_automation_stub(calls, StatusCode::SERVICE_UNAVAILABLE).await
}

async fn start_automation_stub(calls: Arc<AtomicUsize>, status: StatusCode) -> String {
    let app = Router::new().route(
        "/api/services/automation/trigger",
        post(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                (status, "{}")
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
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

// ============================================================================
// Cold Target Tests
// ============================================================================

/// Clients arriving while the target is down queue up, share one wake
/// episode, and all relay once the prober confirms readiness
#[tokio::test]
async fn test_cold_target_queues_then_relays_after_wake() {
    let ctx = test_context(fast_wake_config());
    let target = reserved_addr().await;
    let (engine, relay_addr) = start_engine(port_config(9100, target), &ctx).await;

    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    let mut second = TcpStream::connect(relay_addr).await.unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.stats().queued(), 2);
    assert_eq!(engine.stats().episodes_started(), 1);
    assert_eq!(engine.stats().relays_opened(), 0);

    // The target boots; the next probe confirms and the queue drains
    start_echo_on(target).await;

    roundtrip(&mut first, b"hello").await;
    roundtrip(&mut second, b"again").await;

    assert_eq!(engine.stats().episodes_confirmed(), 1);
    assert_eq!(engine.stats().relays_opened(), 2);

    // Byte totals land when the relays close
    drop(first);
    drop(second);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.stats().relays_completed(), 2);
    assert_eq!(engine.stats().bytes_client_to_target(), 10);
    assert_eq!(engine.stats().bytes_target_to_client(), 10);
}

/// Once an episode has confirmed, later clients splice immediately and no
/// new episode is founded
#[tokio::test]
async fn test_ready_port_relays_immediately_without_new_episode() {
    let ctx = test_context(fast_wake_config());
    let target = reserved_addr().await;
    start_echo_on(target).await;
    let (engine, relay_addr) = start_engine(port_config(9101, target), &ctx).await;

    // First client founds the episode; the target is already up so the
    // first probe confirms it
    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut first, b"warmup").await;
    assert_eq!(engine.stats().episodes_started(), 1);

    // Keep the first client open so no reconnect grace is recorded; the
    // second client must ride the readiness state alone
    let mut second = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut second, b"direct").await;

    assert_eq!(engine.stats().queued(), 1);
    assert_eq!(engine.stats().episodes_started(), 1);
    assert_eq!(engine.stats().relays_opened(), 2);
}

// ============================================================================
// Drain Order Tests
// ============================================================================

/// Queued clients are connected to the target in arrival order
#[tokio::test]
async fn test_queued_clients_drain_in_arrival_order() {
    let ctx = test_context(fast_wake_config());
    let target = reserved_addr().await;
    let (engine, relay_addr) = start_engine(port_config(9102, target), &ctx).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(relay_addr).await.unwrap());
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(engine.stats().queued(), 3);

    // The sequence server tags each accepted connection with its index
    start_sequence_server_on(target).await;

    for (expected, client) in clients.iter_mut().enumerate() {
        let mut buf = [0u8; 1];
        timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .expect("drain did not reach this client")
            .unwrap();
        assert_eq!(buf[0] as usize, expected, "client drained out of order");
    }
}

// ============================================================================
// Episode Sharing Tests
// ============================================================================

/// A client arriving mid-episode joins the pending queue without a second
/// automation call
#[tokio::test]
async fn test_second_client_joins_episode_without_second_trigger() {
    let calls = Arc::new(AtomicUsize::new(0));
    let endpoint = start_counting_automation(Arc::clone(&calls)).await;

    let ctx = test_context(fast_wake_config());
    let target = reserved_addr().await;
    let mut config = port_config(9103, target);
    config.automation = Some(AutomationConfig {
        endpoint,
        token: "secret-token".into(),
        automation_id: "automation.wake_server".into(),
    });
    let (engine, relay_addr) = start_engine(config, &ctx).await;

    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    let mut second = TcpStream::connect(relay_addr).await.unwrap();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(engine.stats().queued(), 2);
    assert_eq!(engine.stats().episodes_started(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    start_echo_on(target).await;
    roundtrip(&mut first, b"one").await;
    roundtrip(&mut second, b"two").await;

    // Still exactly one trigger for the whole episode
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Trigger Cooldown Tests
// ============================================================================

/// A successful trigger call stays valid for the cooldown window: a second
/// episode founded while the window runs skips the automation call entirely
#[tokio::test]
async fn test_cooldown_suppresses_trigger_across_episodes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let endpoint = start_counting_automation(Arc::clone(&calls)).await;

    let wake = WakeConfig {
        probe_deadline_secs: 1,
        trigger_cooldown_secs: 300,
        reconnect_grace_secs: 0,
        ..fast_wake_config()
    };
    let ctx = test_context(wake);
    let target = reserved_addr().await;
    let echo = start_stoppable_echo_on(target).await;
    let mut config = port_config(9106, target);
    config.automation = Some(AutomationConfig {
        endpoint,
        token: "secret-token".into(),
        automation_id: "automation.wake_server".into(),
    });
    let (engine, relay_addr) = start_engine(config, &ctx).await;

    // First episode: the call succeeds and stamps the cooldown
    let mut first = TcpStream::connect(relay_addr).await.unwrap();
    roundtrip(&mut first, b"warmup").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(first);

    // The target drops out; the next client finds the ready port stale and
    // founds a second episode, whose automation call the cooldown swallows
    echo.abort();
    sleep(Duration::from_millis(100)).await;
    let mut second = TcpStream::connect(relay_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(5), second.read(&mut buf))
        .await
        .expect("queued client was not closed on probe deadline");
    assert!(matches!(read, Ok(0) | Err(_)));

    assert_eq!(engine.stats().episodes_started(), 2);
    assert_eq!(engine.stats().episodes_failed(), 1);
    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "second episode must not re-trigger within the cooldown window"
    );
}

/// A failed trigger call never populates the cooldown, so the very next
/// arrival retries the call immediately
#[tokio::test]
async fn test_failed_trigger_call_is_retried_despite_cooldown() {
    let calls = Arc::new(AtomicUsize::new(0));
    let endpoint = start_failing_automation(Arc::clone(&calls)).await;

    let wake = WakeConfig {
        trigger_cooldown_secs: 300,
        reconnect_grace_secs: 0,
        ..fast_wake_config()
    };
    let ctx = test_context(wake);
    let target = reserved_addr().await;
    let mut config = port_config(9107, target);
    config.automation = Some(AutomationConfig {
        endpoint,
        token: "secret-token".into(),
        automation_id: "automation.wake_server".into(),
    });
    let (engine, relay_addr) = start_engine(config, &ctx).await;

    // Each client founds its own episode and each episode calls the
    // automation again, cooldown window notwithstanding
    for expected_calls in 1..=2 {
        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("client was not closed on trigger failure");
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
    }

    assert_eq!(engine.stats().episodes_started(), 2);
    assert_eq!(engine.stats().episodes_failed(), 2);
}

// ============================================================================
// Failure Tests
// ============================================================================

/// A failed automation call fails the episode outright; queued clients are
/// closed and the port returns to idle
#[tokio::test]
async fn test_failed_automation_call_fails_episode_and_closes_queue() {
    let ctx = test_context(fast_wake_config());
    let target = reserved_addr().await;
    let mut config = port_config(9104, target);
    // Nothing listens here; the trigger call fails fast
    config.automation = Some(AutomationConfig {
        endpoint: "http://127.0.0.1:1".into(),
        token: "secret-token".into(),
        automation_id: "automation.wake_server".into(),
    });
    let (engine, relay_addr) = start_engine(config, &ctx).await;

    let mut client = TcpStream::connect(relay_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("queued client was not closed");
    assert!(matches!(read, Ok(0) | Err(_)), "expected EOF or reset");

    assert_eq!(engine.stats().episodes_failed(), 1);
    assert_eq!(engine.stats().episodes_confirmed(), 0);
    assert_eq!(engine.stats().relays_opened(), 0);
}

/// When the probe deadline elapses the episode fails, and the next arrival
/// founds a fresh episode
#[tokio::test]
async fn test_probe_deadline_failure_resets_port_to_idle() {
    let wake = WakeConfig {
        probe_deadline_secs: 1,
        ..fast_wake_config()
    };
    let ctx = test_context(wake);
    let target = reserved_addr().await;
    let (engine, relay_addr) = start_engine(port_config(9105, target), &ctx).await;

    let mut client = TcpStream::connect(relay_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("queued client was not closed on probe deadline");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(engine.stats().episodes_failed(), 1);

    // The port is idle again: a new client founds a new episode
    let _retry = TcpStream::connect(relay_addr).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.stats().episodes_started(), 2);
}
