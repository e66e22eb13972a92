//! wake-relay: Wake-on-LAN triggered, admission-gated TCP relay
//!
//! This is the main entry point for the relay daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./wake-relay
//!
//! # Run with custom configuration
//! ./wake-relay -c /path/to/config.json
//!
//! # Run with environment overrides
//! WAKE_RELAY_LOG_LEVEL=debug ./wake-relay
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use wake_relay::callback;
use wake_relay::config::{load_config_with_env, Config};
use wake_relay::relay::RelayOrchestrator;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/wake-relay/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("wake-relay v{}", wake_relay::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"wake-relay v{}

Wake-on-LAN triggered, admission-gated TCP relay.

USAGE:
    wake-relay [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/wake-relay/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    WAKE_RELAY_LISTEN_ADDR      Override the per-port bind address
    WAKE_RELAY_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    WAKE_RELAY_MAX_CONNECTIONS  Override maximum connections
    WAKE_RELAY_CALLBACK_PORT    Override the readiness callback port

EXAMPLE:
    # Generate a starting configuration
    wake-relay -g -c /etc/wake-relay/config.json

    # Run the relay
    wake-relay -c /etc/wake-relay/config.json

    # Confirm a wake from the outside instead of waiting on the prober
    curl -X POST http://127.0.0.1:8080/ \
        -H 'Content-Type: application/json' \
        -d '{{"port": 9000, "continue": true}}'
"#,
        wake_relay::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("tokio=warn".parse().unwrap());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_span_events(FmtSpan::CLOSE);

    match (config.log.format.as_str(), config.log.timestamps) {
        ("json", true) => subscriber.json().init(),
        ("json", false) => subscriber.without_time().json().init(),
        (_, true) => subscriber.init(),
        (_, false) => subscriber.without_time().init(),
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        wake_relay::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // Load configuration
    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config);

    info!("wake-relay v{}", wake_relay::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    // One engine per configured port, sharing admission, limits, and shutdown
    let orchestrator = RelayOrchestrator::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize relay: {}", e))?;

    let relay_handles = orchestrator
        .spawn_relay_loops()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start relay listeners: {}", e))?;

    // Readiness callback listener (optional)
    let callback_handle = if config.callback.enabled {
        let listener = callback::bind(&config.callback)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind callback listener: {}", e))?;
        let registry = orchestrator.registry();
        let shutdown = orchestrator.shutdown_sender();
        Some(tokio::spawn(async move {
            if let Err(e) = callback::serve(listener, registry, shutdown).await {
                error!("Callback listener error: {}", e);
            }
        }))
    } else {
        info!("Callback listener disabled");
        None
    };

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    // Wait for a shutdown signal; the relay loops run as background tasks
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Graceful shutdown
    info!("Shutting down...");

    // Stop accepting, resolve in-flight episodes, drain relays
    orchestrator.shutdown().await;

    // Relay loops break on the shutdown broadcast
    for handle in relay_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    if let Some(handle) = callback_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    // Log final stats across all ports
    let stats = orchestrator.aggregate_stats();
    info!(
        "Final relay stats: {} accepted, {} denied, {} rejected, {} episodes ({} confirmed, {} failed)",
        stats.accepted,
        stats.denied,
        stats.rejected,
        stats.episodes_started,
        stats.episodes_confirmed,
        stats.episodes_failed
    );
    info!(
        "Transferred: {} bytes client-to-target, {} bytes target-to-client",
        stats.bytes_client_to_target, stats.bytes_target_to_client
    );

    info!("Shutdown complete");

    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
