//! Readiness callback listener
//!
//! A process-wide HTTP endpoint through which an external system can
//! resolve a port's in-flight wake episode without waiting on the prober.
//! The listener owns nothing but the episode registry — a lookup table of
//! port to resolution handle — so it can confirm or decline an episode but
//! never touch engine state directly.
//!
//! The body is read raw and parsed by hand: a malformed report must map to
//! the server-error side of the contract (500) rather than an extractor's
//! client-error rejection, and must never take the listener down.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::CallbackConfig;
use crate::error::CallbackError;
use crate::relay::{EpisodeFailure, EpisodeOutcome, EpisodeRegistry};

/// Report posted by the external system
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackReport {
    /// The listen port whose episode this resolves
    pub port: u16,
    /// `true` confirms the target is (or will be) up; `false` declines
    #[serde(rename = "continue")]
    pub proceed: bool,
}

/// Build the callback router over the shared episode registry
#[must_use]
pub fn router(registry: Arc<EpisodeRegistry>) -> Router {
    Router::new()
        .route("/", post(handle_report))
        .with_state(registry)
}

/// Bind the configured callback address
///
/// # Errors
///
/// Returns `CallbackError::BindError` when the address is unavailable;
/// this is a startup failure.
pub async fn bind(config: &CallbackConfig) -> Result<TcpListener, CallbackError> {
    let addr = config.bind_addr();
    TcpListener::bind(&addr)
        .await
        .map_err(|err| CallbackError::bind(addr, err.to_string()))
}

/// Serve callback reports until the shutdown broadcast fires
///
/// # Errors
///
/// Returns an error if the server loop fails; per-request errors are
/// answered with a status code and never propagate here.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<EpisodeRegistry>,
    shutdown: broadcast::Sender<()>,
) -> Result<(), CallbackError> {
    let local_addr = listener.local_addr()?;
    info!("Callback listener ready on {}", local_addr);

    let mut shutdown_rx = shutdown.subscribe();
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Callback listener stopping");
        })
        .await
        .map_err(CallbackError::from)
}

/// Accept a `{"port": N, "continue": bool}` report
///
/// Responses: 200 when the report addressed a port with an episode in
/// flight (even if something else already resolved it — the report is then
/// a no-op, not a second drain), 400 for a port with no in-flight episode,
/// 500 for a body that does not parse.
async fn handle_report(
    State(registry): State<Arc<EpisodeRegistry>>,
    body: Bytes,
) -> impl IntoResponse {
    let report: CallbackReport = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(err) => {
            warn!("Malformed callback report: {}", err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "malformed report");
        }
    };

    let outcome = if report.proceed {
        EpisodeOutcome::Confirmed
    } else {
        EpisodeOutcome::Failed(EpisodeFailure::CallbackDeclined)
    };

    match registry.resolve(report.port, outcome) {
        Some(true) => {
            info!(
                port = report.port,
                "Callback resolved episode (continue={})", report.proceed
            );
            (StatusCode::OK, "accepted")
        }
        Some(false) => {
            debug!(
                port = report.port,
                "Callback arrived after episode resolution"
            );
            (StatusCode::OK, "already resolved")
        }
        None => {
            warn!(
                port = report.port,
                "Callback for port with no wake episode in flight"
            );
            (StatusCode::BAD_REQUEST, "unknown port")
        }
    }
}
