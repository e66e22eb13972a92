//! Automation trigger client
//!
//! Single synchronous call asking an external automation service (Home
//! Assistant style) to bring the target up. The caller only consumes the
//! boolean outcome: any non-success status or transport error is failure,
//! which fails the whole wake episode immediately.

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::AutomationConfig;
use crate::error::{ConfigError, WakeError};

/// Automation call timeout
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Service path for triggering an automation
const TRIGGER_PATH: &str = "/api/services/automation/trigger";

/// HTTP client for the automation trigger endpoint
pub struct AutomationCaller {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl AutomationCaller {
    /// Build the caller
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::TlsError` if the native root store cannot be
    /// loaded.
    pub fn new() -> Result<Self, ConfigError> {
        // Install rustls crypto provider if not already installed
        let _ = rustls::crypto::ring::default_provider().install_default();

        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ConfigError::TlsError(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build(https),
        })
    }

    /// Trigger the configured automation for `port`
    ///
    /// # Errors
    ///
    /// Returns `WakeError::TriggerCallFailed` on any transport error,
    /// timeout, or non-2xx status.
    pub async fn trigger(&self, port: u16, config: &AutomationConfig) -> Result<(), WakeError> {
        let uri = format!("{}{}", config.endpoint.trim_end_matches('/'), TRIGGER_PATH);
        let body = json!({ "entity_id": config.automation_id }).to_string();

        debug!(port, entity = %config.automation_id, "Triggering automation: {}", uri);

        let req = Request::builder()
            .method("POST")
            .uri(&uri)
            .header("Authorization", format!("Bearer {}", config.token))
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| WakeError::trigger_failed(port, e.to_string()))?;

        let resp = tokio::time::timeout(CALL_TIMEOUT, self.client.request(req))
            .await
            .map_err(|_| WakeError::trigger_failed(port, "call timeout"))?
            .map_err(|e| WakeError::trigger_failed(port, e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(port, "Automation call succeeded ({})", status);
            Ok(())
        } else {
            // Drain the body so the connection can be reused
            let _ = resp.into_body().collect().await;
            warn!(port, "Automation call failed with status {}", status);
            Err(WakeError::trigger_failed(port, format!("status {status}")))
        }
    }
}
