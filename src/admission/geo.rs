//! Geolocation lookup client
//!
//! Resolves a public client IP to a region name through an external
//! ipapi.co-style service. Lookups carry a short timeout and any failure
//! surfaces as an error so the admission filter can fail closed.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use tracing::debug;

use crate::config::GeoConfig;
use crate::error::{AdmissionError, ConfigError};

/// Region resolution for public client addresses
///
/// The relay engine only consumes the region string; tests substitute a
/// fixed implementation.
#[async_trait]
pub trait RegionLookup: Send + Sync {
    /// Resolve `ip` to a region name
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::LookupFailed` on transport errors, timeouts,
    /// non-success statuses, or responses without a region.
    async fn lookup(&self, ip: IpAddr) -> Result<String, AdmissionError>;
}

/// Relevant subset of the lookup service response
#[derive(Debug, Deserialize)]
struct GeoResponse {
    region: Option<String>,
}

/// HTTP client against an ipapi.co-style endpoint (`GET {base}/{ip}/json/`)
pub struct GeoClient {
    endpoint: String,
    timeout: Duration,
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
}

impl GeoClient {
    /// Build the lookup client from configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::TlsError` if the native root store cannot be
    /// loaded.
    pub fn new(config: &GeoConfig) -> Result<Self, ConfigError> {
        // Install rustls crypto provider if not already installed
        let _ = rustls::crypto::ring::default_provider().install_default();

        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ConfigError::TlsError(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
            client: Client::builder(TokioExecutor::new()).build(https),
        })
    }
}

#[async_trait]
impl RegionLookup for GeoClient {
    async fn lookup(&self, ip: IpAddr) -> Result<String, AdmissionError> {
        let uri = format!("{}/{}/json/", self.endpoint, ip);
        debug!(%ip, "Geolocation lookup: {}", uri);

        let req = Request::builder()
            .method("GET")
            .uri(&uri)
            .header("Accept", "application/json")
            .header("User-Agent", concat!("wake-relay/", env!("CARGO_PKG_VERSION")))
            .body(Empty::new())
            .map_err(|e| AdmissionError::lookup_failed(ip, e.to_string()))?;

        let resp = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| AdmissionError::lookup_failed(ip, "lookup timeout"))?
            .map_err(|e| AdmissionError::lookup_failed(ip, e.to_string()))?;

        let (parts, body) = resp.into_parts();
        if !parts.status.is_success() {
            return Err(AdmissionError::lookup_failed(
                ip,
                format!("status {}", parts.status),
            ));
        }

        let body_bytes = body
            .collect()
            .await
            .map_err(|e| AdmissionError::lookup_failed(ip, e.to_string()))?
            .to_bytes();

        let parsed: GeoResponse = serde_json::from_slice(&body_bytes)
            .map_err(|e| AdmissionError::lookup_failed(ip, format!("bad body: {e}")))?;

        parsed
            .region
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AdmissionError::lookup_failed(ip, "no region in response"))
    }
}
