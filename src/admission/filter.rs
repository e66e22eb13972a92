//! IP/region admission policy
//!
//! Runs before any wake logic: private and loopback clients are always
//! admitted, public clients must pass the port's region allow-list when one
//! is configured. Geolocation failures deny (fail closed).

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use super::geo::RegionLookup;
use crate::config::PortConfig;
use crate::error::AdmissionError;

/// Check whether an address is in private, link-local, or loopback space
#[must_use]
pub fn is_private_or_loopback(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.is_loopback() || v4.is_private() || v4.is_link_local();
            }
            // fc00::/7 unique-local, fe80::/10 link-local
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Admission filter shared by all relay engines
pub struct AdmissionFilter {
    geo: Arc<dyn RegionLookup>,
}

impl AdmissionFilter {
    /// Create a filter over the given region lookup
    pub fn new(geo: Arc<dyn RegionLookup>) -> Self {
        Self { geo }
    }

    /// Decide whether `addr` may proceed on this port
    ///
    /// The lookup is only performed for public addresses on ports with a
    /// non-empty allow-list.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::RegionDenied` when the resolved region is not
    /// allowed and `AdmissionError::LookupFailed` when resolution fails.
    pub async fn check(&self, addr: IpAddr, port: &PortConfig) -> Result<(), AdmissionError> {
        if is_private_or_loopback(&addr) {
            return Ok(());
        }

        if !port.has_region_filter() {
            return Ok(());
        }

        let region = self.geo.lookup(addr).await?;
        if port.allowed_regions.iter().any(|r| r == &region) {
            debug!(%addr, %region, port = port.listen_port, "Client admitted by region");
            Ok(())
        } else {
            Err(AdmissionError::region_denied(addr, region))
        }
    }
}
