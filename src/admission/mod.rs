//! Admission filtering for inbound clients
//!
//! Private and loopback clients are always admitted. Public clients on
//! ports with a region allow-list are resolved through a geolocation
//! service; lookup failures deny the connection.

mod filter;
mod geo;

pub use filter::{is_private_or_loopback, AdmissionFilter};
pub use geo::{GeoClient, RegionLookup};
