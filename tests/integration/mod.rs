//! Integration tests for wake-relay
//!
//! This module contains integration tests for verifying the behavior of the
//! relay in realistic scenarios: live listeners, real TCP clients, and mock
//! target and automation servers.
//!
//! # Test Organization
//!
//! - `wake_flow`: Full wake episodes — queueing, probing, drain order, and
//!   failed automation calls
//! - `admission`: Region filtering for public clients, fail-closed lookups
//! - `reconnect`: Fast-reconnect bypass and its fallback to the wake path
//! - `callback_http`: The external readiness callback endpoint over HTTP
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests wake_flow
//! ```
//!
//! # Test Requirements
//!
//! - All tests bind loopback sockets on ephemeral ports; no network access
//!   or privileges are required
//! - Magic packet sends are best-effort and may be unrouteable in sandboxes;
//!   the relay logs and continues, so tests do not depend on them

pub mod reconnect;
pub mod wake_flow;
