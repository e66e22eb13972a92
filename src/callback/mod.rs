//! HTTP callback listener for external readiness reports
//!
//! This module provides:
//! - HTTP endpoint accepting `{"port": N, "continue": bool}` reports
//! - Episode resolution through the shared registry, idempotent per episode
//! - Graceful shutdown wired to the process-wide broadcast

mod server;

pub use server::{bind, router, serve, CallbackReport};
