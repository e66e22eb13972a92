//! Trigger cooldown tracking
//!
//! A successful automation call stays valid for a cooldown window, even
//! across distinct wake episodes; failed calls never populate the window,
//! so the next connection retries immediately.

use std::time::{Duration, Instant};

/// Per-port cooldown over the last successful automation call
#[derive(Debug)]
pub struct TriggerCooldown {
    window: Duration,
    last_success: Option<Instant>,
}

impl TriggerCooldown {
    /// Create a cooldown with the given window
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_success: None,
        }
    }

    /// Whether a new automation call is due
    ///
    /// True when no successful call was recorded yet or the window has
    /// passed since the last one.
    #[must_use]
    pub fn elapsed(&self) -> bool {
        match self.last_success {
            None => true,
            Some(at) => at.elapsed() >= self.window,
        }
    }

    /// Record a successful automation call
    pub fn record_success(&mut self) {
        self.last_success = Some(Instant::now());
    }
}
