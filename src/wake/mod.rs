//! Wake collaborators
//!
//! The two ways a cold target gets brought up: a Wake-on-LAN magic packet
//! (fire-and-forget) and an optional automation service call whose failure
//! fails the episode. Successful automation calls are rate-limited by a
//! per-port cooldown.

mod automation;
mod cooldown;
mod trigger;

pub use automation::AutomationCaller;
pub use cooldown::TriggerCooldown;
pub use trigger::send_wake_signal;
