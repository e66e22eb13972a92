//! I/O utilities for wake-relay
//!
//! Buffer sizing and the bidirectional splice used to relay client and
//! target sockets once a wake episode confirms readiness.

mod buffer;
mod copy;

pub use buffer::{clamp_buffer_size, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use copy::{splice, splice_with_buffer, SpliceResult};
