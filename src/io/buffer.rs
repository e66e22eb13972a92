//! Buffer sizing for relay I/O

/// Default buffer size (64KB - optimal for most network operations)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum buffer size (4KB)
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;

/// Maximum buffer size (1MB)
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Clamp a configured buffer size into the supported range
#[must_use]
pub fn clamp_buffer_size(size: usize) -> usize {
    size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
}
