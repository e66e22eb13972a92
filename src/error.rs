//! Error types for wake-relay
//!
//! This module defines the error hierarchy for the wake-triggered relay.
//! All errors are categorized by subsystem and include recovery hints.

use std::io;
use std::net::IpAddr;

use thiserror::Error;

/// Top-level error type for wake-relay
#[derive(Debug, Error)]
pub enum WakeRelayError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Admission filtering errors
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    /// Wake episode errors (automation call, readiness probing)
    #[error("Wake error: {0}")]
    Wake(#[from] WakeError),

    /// Relay and splice errors
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Callback listener errors
    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WakeRelayError {
    /// Check if this error is recoverable (the port loop keeps running)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Admission(e) => e.is_recoverable(),
            Self::Wake(e) => e.is_recoverable(),
            Self::Relay(e) => e.is_recoverable(),
            Self::Callback(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Two port entries claim the same listen port
    #[error("Duplicate listen port: {port}")]
    DuplicatePort { port: u16 },

    /// Wake identifier does not parse as a MAC address
    #[error("Invalid MAC address {value:?}: {reason}")]
    InvalidMac { value: String, reason: String },

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// TLS setup for the outbound HTTP clients failed
    #[error("TLS initialization error: {0}")]
    TlsError(String),

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create an invalid MAC error
    pub fn invalid_mac(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMac {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Admission filtering errors
///
/// These are always connection-scoped: the offending client is closed and
/// the port loop carries on.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Client region is not in the port's allow-list
    #[error("Client {addr} denied: region {region:?} not allowed")]
    RegionDenied { addr: IpAddr, region: String },

    /// Geolocation lookup failed or timed out; the filter fails closed
    #[error("Client {addr} denied: geolocation lookup failed: {reason}")]
    LookupFailed { addr: IpAddr, reason: String },
}

impl AdmissionError {
    /// Admission errors only affect the single rejected connection
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }

    /// Create a region-denied error
    pub fn region_denied(addr: IpAddr, region: impl Into<String>) -> Self {
        Self::RegionDenied {
            addr,
            region: region.into(),
        }
    }

    /// Create a lookup-failed error
    pub fn lookup_failed(addr: IpAddr, reason: impl Into<String>) -> Self {
        Self::LookupFailed {
            addr,
            reason: reason.into(),
        }
    }
}

/// Wake trigger errors
///
/// How an episode *ends* (probe timeout, callback decline, expiry) is not
/// an error but an outcome, reported through the episode signal as an
/// `EpisodeFailure`; only the outbound trigger call itself can fail as an
/// error.
#[derive(Debug, Error)]
pub enum WakeError {
    /// The automation trigger call returned failure; the episode fails
    /// immediately and no prober is started
    #[error("Automation call for port {port} failed: {reason}")]
    TriggerCallFailed { port: u16, reason: String },
}

impl WakeError {
    /// Wake errors end one episode; a later connection may start another
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }

    /// Create a trigger-call-failed error
    pub fn trigger_failed(port: u16, reason: impl Into<String>) -> Self {
        Self::TriggerCallFailed {
            port,
            reason: reason.into(),
        }
    }
}

/// Relay and splice errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to open a fresh connection to the target
    #[error("Failed to connect to target {addr}: {reason}")]
    TargetConnect { addr: String, reason: String },

    /// Target connection attempt timed out
    #[error("Connection to target {addr} timed out after {timeout_secs}s")]
    TargetConnectTimeout { addr: String, timeout_secs: u64 },

    /// Connection limit exhausted
    #[error("Connection limit reached ({current}/{max})")]
    LimitReached { current: usize, max: usize },

    /// Shutdown in progress
    #[error("Relay is shutting down")]
    ShuttingDown,

    /// I/O error
    #[error("Relay I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl RelayError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TargetConnect { .. } => true,
            Self::TargetConnectTimeout { .. } => true,
            Self::LimitReached { .. } => true,
            Self::ShuttingDown => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
        }
    }

    /// Create a target-connect error
    pub fn target_connect(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TargetConnect {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create a target-connect-timeout error
    pub fn connect_timeout(addr: impl Into<String>, timeout_secs: u64) -> Self {
        Self::TargetConnectTimeout {
            addr: addr.into(),
            timeout_secs,
        }
    }

    /// Create a limit reached error
    #[must_use]
    pub const fn limit_reached(current: usize, max: usize) -> Self {
        Self::LimitReached { current, max }
    }
}

/// Callback listener errors
///
/// Per-request problems (unknown ports, malformed bodies) are answered
/// with an HTTP status inside the handler and never surface here; only
/// the listener itself can fail.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Failed to bind the callback listener
    #[error("Failed to bind callback listener to {addr}: {reason}")]
    BindError { addr: String, reason: String },

    /// I/O error
    #[error("Callback I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl CallbackError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BindError { .. } => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }

    /// Create a bind error
    pub fn bind(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with WakeRelayError
pub type Result<T> = std::result::Result<T, WakeRelayError>;
