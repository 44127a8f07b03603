//! Error types for flora-core.
//!
//! This module defines every error a session, the connection pool or the
//! background orchestrator can surface.
//!
//! # Recovery
//!
//! Most failures are handled locally before they ever reach a caller: an
//! entry that fails to decode is retried and eventually skipped, stale
//! progress is discarded, and transient radio errors are retried with
//! backoff. What remains falls in two groups.
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::Timeout`] (entry, device) | Retry, the link is usually still fine |
//! | [`Error::Bluetooth`] | Retry, then reconnect |
//! | [`Error::ConnectionFailed`] | Retry with backoff |
//! | [`Error::Disconnected`] | Reconnect, history resumes from saved progress |
//! | [`Error::Timeout`] (global) | Terminal |
//! | [`Error::CircuitOpen`] | Terminal until the cool-down elapses |
//! | [`Error::ConnectionLoop`] | Terminal, stop reconnecting |
//! | [`Error::RadioUnavailable`] | Terminal until the adapter powers on |
//! | [`Error::Cancelled`] | Terminal, intentionally stopped |
//!
//! Use [`Error::is_retryable`] and [`Error::is_terminal`] rather than
//! matching variants by hand.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use flora_types::{CharacteristicRole, ParseError};

/// Granularity of a timeout.
///
/// The most specific scope fires first: a stuck entry read times out long
/// before the per-device or global budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// A single request/response exchange.
    Entry,
    /// Everything done for one device (connect, negotiate, one operation).
    Device,
    /// A complete run (history transfer or background fetch).
    Global,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Device => write!(f, "device"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Errors that can occur while talking to soil sensors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error reported by the platform Bluetooth stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable radio adapter, or the adapter is powered off.
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    /// The device could not be resolved to a peripheral.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The radio refused or failed to establish a link.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Device the connection was for.
        device_id: Option<String>,
        /// Human-readable reason.
        reason: String,
    },

    /// The link dropped while an operation was in flight.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// The authentication handshake was not accepted.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A characteristic required by the protocol is missing.
    #[error("Characteristic not found: {role} ({uuid})")]
    CharacteristicNotFound {
        /// Logical role of the missing characteristic.
        role: CharacteristicRole,
        /// UUID that was searched for.
        uuid: uuid::Uuid,
    },

    /// A payload failed to decode.
    #[error("Decode error{}: {source}", entry_suffix(.index))]
    Decode {
        /// History entry index, if the payload was a history entry.
        index: Option<u16>,
        /// Underlying codec error.
        source: ParseError,
    },

    /// Saved progress no longer matches the device.
    #[error("Stale progress: saved total {saved}, device reports {fresh}")]
    StaleProgress {
        /// Total recorded in the saved progress.
        saved: i64,
        /// Total the device reports now.
        fresh: u16,
    },

    /// An operation exceeded its time budget.
    #[error("{scope} timeout: '{operation}' exceeded {duration:?}")]
    Timeout {
        /// Which budget ran out.
        scope: TimeoutScope,
        /// The operation that timed out.
        operation: String,
        /// The budget.
        duration: Duration,
    },

    /// Operation attempted in a session state that does not allow it.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Session state at the time.
        state: String,
    },

    /// Too many consecutive failures; reconnecting is suspended.
    #[error("Circuit open for {device_id}: too many consecutive failures")]
    CircuitOpen {
        /// Device whose breaker is open.
        device_id: String,
    },

    /// The device keeps reconnecting; reconnecting has been stopped.
    #[error("Connection loop for {device_id}: {attempts} attempts in the detection window")]
    ConnectionLoop {
        /// Device that is looping.
        device_id: String,
        /// Attempts seen inside the window.
        attempts: usize,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// A background fetch is already running.
    #[error("A background fetch is already running")]
    AlreadyRunning,

    /// The persistence collaborator failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn entry_suffix(index: &Option<u16>) -> String {
    index.map(|i| format!(" at entry {i}")).unwrap_or_default()
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(identifier.into())
    }

    /// Create a timeout error with scope and operation context.
    pub fn timeout(scope: TimeoutScope, operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            scope,
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure.
    pub fn connection_failed(device_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            device_id,
            reason: reason.into(),
        }
    }

    /// Create a decode error for history entry `index`.
    pub fn decode_at(index: u16, source: ParseError) -> Self {
        Self::Decode {
            index: Some(index),
            source,
        }
    }

    /// Create a missing characteristic error.
    pub fn characteristic_not_found(role: CharacteristicRole) -> Self {
        Self::CharacteristicNotFound {
            role,
            uuid: role.uuid(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(operation: &'static str, state: impl fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { scope, .. } => *scope != TimeoutScope::Global,
            Error::Bluetooth(_) => true,
            Error::ConnectionFailed { .. } => true,
            Error::Disconnected(_) => true,
            Error::RadioUnavailable(_)
            | Error::DeviceNotFound(_)
            | Error::AuthenticationFailed(_)
            | Error::CharacteristicNotFound { .. }
            | Error::Decode { .. }
            | Error::StaleProgress { .. }
            | Error::InvalidState { .. }
            | Error::CircuitOpen { .. }
            | Error::ConnectionLoop { .. }
            | Error::Cancelled
            | Error::AlreadyRunning
            | Error::Persistence(_)
            | Error::InvalidConfig(_) => false,
        }
    }

    /// Whether the error ends the current run without local recovery.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Timeout {
                scope: TimeoutScope::Global,
                ..
            } | Error::CircuitOpen { .. }
                | Error::ConnectionLoop { .. }
                | Error::RadioUnavailable(_)
                | Error::Cancelled
        )
    }
}

impl From<ParseError> for Error {
    fn from(source: ParseError) -> Self {
        Error::Decode {
            index: None,
            source,
        }
    }
}

/// Result type alias using flora-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("C4:7C:8D:6A:3E:11");
        assert!(err.to_string().contains("C4:7C:8D:6A:3E:11"));

        let err = Error::characteristic_not_found(CharacteristicRole::HistoryData);
        assert!(err.to_string().contains("history data"));
        assert!(err.to_string().contains("00001a11"));

        let err = Error::timeout(TimeoutScope::Entry, "read history entry", Duration::from_secs(5));
        assert_eq!(
            err.to_string(),
            "entry timeout: 'read history entry' exceeded 5s"
        );

        let err = Error::invalid_state("read live data", "disconnected");
        assert_eq!(err.to_string(), "Cannot read live data while disconnected");
    }

    #[test]
    fn test_decode_error_mentions_index() {
        let err = Error::decode_at(42, ParseError::invalid_length("history entry", 16, 3));
        assert!(err.to_string().contains("at entry 42"));

        let err: Error = ParseError::invalid_length("entry count", 2, 1).into();
        assert!(matches!(err, Error::Decode { index: None, .. }));
        assert!(!err.to_string().contains("at entry"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::timeout(TimeoutScope::Entry, "x", Duration::from_secs(1)).is_retryable());
        assert!(!Error::timeout(TimeoutScope::Global, "x", Duration::from_secs(1)).is_retryable());
        assert!(Error::connection_failed(None, "busy").is_retryable());
        assert!(Error::Disconnected("link lost".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::AuthenticationFailed("rejected".into()).is_retryable());
        assert!(!Error::decode_at(1, ParseError::InvalidValue("bad".into())).is_retryable());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(Error::timeout(TimeoutScope::Global, "sync", Duration::from_secs(1800)).is_terminal());
        assert!(Error::CircuitOpen { device_id: "a".into() }.is_terminal());
        assert!(Error::Cancelled.is_terminal());
        assert!(!Error::timeout(TimeoutScope::Entry, "x", Duration::from_secs(1)).is_terminal());
        assert!(!Error::Disconnected("gone".into()).is_terminal());
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_timeout_scope_display() {
        assert_eq!(TimeoutScope::Entry.to_string(), "entry");
        assert_eq!(TimeoutScope::Device.to_string(), "device");
        assert_eq!(TimeoutScope::Global.to_string(), "global");
    }
}
