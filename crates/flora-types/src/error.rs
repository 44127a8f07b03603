//! Error types for data parsing in flora-types.

use thiserror::Error;

/// Errors that can occur when decoding sensor payloads.
///
/// This error type is platform-agnostic and does not include
/// radio errors (those belong in flora-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The buffer does not have the exact length the payload requires.
    #[error("Invalid {what} payload: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Payload being decoded.
        what: &'static str,
        /// Required length.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// A field decoded to a value outside its valid range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl ParseError {
    /// Create a length mismatch error.
    pub fn invalid_length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidLength {
            what,
            expected,
            actual,
        }
    }
}

/// Result type alias using flora-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
