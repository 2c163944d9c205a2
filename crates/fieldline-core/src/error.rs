//! Error types for fieldline-core.
//!
//! # Error Classes
//!
//! | Error | Class | Strategy |
//! |-------|-------|----------|
//! | [`Error::InvalidRange`] | Caller error | Surface immediately, never retried |
//! | [`Error::ChannelNotFound`] | Caller error | Surface immediately |
//! | [`Error::UnsupportedConversion`] | Configuration error | Surface with the unit ids |
//! | [`Error::StoreUnavailable`] | Transient | Bounded retry with backoff, then surface |
//! | [`Error::Store`] | Fatal store failure | Surface immediately |
//! | [`Error::UnorderedReadings`] | Store contract violation | Surface immediately |
//! | [`Error::InvalidConfig`] | Configuration error | Fix configuration |
//!
//! Inverted thresholds are not an error: they are reported as a
//! [`ConfigurationWarning`](fieldline_types::ConfigurationWarning) attached to an otherwise
//! successful [`Series`](fieldline_types::Series).
//!
//! The error type is `Clone` because one failed build is delivered, unchanged, to every
//! caller that was waiting on it.

use thiserror::Error;
use time::OffsetDateTime;

use fieldline_types::{ChannelKey, ParseError, UnitId};

/// Errors produced by the engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested window or point budget is unusable.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// No channel snapshot exists for the key.
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelKey),

    /// The units belong to different categories, or one of them is unknown.
    #[error("Unsupported conversion from unit {from} to unit {to}")]
    UnsupportedConversion {
        /// Source unit id.
        from: UnitId,
        /// Target unit id.
        to: UnitId,
    },

    /// Transient store failure; eligible for retry.
    #[error("Store unavailable during '{operation}': {message}")]
    StoreUnavailable {
        /// The store operation that failed.
        operation: String,
        /// Underlying failure.
        message: String,
    },

    /// Fatal store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The store returned readings out of time order.
    #[error("Readings out of order: {current} follows {previous}")]
    UnorderedReadings {
        /// Timestamp of the earlier-delivered reading.
        previous: OffsetDateTime,
        /// Timestamp that went backwards.
        current: OffsetDateTime,
    },

    /// Channel or engine configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed input data.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A coalesced build ended without producing a result.
    #[error("Series build aborted: {0}")]
    BuildAborted(String),
}

impl Error {
    /// Shorthand for a transient store failure.
    pub fn store_unavailable(operation: &str, message: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error is a caller mistake rather than a system fault.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Error::InvalidRange(_) | Error::ChannelNotFound(_))
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::InvalidData(e.to_string())
    }
}

/// Result type alias using fieldline-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
