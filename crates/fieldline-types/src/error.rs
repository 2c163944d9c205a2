//! Error types for data parsing in fieldline-types.

use thiserror::Error;

/// Errors that can occur when parsing Fieldline telemetry data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Generic malformed input.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Unit of measure name that is not in the registry.
    #[error("Unknown unit of measure: '{0}'")]
    UnknownUnit(String),

    /// Unit of measure id that is not in the registry.
    #[error("Unknown unit of measure id: {0}")]
    UnknownUnitId(u16),

    /// Timestamp that is not ISO-8601 with an explicit offset.
    #[error("Invalid date '{input}': {reason}")]
    InvalidDate {
        /// The rejected input.
        input: String,
        /// Parser message.
        reason: String,
    },
}

/// Result type alias using fieldline-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
