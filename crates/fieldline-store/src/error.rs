//! Error types for fieldline-store.

use std::path::PathBuf;

use rusqlite::ErrorCode;

use fieldline_types::ChannelKey;

/// Result type for fieldline-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldline-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Channel not found in database.
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelKey),

    /// The database was written by a newer schema than this build understands.
    #[error("Unsupported schema version {found} (newest supported is {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// Timestamp outside the range the database can hold.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Channel snapshot (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Engine error while importing.
    #[error(transparent)]
    Engine(#[from] fieldline_core::Error),

    /// The blocking worker running a database call died.
    #[error("Database worker failed: {0}")]
    Worker(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether SQLite reported the database as busy or locked.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }

    /// Translate into the engine's error model.
    ///
    /// Busy and locked databases are transient; everything else is fatal.
    pub fn into_core(self, operation: &str) -> fieldline_core::Error {
        if self.is_busy() {
            return fieldline_core::Error::store_unavailable(operation, self.to_string());
        }
        match self {
            Error::ChannelNotFound(key) => fieldline_core::Error::ChannelNotFound(key),
            Error::Engine(e) => e,
            other => fieldline_core::Error::Store(format!("{operation}: {other}")),
        }
    }
}
