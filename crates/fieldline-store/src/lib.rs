//! Local data persistence for Fieldline channel readings.
//!
//! This crate provides SQLite-based storage for channel snapshots and their
//! append-only readings, plus the async [`ReadingStore`](fieldline_core::ReadingStore)
//! adapter the engine runs on.
//!
//! # Features
//!
//! - Channel snapshots keyed by `(account, device, channel)`
//! - Readings ordered by `(timestamp, sequence)` with cursor paging
//! - Schema versioning
//! - Dashboard fixture import and raw CSV export
//!
//! # Example
//!
//! ```no_run
//! use fieldline_store::{RangeQuery, Store};
//! use fieldline_types::ChannelKey;
//!
//! let store = Store::open_default()?;
//! let page = store.query_range(&RangeQuery::new(ChannelKey::new(11, 470, 27507)).limit(10))?;
//! println!("{} readings", page.readings.len());
//! # Ok::<(), fieldline_store::Error>(())
//! ```

mod error;
mod queries;
mod schema;
mod sqlite;
mod store;
mod transfer;

pub use error::{Error, Result};
pub use queries::RangeQuery;
pub use schema::SCHEMA_VERSION;
pub use sqlite::{DEFAULT_READ_CONNECTIONS, SqliteReadingStore};
pub use store::Store;
pub use transfer::{ImportResult, export_csv, import_documents, import_file, parse_documents};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/fieldline/data.db`
/// - macOS: `~/Library/Application Support/fieldline/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\fieldline\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("fieldline")
        .join("data.db")
}
