//! Application state shared across handlers.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;

use fieldline_core::{Engine, MemoryStore, ReadingStore};
use fieldline_store::SqliteReadingStore;

use crate::config::{Config, StorageBackend};

/// Shared application state.
///
/// The engine does its own locking, so handlers share it without a wrapper lock.
#[derive(Debug)]
pub struct AppState {
    pub engine: Engine,
    /// Configuration the service started with.
    pub config: Config,
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create application state around an existing store.
    pub fn new(store: Arc<dyn ReadingStore>, config: Config) -> Arc<Self> {
        let engine = Engine::new(store, config.engine.engine_config());
        Arc::new(Self {
            engine,
            config,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Open the configured storage backend and create application state.
    pub fn open(config: Config) -> fieldline_store::Result<Arc<Self>> {
        let store: Arc<dyn ReadingStore> = match config.storage.backend {
            StorageBackend::Sqlite => Arc::new(SqliteReadingStore::open_with_readers(
                &config.storage.path,
                config.storage.read_connections,
            )?),
            StorageBackend::Memory => {
                info!("Using in-memory storage; readings are lost on exit");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(store, config))
    }
}
