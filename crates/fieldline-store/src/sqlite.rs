//! [`ReadingStore`] over SQLite.
//!
//! rusqlite is synchronous, so each call runs on tokio's blocking pool. Writes go through
//! one connection behind a mutex. Reads on a file database take a read-only connection
//! of their own from a small pool, so they never queue behind each other or a writer;
//! WAL gives each of them a consistent snapshot.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tracing::debug;

use fieldline_core::{Cursor, FlagBasis, ReadingPage, ReadingStore};
use fieldline_types::{Channel, ChannelKey, Reading};

use crate::error::{Error, Result};
use crate::queries::RangeQuery;
use crate::store::Store;

/// Read connections kept per database file unless configured otherwise.
pub const DEFAULT_READ_CONNECTIONS: usize = 4;

/// Read-only connections, at most `size` open at once.
#[derive(Debug)]
struct ReaderPool {
    path: PathBuf,
    idle: Mutex<Vec<Store>>,
    permits: Arc<Semaphore>,
}

impl ReaderPool {
    fn new(path: PathBuf, size: usize) -> Self {
        Self {
            path,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    fn checkout(&self) -> Result<Store> {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        match idle {
            Some(store) => Ok(store),
            None => Store::open_read_only(&self.path),
        }
    }

    fn checkin(&self, store: Store) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(store);
    }

    async fn run<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| Error::Worker(e.to_string()))?;
        let pool = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let store = pool.checkout()?;
            let result = f(&store);
            pool.checkin(store);
            result
        })
        .await
        .map_err(|e| Error::Worker(e.to_string()))?
    }
}

/// Shareable, async handle to a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteReadingStore {
    writer: Arc<Mutex<Store>>,
    readers: Option<Arc<ReaderPool>>,
}

impl SqliteReadingStore {
    /// Wrap a single connection that serves reads and writes alike.
    pub fn new(store: Store) -> Self {
        Self {
            writer: Arc::new(Mutex::new(store)),
            readers: None,
        }
    }

    /// Open or create a database file with [`DEFAULT_READ_CONNECTIONS`] readers.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_readers(path, DEFAULT_READ_CONNECTIONS)
    }

    /// Open or create a database file with up to `readers` concurrent read connections.
    ///
    /// Zero readers routes reads through the writing connection.
    pub fn open_with_readers<P: AsRef<Path>>(path: P, readers: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut store = Self::new(Store::open(path)?);
        if readers > 0 {
            debug!("Pooling up to {} read connections for {}", readers, path.display());
            store.readers = Some(Arc::new(ReaderPool::new(path.to_path_buf(), readers)));
        }
        Ok(store)
    }

    /// An in-memory database. Private to one connection, so reads share the writer.
    pub fn open_in_memory() -> Result<Self> {
        Store::open_in_memory().map(Self::new)
    }

    /// Run a closure against the writing connection on the blocking pool.
    pub async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let guard = store.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| Error::Worker(e.to_string()))?
    }

    /// Run a read-only closure on a pooled read connection.
    pub async fn with_reader<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match &self.readers {
            Some(pool) => pool.run(f).await,
            None => self.with_store(f).await,
        }
    }

    async fn write<T, F>(&self, operation: &'static str, f: F) -> fieldline_core::Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_store(f).await.map_err(|e| e.into_core(operation))
    }

    async fn read<T, F>(&self, operation: &'static str, f: F) -> fieldline_core::Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_reader(f).await.map_err(|e| e.into_core(operation))
    }
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn channel(&self, key: ChannelKey) -> fieldline_core::Result<Option<Channel>> {
        self.read("channel", move |s| s.get_channel(key)).await
    }

    async fn put_channel(&self, channel: Channel) -> fieldline_core::Result<Option<Channel>> {
        self.write("put_channel", move |s| s.put_channel(&channel))
            .await
    }

    async fn channels(&self) -> fieldline_core::Result<Vec<Channel>> {
        self.read("channels", Store::list_channels).await
    }

    async fn append_reading(
        &self,
        key: ChannelKey,
        reading: Reading,
        basis: FlagBasis,
    ) -> fieldline_core::Result<u64> {
        self.write("append_reading", move |s| s.append_reading(key, &reading, basis))
            .await
    }

    async fn query_range(
        &self,
        key: ChannelKey,
        start: OffsetDateTime,
        end: OffsetDateTime,
        after: Option<Cursor>,
        limit: usize,
    ) -> fieldline_core::Result<ReadingPage> {
        let query = RangeQuery::new(key)
            .since(start)
            .until(end)
            .after(after)
            .limit(limit);
        self.read("query_range", move |s| s.query_range(&query))
            .await
    }
}
