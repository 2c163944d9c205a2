//! In-memory reading store.
//!
//! [`MemoryStore`] keeps each channel's readings in a sorted vector. It is the store used
//! by tests and by the service's `memory` backend.
//!
//! # Features
//!
//! - **Failure injection**: fail the next N operations with a transient error
//! - **Latency simulation**: delay every operation to widen race windows in tests
//! - **Query counting**: observe how many range queries reached the store

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use fieldline_types::{Channel, ChannelKey, Reading};

use crate::error::{Error, Result};
use crate::limits::FlagBasis;
use crate::traits::{Cursor, ReadingPage, ReadingStore, StoredReading};

/// A [`ReadingStore`] held entirely in memory.
///
/// # Example
///
/// ```
/// use fieldline_core::{FlagBasis, MemoryStore, ReadingStore};
/// use fieldline_types::{Channel, ChannelKey, Reading, UnitId};
/// use time::macros::datetime;
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryStore::new();
///     let key = ChannelKey::new(11, 470, 1);
///     store.put_channel(Channel::new(key, "Temperature", UnitId(14))).await.unwrap();
///
///     let reading = Reading::new(datetime!(2020-04-24 14:02:07 UTC), 50.17);
///     store.append_reading(key, reading, FlagBasis::default()).await.unwrap();
///     assert_eq!(store.reading_count(key).await, 1);
/// }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    channels: RwLock<BTreeMap<ChannelKey, Channel>>,
    readings: RwLock<HashMap<ChannelKey, Vec<StoredReading>>>,
    next_sequence: AtomicU64,
    remaining_failures: AtomicU32,
    latency_ms: AtomicU64,
    query_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("next_sequence", &self.next_sequence.load(Ordering::Relaxed))
            .field("query_count", &self.query_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with [`Error::StoreUnavailable`].
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Number of injected failures still pending.
    pub fn remaining_failures(&self) -> u32 {
        self.remaining_failures.load(Ordering::Relaxed)
    }

    /// Delay every operation by `latency`. `Duration::ZERO` disables the delay.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of `query_range` calls that reached the store.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Number of readings held for a channel.
    pub async fn reading_count(&self, key: ChannelKey) -> usize {
        self.readings.read().await.get(&key).map_or(0, Vec::len)
    }

    async fn check_should_fail(&self, operation: &str) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let took_failure = self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if took_failure {
            return Err(Error::store_unavailable(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn channel(&self, key: ChannelKey) -> Result<Option<Channel>> {
        self.check_should_fail("channel").await?;
        Ok(self.channels.read().await.get(&key).cloned())
    }

    async fn put_channel(&self, channel: Channel) -> Result<Option<Channel>> {
        self.check_should_fail("put_channel").await?;
        Ok(self.channels.write().await.insert(channel.key(), channel))
    }

    async fn channels(&self) -> Result<Vec<Channel>> {
        self.check_should_fail("channels").await?;
        Ok(self.channels.read().await.values().cloned().collect())
    }

    async fn append_reading(
        &self,
        key: ChannelKey,
        reading: Reading,
        basis: FlagBasis,
    ) -> Result<u64> {
        self.check_should_fail("append_reading").await?;
        if !self.channels.read().await.contains_key(&key) {
            return Err(Error::ChannelNotFound(key));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let stored = StoredReading {
            reading,
            sequence,
            basis,
        };
        let mut readings = self.readings.write().await;
        let list = readings.entry(key).or_default();
        let ts = reading.reading_date;
        let at = list.partition_point(|r| r.reading.reading_date <= ts);
        list.insert(at, stored);
        Ok(sequence)
    }

    async fn query_range(
        &self,
        key: ChannelKey,
        start: OffsetDateTime,
        end: OffsetDateTime,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<ReadingPage> {
        self.check_should_fail("query_range").await?;
        self.query_count.fetch_add(1, Ordering::Relaxed);

        let readings = self.readings.read().await;
        let Some(list) = readings.get(&key) else {
            return Ok(ReadingPage::default());
        };

        let mut from = list.partition_point(|r| r.reading.reading_date < start);
        if let Some(cursor) = after {
            from = from.max(list.partition_point(|r| r.cursor() <= cursor));
        }
        let to = list.partition_point(|r| r.reading.reading_date < end);
        if from >= to {
            return Ok(ReadingPage::default());
        }

        let take = limit.max(1).min(to - from);
        let page: Vec<StoredReading> = list[from..from + take].to_vec();
        let next = if from + take < to {
            page.last().map(StoredReading::cursor)
        } else {
            None
        };
        Ok(ReadingPage {
            readings: page,
            next,
        })
    }
}
