//! The reading store abstraction.
//!
//! [`ReadingStore`] is the boundary between the engine and wherever readings live. The
//! engine ships an in-memory implementation ([`MemoryStore`](crate::MemoryStore));
//! `fieldline-store` provides a durable SQLite one.
//!
//! Readings of a channel are ordered by `(timestamp, sequence)`. The sequence is assigned
//! by the store on append and grows monotonically, so readings sharing a timestamp keep
//! their arrival order and a [`Cursor`] identifies a position unambiguously.

use async_trait::async_trait;
use time::OffsetDateTime;

use fieldline_types::{Channel, ChannelKey, Reading};

use crate::error::Result;
use crate::limits::FlagBasis;

/// Continuation point for paged range queries.
///
/// A page resumes strictly after the reading the cursor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    /// Timestamp of the last reading delivered.
    pub timestamp: OffsetDateTime,
    /// Store sequence of the last reading delivered.
    pub sequence: u64,
}

/// A reading as held by a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredReading {
    pub reading: Reading,
    /// Store-assigned, monotonically increasing.
    pub sequence: u64,
    /// What the exceedance flag was computed under.
    pub basis: FlagBasis,
}

impl StoredReading {
    /// Position of this reading, usable as a cursor.
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        Cursor {
            timestamp: self.reading.reading_date,
            sequence: self.sequence,
        }
    }
}

/// One page of a range query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingPage {
    /// Readings in `(timestamp, sequence)` order.
    pub readings: Vec<StoredReading>,
    /// Where to resume, or `None` when the range is exhausted.
    pub next: Option<Cursor>,
}

/// Ordered, appendable, queryable reading storage.
///
/// Implementations must be safe to call concurrently. Transient failures are reported
/// as [`Error::StoreUnavailable`](crate::Error::StoreUnavailable) so callers can retry;
/// everything else is fatal.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Fetch the current snapshot of a channel.
    async fn channel(&self, key: ChannelKey) -> Result<Option<Channel>>;

    /// Insert or replace a channel snapshot, returning the previous one.
    async fn put_channel(&self, channel: Channel) -> Result<Option<Channel>>;

    /// All channel snapshots, ordered by key.
    async fn channels(&self) -> Result<Vec<Channel>>;

    /// Append one reading and return its assigned sequence.
    ///
    /// `basis` records what the reading's exceedance flag was computed under.
    /// Out-of-order timestamps are accepted and placed in order. Fails with
    /// [`Error::ChannelNotFound`](crate::Error::ChannelNotFound) for unknown channels.
    async fn append_reading(
        &self,
        key: ChannelKey,
        reading: Reading,
        basis: FlagBasis,
    ) -> Result<u64>;

    /// Readings with `start <= timestamp < end`, resuming after `after` when given, at
    /// most `limit` per page.
    async fn query_range(
        &self,
        key: ChannelKey,
        start: OffsetDateTime,
        end: OffsetDateTime,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<ReadingPage>;

    /// Collect a whole range by following cursors.
    async fn collect_range(
        &self,
        key: ChannelKey,
        start: OffsetDateTime,
        end: OffsetDateTime,
        page_size: usize,
    ) -> Result<Vec<StoredReading>> {
        let mut out = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .query_range(key, start, end, after, page_size.max(1))
                .await?;
            out.extend(page.readings);
            match page.next {
                Some(cursor) => after = Some(cursor),
                None => return Ok(out),
            }
        }
    }
}
