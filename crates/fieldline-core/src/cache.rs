//! Query cache with coalesced builds.
//!
//! Finished series are kept in an LRU map keyed by [`SeriesKey`], with a per-channel
//! index so ingest can drop every entry of a channel that overlaps a new reading.
//!
//! A miss registers an in-flight build for its key. Identical requests arriving while it
//! runs wait on the same build instead of starting their own, and all of them receive
//! the same result, success or failure. The build runs on its own task, so it completes
//! and populates the cache even when every caller has gone away.
//!
//! Invalidation also reaches in-flight builds: a build that overlaps an invalidated
//! range is detached from its key and its result is handed to its waiters but never
//! cached.
//!
//! Dropping a whole channel also bumps its generation. A caller that read the channel
//! snapshot under an older generation gets its series built but not cached.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::watch;
use tracing::debug;

use fieldline_types::{ChannelKey, Series, UnitId};

use crate::error::{Error, Result};

/// Identity of one cached series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub channel: ChannelKey,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub max_points: usize,
    /// The unit the series is expressed in, after override resolution.
    pub display_unit: UnitId,
    /// `sensorConfigVersionTag` of the channel the series was built from.
    pub config_version: u32,
}

impl SeriesKey {
    /// Create a key. Timestamps are normalized to UTC so equal instants hash equally.
    #[must_use]
    pub fn new(
        channel: ChannelKey,
        start: OffsetDateTime,
        end: OffsetDateTime,
        max_points: usize,
        display_unit: UnitId,
        config_version: u32,
    ) -> Self {
        Self {
            channel,
            start: start.to_offset(UtcOffset::UTC),
            end: end.to_offset(UtcOffset::UTC),
            max_points,
            display_unit,
            config_version,
        }
    }

    /// Whether the half-open window `[start, end)` intersects `range`.
    #[must_use]
    pub fn overlaps(&self, range: &RangeInclusive<OffsetDateTime>) -> bool {
        *range.start() < self.end && self.start <= *range.end()
    }

    fn is_affected_by(&self, range: &RangeInclusive<OffsetDateTime>, current_version: u32) -> bool {
        self.config_version != current_version || self.overlaps(range)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Builds actually started.
    pub builds: u64,
    /// Misses that joined a build already in flight.
    pub coalesced: u64,
    /// Entries dropped by invalidation (not by LRU eviction).
    pub invalidations: u64,
    pub entries: usize,
    pub in_flight: usize,
}

type Outcome = Option<Result<Arc<Series>>>;

struct Flight {
    id: u64,
    stale: Arc<AtomicBool>,
    rx: watch::Receiver<Outcome>,
}

struct CacheInner {
    entries: LruCache<SeriesKey, Arc<Series>>,
    by_channel: HashMap<ChannelKey, HashSet<SeriesKey>>,
    in_flight: HashMap<SeriesKey, Flight>,
    next_flight: u64,
    generations: HashMap<ChannelKey, u64>,
}

impl CacheInner {
    fn insert(&mut self, key: SeriesKey, series: Arc<Series>) {
        if let Some((evicted, _)) = self.entries.push(key.clone(), series)
            && evicted != key
        {
            self.unindex(&evicted);
        }
        self.by_channel.entry(key.channel).or_default().insert(key);
    }

    fn unindex(&mut self, key: &SeriesKey) {
        if let Some(keys) = self.by_channel.get_mut(&key.channel) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_channel.remove(&key.channel);
            }
        }
    }

    /// Detach in-flight builds of `channel` matching `affected`.
    fn detach_flights(&mut self, channel: ChannelKey, affected: impl Fn(&SeriesKey) -> bool) {
        self.in_flight.retain(|key, flight| {
            if key.channel == channel && affected(key) {
                flight.stale.store(true, Ordering::Release);
                false
            } else {
                true
            }
        });
    }

    fn remove_flight(&mut self, key: &SeriesKey, id: u64) {
        if self.in_flight.get(key).is_some_and(|f| f.id == id) {
            self.in_flight.remove(key);
        }
    }
}

/// LRU cache of built series.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fieldline_core::cache::{QueryCache, SeriesKey};
/// use fieldline_types::{ChannelKey, Series, Thresholds, UnitId};
/// use time::macros::datetime;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = Arc::new(QueryCache::new(16));
///     let key = SeriesKey::new(
///         ChannelKey::new(11, 470, 1),
///         datetime!(2020-04-24 00:00 UTC),
///         datetime!(2020-04-25 00:00 UTC),
///         100,
///         UnitId(14),
///         4,
///     );
///     let series = cache
///         .get_or_build(key.clone(), async {
///             Ok(Series {
///                 account_id: 11,
///                 device_id: 470,
///                 channel_id: 1,
///                 channel_name: "Temperature".to_string(),
///                 unit_of_measure_id_used: UnitId(14),
///                 is_channel_limits_enabled: false,
///                 thresholds: Thresholds::default(),
///                 readings: Vec::new(),
///                 warnings: Vec::new(),
///             })
///         })
///         .await
///         .unwrap();
///     assert!(cache.get(&key).is_some());
///     assert_eq!(series.channel_name, "Temperature");
/// }
/// ```
pub struct QueryCache {
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    coalesced: AtomicU64,
    invalidations: AtomicU64,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl QueryCache {
    /// Create a cache holding at most `capacity` series (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                by_channel: HashMap::new(),
                in_flight: HashMap::new(),
                next_flight: 0,
                generations: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a finished series, refreshing its recency.
    pub fn get(&self, key: &SeriesKey) -> Option<Arc<Series>> {
        let hit = self.lock().entries.get(key).cloned();
        let counter = if hit.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Store a series, evicting the least recently used entry when full.
    pub fn put(&self, key: SeriesKey, series: Arc<Series>) {
        self.lock().insert(key, series);
    }

    /// Number of finished series held.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no finished series.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry of `channel` whose window overlaps `range` or whose
    /// configuration version differs from `current_version`.
    ///
    /// Returns the number of finished entries removed.
    pub fn invalidate(
        &self,
        channel: ChannelKey,
        range: RangeInclusive<OffsetDateTime>,
        current_version: u32,
    ) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<SeriesKey> = inner
            .by_channel
            .get(&channel)
            .map(|keys| {
                keys.iter()
                    .filter(|k| k.is_affected_by(&range, current_version))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for key in &doomed {
            inner.entries.pop(key);
            inner.unindex(key);
        }
        inner.detach_flights(channel, |k| k.is_affected_by(&range, current_version));
        drop(inner);

        if !doomed.is_empty() {
            debug!(
                "Invalidated {} cached series for channel {} ({} ..= {})",
                doomed.len(),
                channel,
                range.start(),
                range.end()
            );
        }
        self.invalidations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len()
    }

    /// Configuration generation of `channel`.
    ///
    /// Bumped by [`invalidate_channel`](Self::invalidate_channel).
    pub fn generation(&self, channel: ChannelKey) -> u64 {
        self.lock().generations.get(&channel).copied().unwrap_or(0)
    }

    /// Drop every entry of `channel` and start a new generation for it.
    pub fn invalidate_channel(&self, channel: ChannelKey) -> usize {
        let mut inner = self.lock();
        *inner.generations.entry(channel).or_default() += 1;
        let doomed = inner.by_channel.remove(&channel).unwrap_or_default();
        for key in &doomed {
            inner.entries.pop(key);
        }
        inner.detach_flights(channel, |_| true);
        drop(inner);

        debug!("Invalidated all {} cached series for channel {}", doomed.len(), channel);
        self.invalidations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len()
    }

    /// Return the cached series for `key`, or run `build` once for all concurrent
    /// callers asking for the same key.
    ///
    /// `build` runs on a spawned task. Its result is cached only if it succeeded and no
    /// overlapping invalidation happened while it ran.
    pub async fn get_or_build<F>(self: &Arc<Self>, key: SeriesKey, build: F) -> Result<Arc<Series>>
    where
        F: Future<Output = Result<Series>> + Send + 'static,
    {
        let generation = self.generation(key.channel);
        self.get_or_build_at(key, generation, build).await
    }

    /// Like [`get_or_build`](Self::get_or_build) for a build based on a channel snapshot
    /// read at `generation`.
    ///
    /// When the channel has moved on since, `build` still runs for this caller but its
    /// result is neither shared nor cached.
    pub async fn get_or_build_at<F>(
        self: &Arc<Self>,
        key: SeriesKey,
        generation: u64,
        build: F,
    ) -> Result<Arc<Series>>
    where
        F: Future<Output = Result<Series>> + Send + 'static,
    {
        let mut rx = {
            let mut inner = self.lock();
            let current = inner.generations.get(&key.channel).copied().unwrap_or(0) == generation;
            if current && let Some(hit) = inner.entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {}", key.channel);
                return Ok(Arc::clone(hit));
            }
            self.misses.fetch_add(1, Ordering::Relaxed);

            if current && let Some(flight) = inner.in_flight.get(&key) {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight build for {}", key.channel);
                flight.rx.clone()
            } else {
                self.builds.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                let id = inner.next_flight;
                inner.next_flight += 1;
                let stale = Arc::new(AtomicBool::new(!current));
                if current {
                    debug!("Cache miss for {}, building", key.channel);
                    inner.in_flight.insert(
                        key.clone(),
                        Flight {
                            id,
                            stale: Arc::clone(&stale),
                            rx: rx.clone(),
                        },
                    );
                } else {
                    debug!(
                        "Channel {} was reconfigured during lookup, building without caching",
                        key.channel
                    );
                }
                let guard = FlightGuard {
                    cache: Arc::clone(self),
                    key: key.clone(),
                    id,
                    stale,
                    tx: Some(tx),
                };
                tokio::spawn(async move {
                    let outcome = build.await.map(Arc::new);
                    guard.complete(outcome);
                });
                rx
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(Error::BuildAborted(format!(
                "build for channel {} ended without a result",
                key.channel
            )))
        })
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: inner.entries.len(),
            in_flight: inner.in_flight.len(),
        }
    }
}

/// Owns one in-flight build slot. Dropping it without completing (the build panicked)
/// releases the slot, which wakes waiters with [`Error::BuildAborted`].
struct FlightGuard {
    cache: Arc<QueryCache>,
    key: SeriesKey,
    id: u64,
    stale: Arc<AtomicBool>,
    tx: Option<watch::Sender<Outcome>>,
}

impl FlightGuard {
    fn complete(mut self, outcome: Result<Arc<Series>>) {
        {
            let mut inner = self.cache.lock();
            inner.remove_flight(&self.key, self.id);
            match &outcome {
                Ok(series) if !self.stale.load(Ordering::Acquire) => {
                    inner.insert(self.key.clone(), Arc::clone(series));
                }
                Ok(_) => debug!("Discarding stale build for {}", self.key.channel),
                Err(e) => debug!("Build for {} failed: {}", self.key.channel, e),
            }
        }
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.cache.lock().remove_flight(&self.key, self.id);
        }
    }
}
