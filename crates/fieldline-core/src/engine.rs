//! The engine: cached series queries plus ingest with eager cache invalidation.
//!
//! Reads go through the [`QueryCache`], so identical concurrent queries share one build.
//! Writes are serialized per channel by a writer lock; independent channels ingest in
//! parallel. The writer lock is the only lock held across a store call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use fieldline_types::{Channel, ChannelKey, ConfigurationWarning, Reading, Series};

use crate::builder::{BuilderConfig, SeriesBuilder, SeriesRequest, resolve_display_unit};
use crate::cache::{CacheStats, QueryCache, SeriesKey};
use crate::error::{Error, Result};
use crate::limits::{self, FlagBasis};
use crate::traits::ReadingStore;

/// Default number of series held by the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub builder: BuilderConfig,
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            builder: BuilderConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Result of appending one reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    /// Store-assigned sequence.
    pub sequence: u64,
    /// The exceedance flag as stored.
    pub exceeds_limit_values: bool,
    /// The step from the previously appended reading broke the channel delta limit.
    pub exceeds_delta: bool,
    /// Cached series dropped because of this reading.
    pub invalidated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ConfigurationWarning>,
}

/// Result of appending a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceipt {
    pub appended: usize,
    pub exceeding: usize,
    pub invalidated: usize,
}

#[derive(Debug, Default)]
struct WriterState {
    last: Option<Reading>,
}

/// Downsampling and ingest engine over a [`ReadingStore`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fieldline_core::{Engine, EngineConfig, MemoryStore, SeriesRequest};
/// use fieldline_types::{Channel, ChannelKey, ChannelLimits, Reading, UnitId};
/// use time::macros::datetime;
///
/// #[tokio::main]
/// async fn main() -> Result<(), fieldline_core::Error> {
///     let engine = Engine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
///     let key = ChannelKey::new(11, 470, 27507);
///     let channel = Channel::new(key, "Pressure", UnitId(3))
///         .with_limits(ChannelLimits::outer(14.0, -100.0));
///     engine.reconfigure(channel).await?;
///
///     let receipt = engine
///         .append(key, Reading::new(datetime!(2020-04-24 14:02:07 UTC), 15.0))
///         .await?;
///     assert!(receipt.exceeds_limit_values);
///
///     let request = SeriesRequest::new(
///         key,
///         datetime!(2020-04-24 00:00 UTC),
///         datetime!(2020-04-25 00:00 UTC),
///         100,
///     );
///     let series = engine.series(&request).await?;
///     assert_eq!(series.readings.len(), 1);
///     Ok(())
/// }
/// ```
pub struct Engine {
    store: Arc<dyn ReadingStore>,
    builder: Arc<SeriesBuilder>,
    cache: Arc<QueryCache>,
    writers: Mutex<HashMap<ChannelKey, Arc<AsyncMutex<WriterState>>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("builder", &self.builder)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(store: Arc<dyn ReadingStore>, config: EngineConfig) -> Self {
        info!(
            "Engine ready: cache capacity {}, max chart items {}, page size {}",
            config.cache_capacity, config.builder.max_chart_items, config.builder.page_size
        );
        Self {
            builder: Arc::new(SeriesBuilder::new(Arc::clone(&store), config.builder)),
            cache: Arc::new(QueryCache::new(config.cache_capacity)),
            store,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    pub fn builder(&self) -> &SeriesBuilder {
        &self.builder
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Serve a series from cache, or build it once for all concurrent identical callers.
    pub async fn series(&self, request: &SeriesRequest) -> Result<Arc<Series>> {
        request.validate()?;
        // Taken before the snapshot loads; a reconfigure in between keeps this build
        // out of the cache.
        let generation = self.cache.generation(request.key);
        let channel = self.builder.load_channel(request.key).await?;
        let display_unit = resolve_display_unit(&channel, request.display_unit)?;
        let max_points = self.builder.effective_max_points(request.max_points);
        let key = SeriesKey::new(
            request.key,
            request.start,
            request.end,
            max_points,
            display_unit,
            channel.sensor_config_version_tag,
        );

        let builder = Arc::clone(&self.builder);
        let request = SeriesRequest {
            max_points,
            display_unit,
            ..request.clone()
        };
        self.cache
            .get_or_build_at(key, generation, async move {
                builder.build_for(&channel, &request).await
            })
            .await
    }

    /// All channel snapshots known to the store.
    pub async fn channels(&self) -> Result<Vec<Channel>> {
        self.store.channels().await
    }

    fn writer(&self, key: ChannelKey) -> Arc<AsyncMutex<WriterState>> {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(writers.entry(key).or_default())
    }

    async fn current_channel(&self, key: ChannelKey) -> Result<Channel> {
        self.store
            .channel(key)
            .await?
            .ok_or(Error::ChannelNotFound(key))
    }

    /// Append one reading.
    ///
    /// The exceedance flag is recomputed from the channel's current limits; whatever the
    /// caller set is ignored. Cached series of the channel covering the reading's
    /// timestamp are dropped before this returns.
    pub async fn append(&self, key: ChannelKey, reading: Reading) -> Result<IngestReceipt> {
        let writer = self.writer(key);
        let mut state = writer.lock().await;

        let channel = self.current_channel(key).await?;
        let evaluation = limits::evaluate(reading.reading_value, &channel.limits);
        let reading = reading.flagged(evaluation.exceeds);
        let version = channel.sensor_config_version_tag;

        let sequence = self
            .store
            .append_reading(key, reading, FlagBasis::of(&channel))
            .await?;

        let exceeds_delta = state.last.is_some_and(|prev| {
            prev.reading_date <= reading.reading_date
                && limits::exceeds_delta(prev.reading_value, reading.reading_value, &channel.limits)
        });
        if exceeds_delta {
            warn!("Channel {}: delta limit exceeded at {}", key, reading.reading_date);
        }
        if state
            .last
            .is_none_or(|prev| prev.reading_date <= reading.reading_date)
        {
            state.last = Some(reading);
        }

        let ts = reading.reading_date;
        let invalidated = self.cache.invalidate(key, ts..=ts, version);
        debug!(
            "Appended reading {} to {} (exceeds: {}, invalidated: {})",
            sequence, key, evaluation.exceeds, invalidated
        );

        Ok(IngestReceipt {
            sequence,
            exceeds_limit_values: evaluation.exceeds,
            exceeds_delta,
            invalidated,
            warning: evaluation.warning,
        })
    }

    /// Append several readings under one writer lock, in timestamp order.
    ///
    /// The cache is invalidated once for the whole span of the batch.
    pub async fn append_batch(&self, key: ChannelKey, mut readings: Vec<Reading>) -> Result<BatchReceipt> {
        if readings.is_empty() {
            return Ok(BatchReceipt::default());
        }
        readings.sort_by_key(|r| r.reading_date);

        let writer = self.writer(key);
        let mut state = writer.lock().await;
        let channel = self.current_channel(key).await?;
        if let Some(w) = limits::check_configuration(&channel.limits) {
            warn!("Channel {}: {}", key, w);
        }
        let version = channel.sensor_config_version_tag;
        let basis = FlagBasis::of(&channel);

        let mut receipt = BatchReceipt::default();
        let mut appended_span = None;
        let mut failure = None;
        for reading in readings {
            let reading = reading.flagged(limits::exceeds(reading.reading_value, &channel.limits));
            match self.store.append_reading(key, reading, basis).await {
                Ok(_) => {
                    receipt.appended += 1;
                    receipt.exceeding += usize::from(reading.exceeds_limit_values);
                    let first = appended_span.map_or(reading.reading_date, |(first, _)| first);
                    appended_span = Some((first, reading.reading_date));
                    if state
                        .last
                        .is_none_or(|prev| prev.reading_date <= reading.reading_date)
                    {
                        state.last = Some(reading);
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Whatever made it into the store must not be hidden by the cache.
        if let Some((first, last)) = appended_span {
            receipt.invalidated = self.cache.invalidate(key, first..=last, version);
        }
        debug!(
            "Appended batch of {} readings to {} ({} exceeding, {} invalidated)",
            receipt.appended, key, receipt.exceeding, receipt.invalidated
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(receipt),
        }
    }

    /// Insert or replace a channel snapshot.
    ///
    /// Returns whether anything changed. Any change drops every cached series of the
    /// channel. A new version tag or new outer bounds also make the builder re-evaluate
    /// stored flags.
    pub async fn reconfigure(&self, channel: Channel) -> Result<bool> {
        let key = channel.key();
        let writer = self.writer(key);
        let mut state = writer.lock().await;

        if let Some(w) = limits::check_configuration(&channel.limits) {
            warn!("Channel {} reconfigured with {}", key, w);
        }
        let version = channel.sensor_config_version_tag;
        let previous = self.store.put_channel(channel.clone()).await?;
        let changed = previous.as_ref() != Some(&channel);
        if changed {
            let dropped = self.cache.invalidate_channel(key);
            state.last = None;
            match previous {
                Some(p) => info!(
                    "Channel {} reconfigured (version {} -> {}), dropped {} cached series",
                    key, p.sensor_config_version_tag, version, dropped
                ),
                None => info!("Channel {} registered at version {}", key, version),
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use fieldline_types::{ChannelLimits, UnitId};
    use time::OffsetDateTime;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2020-04-24 00:00 UTC);

    fn key() -> ChannelKey {
        ChannelKey::new(11, 470, 27507)
    }

    fn pressure() -> Channel {
        Channel::new(key(), "Pressure", UnitId(3))
            .with_limits(ChannelLimits {
                delta: 5.0,
                ..ChannelLimits::outer(14.0, -100.0)
            })
            .with_version(4)
    }

    async fn engine() -> (Arc<MemoryStore>, Engine) {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), EngineConfig::default());
        engine.reconfigure(pressure()).await.unwrap();
        (store, engine)
    }

    fn at(minutes: i64, value: f64) -> Reading {
        Reading::new(T0 + time::Duration::minutes(minutes), value)
    }

    #[tokio::test]
    async fn test_append_recomputes_flag() {
        let (_, engine) = engine().await;
        let receipt = engine.append(key(), at(0, 8.33).flagged(true)).await.unwrap();
        assert!(!receipt.exceeds_limit_values);
        let receipt = engine.append(key(), at(1, 15.0)).await.unwrap();
        assert!(receipt.exceeds_limit_values);
        assert!(receipt.sequence > 0);
    }

    #[tokio::test]
    async fn test_append_reports_delta() {
        let (_, engine) = engine().await;
        assert!(!engine.append(key(), at(0, 1.0)).await.unwrap().exceeds_delta);
        assert!(!engine.append(key(), at(1, 4.0)).await.unwrap().exceeds_delta);
        assert!(engine.append(key(), at(2, 10.0)).await.unwrap().exceeds_delta);
    }

    #[tokio::test]
    async fn test_append_unknown_channel() {
        let (_, engine) = engine().await;
        let other = ChannelKey::new(1, 1, 1);
        assert_eq!(
            engine.append(other, at(0, 1.0)).await.unwrap_err(),
            Error::ChannelNotFound(other)
        );
    }

    #[tokio::test]
    async fn test_batch_sorted_and_counted() {
        let (store, engine) = engine().await;
        let receipt = engine
            .append_batch(key(), vec![at(3, 20.0), at(1, 1.0), at(2, 2.0)])
            .await
            .unwrap();
        assert_eq!(receipt.appended, 3);
        assert_eq!(receipt.exceeding, 1);
        assert_eq!(store.reading_count(key()).await, 3);
        assert_eq!(engine.append_batch(key(), Vec::new()).await.unwrap(), BatchReceipt::default());
    }

    #[tokio::test]
    async fn test_reconfigure_reports_change() {
        let (_, engine) = engine().await;
        assert!(!engine.reconfigure(pressure()).await.unwrap());
        assert!(engine.reconfigure(pressure().with_version(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_tighter_limits_same_version_reflag_series() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store, EngineConfig::default());
        let channel = Channel::new(key(), "Pressure", UnitId(3))
            .with_limits(ChannelLimits::outer(14.0, -100.0));
        engine.reconfigure(channel.clone()).await.unwrap();
        assert!(!engine.append(key(), at(0, 12.0)).await.unwrap().exceeds_limit_values);

        let request = SeriesRequest::new(key(), T0, T0 + time::Duration::hours(1), 100);
        assert!(!engine.series(&request).await.unwrap().readings[0].exceeds_limit_values);

        let tightened = channel.with_limits(ChannelLimits::outer(10.0, -100.0));
        assert!(engine.reconfigure(tightened).await.unwrap());

        let series = engine.series(&request).await.unwrap();
        assert_eq!(series.thresholds.upper_high, 10.0);
        assert_eq!(series.readings[0].reading_value, 12.0);
        assert!(series.readings[0].exceeds_limit_values);
    }

    #[tokio::test]
    async fn test_reconfigure_bumps_cache_generation() {
        let (_, engine) = engine().await;
        let before = engine.cache().generation(key());
        assert!(!engine.reconfigure(pressure()).await.unwrap());
        assert_eq!(engine.cache().generation(key()), before);
        assert!(engine.reconfigure(pressure().with_version(5)).await.unwrap());
        assert_eq!(engine.cache().generation(key()), before + 1);
    }

    #[tokio::test]
    async fn test_series_served_from_cache() {
        let (store, engine) = engine().await;
        engine.append(key(), at(0, 1.0)).await.unwrap();
        let request = SeriesRequest::new(key(), T0, T0 + time::Duration::hours(1), 100);

        let first = engine.series(&request).await.unwrap();
        let queries = store.query_count();
        let second = engine.series(&request).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.query_count(), queries);
        assert_eq!(engine.cache_stats().hits, 1);
    }
}
