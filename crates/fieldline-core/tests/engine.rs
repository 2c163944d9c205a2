//! End-to-end engine tests against an excerpt of the Rock Creek dashboard fixture.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use time::OffsetDateTime;
use time::macros::datetime;

use fieldline_core::{
    BuilderConfig, Cursor, Engine, EngineConfig, Error, FlagBasis, MemoryStore, ReadingPage,
    ReadingStore, RetryConfig, SeriesRequest,
};
use fieldline_types::{Channel, ChannelDocument, ChannelKey, ChannelLimits, Reading, Unit, UnitId};

const FIXTURE: &str = include_str!("fixtures/rock_creek.json");

const DAY_START: OffsetDateTime = datetime!(2020-04-24 00:00 UTC);
const DAY_END: OffsetDateTime = datetime!(2020-04-25 00:00 UTC);

fn temperature() -> ChannelKey {
    ChannelKey::new(11, 470, 27504)
}

fn pressure() -> ChannelKey {
    ChannelKey::new(11, 470, 27507)
}

fn config() -> EngineConfig {
    EngineConfig {
        builder: BuilderConfig {
            retry: RetryConfig::quick().initial_delay(Duration::from_millis(1)),
            ..BuilderConfig::default()
        },
        ..EngineConfig::default()
    }
}

async fn load_fixture(engine: &Engine) {
    let documents: Vec<ChannelDocument> = serde_json::from_str(FIXTURE).unwrap();
    for doc in documents {
        let key = doc.channel.key();
        engine.reconfigure(doc.channel).await.unwrap();
        engine.append_batch(key, doc.readings).await.unwrap();
    }
}

async fn fixture_engine() -> (Arc<MemoryStore>, Engine) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone(), config());
    load_fixture(&engine).await;
    (store, engine)
}

fn day(key: ChannelKey) -> SeriesRequest {
    SeriesRequest::new(key, DAY_START, DAY_END, 100)
}

// --- Fixture shape ---

#[tokio::test]
async fn test_fixture_series_matches_wire_shape() {
    let (_, engine) = fixture_engine().await;
    let series = engine.series(&day(temperature())).await.unwrap();

    assert_eq!(series.len(), 6);
    assert_eq!(series.unit_of_measure_id_used, Unit::Fahrenheit.id());
    assert_eq!(series.readings[0].reading_value, 50.17122);
    assert!(!series.is_channel_limits_enabled);

    let json = serde_json::to_value(&*series).unwrap();
    assert_eq!(json["accountId"], 11);
    assert_eq!(json["deviceId"], 470);
    assert_eq!(json["channelId"], 27504);
    assert_eq!(json["channelName"], "Temperature");
    assert_eq!(json["unitOfMeasureIdUsed"], 14);
    assert_eq!(json["readings"][0]["readingDate"], "2020-04-24T14:02:07+00:00");
    assert_eq!(json["readings"][0]["exceedsLimitValues"], false);
    assert_eq!(json["thresholds"]["upperHigh"], 0.0);
}

#[tokio::test]
async fn test_fixture_temperature_in_celsius() {
    let (_, engine) = fixture_engine().await;
    let request = day(temperature()).with_display_unit(Unit::Celsius.id());
    let series = engine.series(&request).await.unwrap();
    assert_eq!(series.unit_of_measure_id_used, Unit::Celsius.id());
    assert!((series.readings[0].reading_value - 10.095_122_2).abs() < 1e-6);
}

#[tokio::test]
async fn test_cross_category_request_fails() {
    let (_, engine) = fixture_engine().await;
    let request = day(temperature()).with_display_unit(Unit::InchesOfWater.id());
    assert_eq!(
        engine.series(&request).await.unwrap_err(),
        Error::UnsupportedConversion {
            from: UnitId(14),
            to: UnitId(3)
        }
    );
}

#[tokio::test]
async fn test_invalid_ranges_rejected() {
    let (_, engine) = fixture_engine().await;
    let backwards = SeriesRequest::new(temperature(), DAY_END, DAY_START, 100);
    assert!(matches!(engine.series(&backwards).await, Err(Error::InvalidRange(_))));
    let zero = SeriesRequest::new(temperature(), DAY_START, DAY_END, 0);
    assert!(matches!(engine.series(&zero).await, Err(Error::InvalidRange(_))));
}

#[tokio::test]
async fn test_unknown_channel() {
    let (_, engine) = fixture_engine().await;
    let missing = ChannelKey::new(11, 470, 99);
    assert_eq!(
        engine.series(&day(missing)).await.unwrap_err(),
        Error::ChannelNotFound(missing)
    );
}

// --- Limits ---

#[tokio::test]
async fn test_pressure_exceedance_flows_into_series() {
    let (_, engine) = fixture_engine().await;
    let series = engine.series(&day(pressure())).await.unwrap();
    assert!(series.is_channel_limits_enabled);
    assert!(series.readings.iter().all(|r| !r.exceeds_limit_values));
    assert_eq!(series.thresholds.upper_high, 14.0);

    let spike = Reading::new(datetime!(2020-04-24 15:00:00 UTC), 15.0);
    assert!(engine.append(pressure(), spike).await.unwrap().exceeds_limit_values);

    let series = engine.series(&day(pressure())).await.unwrap();
    assert!(series.readings.contains(&spike.flagged(true)));
}

#[tokio::test]
async fn test_retroactive_reconfiguration_reflags() {
    let (store, engine) = fixture_engine().await;
    let before = engine.series(&day(pressure())).await.unwrap();
    assert!(before.readings.iter().all(|r| !r.exceeds_limit_values));

    let mut channel = store.channel(pressure()).await.unwrap().unwrap();
    channel.limits = ChannelLimits::outer(8.2, -100.0);
    channel.sensor_config_version_tag += 1;
    assert!(engine.reconfigure(channel).await.unwrap());

    let after = engine.series(&day(pressure())).await.unwrap();
    let flagged: Vec<f64> = after
        .readings
        .iter()
        .filter(|r| r.exceeds_limit_values)
        .map(|r| r.reading_value)
        .collect();
    assert!(!flagged.is_empty());
    assert!(flagged.iter().all(|v| *v > 8.2));
}

// --- Cache ---

#[tokio::test]
async fn test_cache_coherence_after_append() {
    let (store, engine) = fixture_engine().await;
    let next_day = SeriesRequest::new(
        temperature(),
        DAY_END,
        DAY_END + time::Duration::days(1),
        100,
    );

    let original = engine.series(&day(temperature())).await.unwrap();
    engine.series(&next_day).await.unwrap();

    let late = Reading::new(datetime!(2020-04-24 20:00:00 UTC), 49.5);
    let receipt = engine.append(temperature(), late).await.unwrap();
    assert_eq!(receipt.invalidated, 1);

    let rebuilt = engine.series(&day(temperature())).await.unwrap();
    assert_eq!(rebuilt.len(), original.len() + 1);
    assert!(rebuilt.readings.contains(&late));

    let queries = store.query_count();
    let hits = engine.cache_stats().hits;
    engine.series(&next_day).await.unwrap();
    assert_eq!(store.query_count(), queries);
    assert_eq!(engine.cache_stats().hits, hits + 1);
}

#[tokio::test]
async fn test_builds_are_idempotent() {
    let (_, engine) = fixture_engine().await;
    let request = day(pressure()).with_display_unit(Unit::Psi.id());

    let direct_a = engine.builder().build(&request).await.unwrap();
    let direct_b = engine.builder().build(&request).await.unwrap();
    assert_eq!(
        serde_json::to_vec(&direct_a).unwrap(),
        serde_json::to_vec(&direct_b).unwrap()
    );

    let cached = engine.series(&request).await.unwrap();
    assert_eq!(
        serde_json::to_vec(&*cached).unwrap(),
        serde_json::to_vec(&direct_a).unwrap()
    );
}

#[tokio::test]
async fn test_concurrent_identical_requests_coalesce() {
    let (store, engine) = fixture_engine().await;
    store.set_latency(Duration::from_millis(20));
    let engine = Arc::new(engine);
    let queries = store.query_count();

    let results = join_all((0..10).map(|_| {
        let engine = Arc::clone(&engine);
        async move { engine.series(&day(temperature())).await }
    }))
    .await;

    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }
    assert_eq!(store.query_count() - queries, 1);
    assert_eq!(engine.cache_stats().builds, 1);
}

#[tokio::test]
async fn test_cancelled_build_still_populates_cache() {
    let (store, engine) = fixture_engine().await;
    let engine = Arc::new(engine);
    store.set_latency(Duration::from_millis(20));

    let caller = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.series(&day(pressure())).await })
    };
    // Past the channel load, inside the range query.
    tokio::time::sleep(Duration::from_millis(30)).await;
    caller.abort();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(engine.cache_stats().entries, 1);
    store.set_latency(Duration::ZERO);
    let queries = store.query_count();
    engine.series(&day(pressure())).await.unwrap();
    assert_eq!(store.query_count(), queries);
}

// --- Store failures ---

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let (store, engine) = fixture_engine().await;
    store.fail_next(2);
    let series = engine.series(&day(temperature())).await.unwrap();
    assert_eq!(series.len(), 6);
}

/// Delegates to a [`MemoryStore`] but fails every range query after a delay.
struct BrokenRangeStore {
    inner: MemoryStore,
    queries: AtomicU64,
}

#[async_trait]
impl ReadingStore for BrokenRangeStore {
    async fn channel(&self, key: ChannelKey) -> fieldline_core::Result<Option<Channel>> {
        self.inner.channel(key).await
    }

    async fn put_channel(&self, channel: Channel) -> fieldline_core::Result<Option<Channel>> {
        self.inner.put_channel(channel).await
    }

    async fn channels(&self) -> fieldline_core::Result<Vec<Channel>> {
        self.inner.channels().await
    }

    async fn append_reading(
        &self,
        key: ChannelKey,
        reading: Reading,
        basis: FlagBasis,
    ) -> fieldline_core::Result<u64> {
        self.inner.append_reading(key, reading, basis).await
    }

    async fn query_range(
        &self,
        _key: ChannelKey,
        _start: OffsetDateTime,
        _end: OffsetDateTime,
        _after: Option<Cursor>,
        _limit: usize,
    ) -> fieldline_core::Result<ReadingPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(Error::Store("page checksum mismatch".to_string()))
    }
}

#[tokio::test]
async fn test_failed_build_reaches_all_waiters_identically() {
    let store = Arc::new(BrokenRangeStore {
        inner: MemoryStore::new(),
        queries: AtomicU64::new(0),
    });
    let engine = Arc::new(Engine::new(store.clone(), config()));
    engine
        .reconfigure(Channel::new(temperature(), "Temperature", Unit::Fahrenheit.id()))
        .await
        .unwrap();

    let results = join_all((0..5).map(|_| {
        let engine = Arc::clone(&engine);
        async move { engine.series(&day(temperature())).await }
    }))
    .await;

    let expected = Error::Store("page checksum mismatch".to_string());
    for result in results {
        assert_eq!(result.unwrap_err(), expected);
    }
    // Fatal errors are not retried and the build ran once.
    assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache_stats().entries, 0);
}

// --- Downsampling through the engine ---

async fn dense_engine(n: i64) -> (ChannelKey, Engine) {
    let key = ChannelKey::new(1, 2, 3);
    let engine = Engine::new(Arc::new(MemoryStore::new()), config());
    let channel = Channel::new(key, "Depth", Unit::Meters.id())
        .with_limits(ChannelLimits::outer(9.5, -9.5));
    engine.reconfigure(channel).await.unwrap();
    let readings = (0..n)
        .map(|i| {
            let value = 10.0 * ((i as f64) / 300.0).sin();
            Reading::new(DAY_START + time::Duration::seconds(i), value)
        })
        .collect();
    engine.append_batch(key, readings).await.unwrap();
    (key, engine)
}

#[tokio::test]
async fn test_ten_thousand_readings_to_one_hundred() {
    let (key, engine) = dense_engine(10_000).await;
    let reduced = engine
        .series(&SeriesRequest::new(key, DAY_START, DAY_END, 100))
        .await
        .unwrap();
    assert!(reduced.len() <= 100);

    let full = engine
        .series(&SeriesRequest::new(key, DAY_START, DAY_END, 10_000))
        .await
        .unwrap();
    assert_eq!(full.len(), 10_000);
    assert!(full.readings.windows(2).all(|w| w[0].reading_date < w[1].reading_date));
}

#[tokio::test]
async fn test_exceedances_survive_downsampling() {
    let (key, engine) = dense_engine(10_000).await;
    let window_end = DAY_START + time::Duration::seconds(10_000);
    let full = engine
        .series(&SeriesRequest::new(key, DAY_START, window_end, 10_000))
        .await
        .unwrap();
    let reduced = engine
        .series(&SeriesRequest::new(key, DAY_START, window_end, 50))
        .await
        .unwrap();

    // Every bucket of 200 s holding an exceedance must surface one.
    let bucket = |r: &Reading| (r.reading_date - DAY_START).whole_seconds() / 200;
    for flagged in full.readings.iter().filter(|r| r.exceeds_limit_values) {
        assert!(
            reduced
                .readings
                .iter()
                .any(|r| r.exceeds_limit_values && bucket(r) == bucket(flagged)),
            "exceedance at {} lost",
            flagged.reading_date
        );
    }
}
