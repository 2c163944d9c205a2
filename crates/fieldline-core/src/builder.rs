//! Series builder: store range → exceedance check → unit conversion → downsampling.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, warn};

use fieldline_types::{Channel, ChannelKey, Series, UnitId};

use crate::downsample::Downsampler;
use crate::error::{Error, Result};
use crate::limits::{self, FlagBasis, check_configuration, convert_limits};
use crate::retry::{RetryConfig, with_retry};
use crate::traits::ReadingStore;
use crate::units::Conversion;

/// Default cap on points in any series.
pub const DEFAULT_MAX_CHART_ITEMS: usize = 10_000;

/// Default number of readings fetched per store page.
pub const DEFAULT_PAGE_SIZE: usize = 5_000;

/// Parameters of one series query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub key: ChannelKey,
    /// Inclusive window start.
    pub start: OffsetDateTime,
    /// Exclusive window end.
    pub end: OffsetDateTime,
    pub max_points: usize,
    /// Requested unit; [`UnitId::UNSPECIFIED`] defers to the channel.
    pub display_unit: UnitId,
}

impl SeriesRequest {
    /// A request in the channel's own display unit.
    #[must_use]
    pub fn new(key: ChannelKey, start: OffsetDateTime, end: OffsetDateTime, max_points: usize) -> Self {
        Self {
            key,
            start,
            end,
            max_points,
            display_unit: UnitId::UNSPECIFIED,
        }
    }

    /// Builder-style setter for the display unit.
    #[must_use]
    pub fn with_display_unit(mut self, unit: UnitId) -> Self {
        self.display_unit = unit;
        self
    }

    /// Reject empty windows and zero point budgets.
    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(Error::InvalidRange(format!(
                "start {} is not before end {}",
                self.start, self.end
            )));
        }
        if self.max_points == 0 {
            return Err(Error::InvalidRange("max points must be positive".to_string()));
        }
        Ok(())
    }
}

/// Builder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderConfig {
    /// Hard cap applied on top of every request's `max_points`.
    pub max_chart_items: usize,
    /// Readings per store page.
    pub page_size: usize,
    /// Backoff for transient store failures.
    pub retry: RetryConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_chart_items: DEFAULT_MAX_CHART_ITEMS,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryConfig::for_store(),
        }
    }
}

/// Pick the unit a series is expressed in.
///
/// An explicit request wins; otherwise the channel's user override, otherwise its
/// default unit. An override naming an unknown unit is a configuration error.
pub fn resolve_display_unit(channel: &Channel, requested: UnitId) -> Result<UnitId> {
    if !requested.is_unspecified() {
        return Ok(requested);
    }
    match channel.user_unit() {
        Ok(Some(unit)) => Ok(unit.id()),
        Ok(None) => Ok(channel.unit_of_measure_id_default),
        Err(e) => Err(Error::InvalidConfig(format!(
            "channel {} has an unusable unit override: {e}",
            channel.key()
        ))),
    }
}

/// Produces [`Series`] from a [`ReadingStore`]. Never writes to the store.
pub struct SeriesBuilder {
    store: Arc<dyn ReadingStore>,
    config: BuilderConfig,
}

impl std::fmt::Debug for SeriesBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SeriesBuilder {
    pub fn new(store: Arc<dyn ReadingStore>, config: BuilderConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    /// The point budget actually used for a requested one.
    #[must_use]
    pub fn effective_max_points(&self, requested: usize) -> usize {
        requested.min(self.config.max_chart_items.max(1))
    }

    /// Load a channel snapshot, retrying transient failures.
    pub async fn load_channel(&self, key: ChannelKey) -> Result<Channel> {
        with_retry(&self.config.retry, "channel", || self.store.channel(key))
            .await?
            .ok_or(Error::ChannelNotFound(key))
    }

    /// Build a series for `request`.
    pub async fn build(&self, request: &SeriesRequest) -> Result<Series> {
        request.validate()?;
        let channel = self.load_channel(request.key).await?;
        self.build_for(&channel, request).await
    }

    /// Build a series against an already loaded channel snapshot.
    pub async fn build_for(&self, channel: &Channel, request: &SeriesRequest) -> Result<Series> {
        request.validate()?;
        let key = request.key;
        let source = channel.unit_of_measure_id_default;
        let target = resolve_display_unit(channel, request.display_unit)?;
        let conversion = Conversion::new(source, target)?;

        let channel_limits = channel.limits;
        let warnings: Vec<_> = check_configuration(&channel_limits).into_iter().collect();
        for w in &warnings {
            warn!("Channel {}: {}", key, w);
        }
        let basis = FlagBasis::of(channel);

        let max_points = self.effective_max_points(request.max_points);
        let mut sampler = Downsampler::new(request.start, request.end, max_points)?;
        let page_size = self.config.page_size.max(1);
        let mut after = None;
        let mut pages = 0usize;
        let mut reevaluated = 0usize;

        loop {
            let page = with_retry(&self.config.retry, "query_range", || {
                self.store
                    .query_range(key, request.start, request.end, after, page_size)
            })
            .await?;
            pages += 1;

            for stored in page.readings {
                let mut reading = stored.reading;
                if stored.basis != basis {
                    reading.exceeds_limit_values =
                        limits::exceeds(reading.reading_value, &channel_limits);
                    reevaluated += 1;
                }
                reading.reading_value = conversion.apply(reading.reading_value);
                sampler.push(reading)?;
            }

            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        let raw = sampler.raw_count();
        let readings = sampler.finish();
        debug!(
            "Built series for {}: {} raw readings in {} pages -> {} points (unit {} -> {}, {} re-evaluated)",
            key,
            raw,
            pages,
            readings.len(),
            source,
            target,
            reevaluated
        );

        let thresholds = convert_limits(&channel_limits, source, target)?.thresholds();
        Ok(Series {
            account_id: channel.account_id,
            device_id: channel.device_id,
            channel_id: channel.channel_id,
            channel_name: channel.channel_name.clone(),
            unit_of_measure_id_used: target,
            is_channel_limits_enabled: channel_limits.enabled,
            thresholds,
            readings,
            warnings,
        })
    }
}
