//! Core types for Fieldline telemetry.
//!
//! JSON field names follow the dashboard wire format (camelCase, e.g. `readingDate`,
//! `channelUpperLimitHigh`) so fixtures and existing consumers round-trip unchanged.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ParseResult;
use crate::units::{Unit, UnitId};

/// Composite identity of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ChannelKey {
    /// Owning account.
    pub account_id: u32,
    /// Device the channel belongs to.
    pub device_id: u32,
    /// Channel id on the device.
    pub channel_id: u32,
}

impl ChannelKey {
    /// Create a key from its parts.
    #[must_use]
    pub fn new(account_id: u32, device_id: u32, channel_id: u32) -> Self {
        Self {
            account_id,
            device_id,
            channel_id,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account_id, self.device_id, self.channel_id)
    }
}

/// Threshold values in the shape published with a series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Thresholds {
    /// Outer upper bound; exceeding it sets the exceedance flag.
    pub upper_high: f64,
    /// Inner upper bound, used for shading only.
    pub upper_low: f64,
    /// Inner lower bound, used for shading only.
    pub lower_high: f64,
    /// Outer lower bound; going below it sets the exceedance flag.
    pub lower_low: f64,
}

/// Per-channel limit configuration, as stored on the channel snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelLimits {
    /// When false no reading ever exceeds, whatever the thresholds say.
    #[cfg_attr(feature = "serde", serde(rename = "isChannelLimitsEnabled", default))]
    pub enabled: bool,
    /// Maximum change between consecutive readings (0 disables).
    #[cfg_attr(feature = "serde", serde(rename = "channelDeltaLimit", default))]
    pub delta: f64,
    #[cfg_attr(feature = "serde", serde(rename = "channelUpperLimitHigh", default))]
    pub upper_high: f64,
    #[cfg_attr(feature = "serde", serde(rename = "channelUpperLimitLow", default))]
    pub upper_low: f64,
    #[cfg_attr(feature = "serde", serde(rename = "channelLowerLimitHigh", default))]
    pub lower_high: f64,
    #[cfg_attr(feature = "serde", serde(rename = "channelLowerLimitLow", default))]
    pub lower_low: f64,
}

impl ChannelLimits {
    /// Limits that never flag anything (the `0/0/0/0` disabled configuration).
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled limits with the given outer bounds; inner bounds mirror the outer ones.
    #[must_use]
    pub fn outer(upper_high: f64, lower_low: f64) -> Self {
        Self {
            enabled: true,
            delta: 0.0,
            upper_high,
            upper_low: upper_high,
            lower_high: lower_low,
            lower_low,
        }
    }

    /// The four threshold values.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            upper_high: self.upper_high,
            upper_low: self.upper_low,
            lower_high: self.lower_high,
            lower_low: self.lower_low,
        }
    }

    /// Whether the outer pair is inverted (`upper_high < lower_low`).
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        self.upper_high < self.lower_low
    }
}

/// Snapshot of a channel's configuration.
///
/// Channels are provisioned and reconfigured elsewhere; the engine only reads them.
/// `sensor_config_version_tag` changes whenever the configuration changes, which is how
/// cached series and stored exceedance flags are recognized as stale.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Channel {
    pub account_id: u32,
    pub device_id: u32,
    pub channel_id: u32,
    pub channel_name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_type_id: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_type_name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_register_address: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sensor_config_id: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sensor_config_global_id: Uuid,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sensor_name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sensor_bus_address: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sensor_config_version_tag: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit_of_measure_id_default: UnitId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit_of_measure_category_id: u16,
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit_of_measure_name_default: String,
    /// User override as a display name; `null` and `""` both mean "no override".
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit_of_measure_user_defined: Option<String>,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub is_channel_enabled: bool,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub is_channel_visible: bool,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub limits: ChannelLimits,
}

#[cfg(feature = "serde")]
fn default_true() -> bool {
    true
}

impl Channel {
    /// Minimal snapshot for a channel; the remaining descriptive fields are empty.
    #[must_use]
    pub fn new(key: ChannelKey, name: &str, default_unit: UnitId) -> Self {
        let category = default_unit
            .unit()
            .map(|u| u.category().id())
            .unwrap_or_default();
        Self {
            account_id: key.account_id,
            device_id: key.device_id,
            channel_id: key.channel_id,
            channel_name: name.to_string(),
            channel_type_id: 0,
            channel_type_name: String::new(),
            channel_register_address: 0,
            sensor_config_id: 0,
            sensor_config_global_id: Uuid::nil(),
            sensor_name: String::new(),
            sensor_bus_address: 0,
            sensor_config_version_tag: 0,
            unit_of_measure_id_default: default_unit,
            unit_of_measure_category_id: category,
            unit_of_measure_name_default: default_unit
                .unit()
                .map(|u| u.name().to_string())
                .unwrap_or_default(),
            unit_of_measure_user_defined: None,
            is_channel_enabled: true,
            is_channel_visible: true,
            limits: ChannelLimits::disabled(),
        }
    }

    /// Builder-style setter for the limit configuration.
    #[must_use]
    pub fn with_limits(mut self, limits: ChannelLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builder-style setter for the configuration version tag.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.sensor_config_version_tag = version;
        self
    }

    /// Builder-style setter for the user unit override.
    #[must_use]
    pub fn with_user_unit(mut self, unit: Unit) -> Self {
        self.unit_of_measure_user_defined = Some(unit.name().to_string());
        self
    }

    /// Key identifying this channel.
    #[must_use]
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.account_id, self.device_id, self.channel_id)
    }

    /// Resolve the user override, if any.
    ///
    /// Returns `Ok(None)` when no override is set (`null` or blank).
    pub fn user_unit(&self) -> ParseResult<Option<Unit>> {
        match self.unit_of_measure_user_defined.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => Unit::from_name(name).map(Some),
        }
    }
}

/// One timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Reading {
    /// Sample time, serialized as `2020-04-24T14:02:07+00:00`.
    #[cfg_attr(feature = "serde", serde(with = "crate::formats::iso"))]
    pub reading_date: OffsetDateTime,
    /// Measured value in the unit the surrounding context declares.
    pub reading_value: f64,
    /// Whether the value violated the channel's outer thresholds.
    #[cfg_attr(feature = "serde", serde(default))]
    pub exceeds_limit_values: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sensor_latitude: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sensor_longitude: f64,
}

impl Reading {
    /// A reading without position or exceedance flag.
    #[must_use]
    pub fn new(reading_date: OffsetDateTime, reading_value: f64) -> Self {
        Self {
            reading_date,
            reading_value,
            exceeds_limit_values: false,
            sensor_latitude: 0.0,
            sensor_longitude: 0.0,
        }
    }

    /// Builder-style setter for the exceedance flag.
    #[must_use]
    pub fn flagged(mut self, exceeds: bool) -> Self {
        self.exceeds_limit_values = exceeds;
        self
    }
}

/// Non-fatal configuration problem noticed while producing a result.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")
)]
#[non_exhaustive]
pub enum ConfigurationWarning {
    /// `upper_high` is below `lower_low`.
    InvertedThresholds {
        /// Configured upper outer bound.
        upper_high: f64,
        /// Configured lower outer bound.
        lower_low: f64,
    },
}

impl fmt::Display for ConfigurationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationWarning::InvertedThresholds {
                upper_high,
                lower_low,
            } => write!(
                f,
                "inverted thresholds: upper high {upper_high} is below lower low {lower_low}"
            ),
        }
    }
}

/// Bounded, unit-normalized, downsampled output for one query.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Series {
    pub account_id: u32,
    pub device_id: u32,
    pub channel_id: u32,
    pub channel_name: String,
    /// Unit every `readingValue` is expressed in.
    pub unit_of_measure_id_used: UnitId,
    pub is_channel_limits_enabled: bool,
    /// Thresholds expressed in `unit_of_measure_id_used`.
    pub thresholds: Thresholds,
    pub readings: Vec<Reading>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Vec::is_empty")
    )]
    pub warnings: Vec<ConfigurationWarning>,
}

impl Series {
    /// Key of the channel this series was built from.
    #[must_use]
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.account_id, self.device_id, self.channel_id)
    }

    /// Number of points in the series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether the series has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// A channel together with its readings, as found in dashboard fixture documents.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelDocument {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub channel: Channel,
    #[cfg_attr(feature = "serde", serde(default))]
    pub readings: Vec<Reading>,
}
