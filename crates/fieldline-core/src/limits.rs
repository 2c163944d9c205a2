//! Limit evaluation.
//!
//! The single-bit exceedance flag is decided against the outer bounds only
//! (`upper_high`, `lower_low`). The inner bounds are used by [`classify`] for shading and
//! never influence the flag.
//!
//! # Example
//!
//! ```
//! use fieldline_core::limits::{evaluate, exceeds, LimitBand, classify};
//! use fieldline_types::ChannelLimits;
//!
//! let limits = ChannelLimits::outer(14.0, -100.0);
//! assert!(!exceeds(8.33, &limits));
//! assert!(exceeds(15.0, &limits));
//! assert_eq!(classify(15.0, &limits), LimitBand::UpperAlarm);
//!
//! // Disabled limits never flag, even with all-zero thresholds.
//! assert!(!evaluate(100.0, &ChannelLimits::disabled()).exceeds);
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use fieldline_types::{Channel, ChannelLimits, ConfigurationWarning, UnitId};

use crate::error::Result;
use crate::units::Conversion;

/// Band a value falls into relative to all four thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitBand {
    /// Limits are switched off for the channel.
    Disabled,
    /// Inside the inner bounds.
    Normal,
    /// Above `upper_low` but not above `upper_high`.
    UpperWarning,
    /// Above `upper_high`; the reading exceeds.
    UpperAlarm,
    /// Below `lower_high` but not below `lower_low`.
    LowerWarning,
    /// Below `lower_low`; the reading exceeds.
    LowerAlarm,
}

impl LimitBand {
    /// Get a human-readable description of the band.
    pub fn description(&self) -> &'static str {
        match self {
            LimitBand::Disabled => "Limits disabled",
            LimitBand::Normal => "Within limits",
            LimitBand::UpperWarning => "Approaching upper limit",
            LimitBand::UpperAlarm => "Above upper limit",
            LimitBand::LowerWarning => "Approaching lower limit",
            LimitBand::LowerAlarm => "Below lower limit",
        }
    }

    /// Whether this band sets the exceedance flag.
    #[must_use]
    pub fn is_alarm(&self) -> bool {
        matches!(self, LimitBand::UpperAlarm | LimitBand::LowerAlarm)
    }
}

/// Outcome of evaluating one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitEvaluation {
    /// Whether the value exceeds the outer bounds.
    pub exceeds: bool,
    /// Set when the thresholds are misconfigured; the flag is then best effort.
    pub warning: Option<ConfigurationWarning>,
}

/// Outer bounds in evaluation order, swapped when inverted.
fn outer_bounds(limits: &ChannelLimits) -> (f64, f64) {
    if limits.is_inverted() {
        (limits.lower_low, limits.upper_high)
    } else {
        (limits.upper_high, limits.lower_low)
    }
}

/// Report inverted thresholds, if the limits are enabled and inverted.
pub fn check_configuration(limits: &ChannelLimits) -> Option<ConfigurationWarning> {
    (limits.enabled && limits.is_inverted()).then_some(ConfigurationWarning::InvertedThresholds {
        upper_high: limits.upper_high,
        lower_low: limits.lower_low,
    })
}

/// Evaluate a value and report any configuration problem alongside the flag.
///
/// Inverted outer bounds are evaluated as if they had been entered the right way round.
pub fn evaluate(value: f64, limits: &ChannelLimits) -> LimitEvaluation {
    if !limits.enabled {
        return LimitEvaluation {
            exceeds: false,
            warning: None,
        };
    }
    let warning = check_configuration(limits);
    if let Some(w) = &warning {
        warn!("Evaluating against normalized bounds: {}", w);
    }
    LimitEvaluation {
        exceeds: exceeds(value, limits),
        warning,
    }
}

/// The exceedance flag alone. Never logs; suited to per-reading loops.
#[must_use]
pub fn exceeds(value: f64, limits: &ChannelLimits) -> bool {
    if !limits.enabled {
        return false;
    }
    let (high, low) = outer_bounds(limits);
    value > high || value < low
}

/// Classify a value into a shading band.
#[must_use]
pub fn classify(value: f64, limits: &ChannelLimits) -> LimitBand {
    if !limits.enabled {
        return LimitBand::Disabled;
    }
    let (high, low) = outer_bounds(limits);
    if value > high {
        LimitBand::UpperAlarm
    } else if value < low {
        LimitBand::LowerAlarm
    } else if value > limits.upper_low {
        LimitBand::UpperWarning
    } else if value < limits.lower_high {
        LimitBand::LowerWarning
    } else {
        LimitBand::Normal
    }
}

/// Whether the step from `previous` to `value` breaks the channel delta limit.
///
/// Advisory only; a delta of zero (or less) disables the check.
#[must_use]
pub fn exceeds_delta(previous: f64, value: f64, limits: &ChannelLimits) -> bool {
    limits.enabled && limits.delta > 0.0 && (value - previous).abs() > limits.delta
}

/// What a stored exceedance flag was computed under.
///
/// A stored flag is trusted only while the channel still has the same version tag and
/// the same flag-deciding limits. Limits can be edited without bumping the tag, so the
/// tag alone is not enough.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlagBasis {
    /// `sensorConfigVersionTag` of the channel.
    pub version: u32,
    /// See [`limits_fingerprint`].
    pub limits: u64,
}

impl FlagBasis {
    /// The basis a reading of `channel` would be flagged under right now.
    #[must_use]
    pub fn of(channel: &Channel) -> Self {
        Self {
            version: channel.sensor_config_version_tag,
            limits: limits_fingerprint(&channel.limits),
        }
    }
}

/// Fingerprint of the settings the exceedance flag depends on.
///
/// Disabled limits all map to zero. Otherwise the normalized outer bounds are hashed bit
/// for bit with FNV-1a, which is stable across processes and toolchains so it can be
/// persisted.
#[must_use]
pub fn limits_fingerprint(limits: &ChannelLimits) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    if !limits.enabled {
        return 0;
    }
    let (high, low) = outer_bounds(limits);
    high.to_bits()
        .to_le_bytes()
        .into_iter()
        .chain(low.to_bits().to_le_bytes())
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

/// Express limits in another unit.
///
/// Thresholds are only converted when limits are enabled; disabled limits are returned
/// untouched so an all-zero configuration stays all-zero.
pub fn convert_limits(limits: &ChannelLimits, from: UnitId, to: UnitId) -> Result<ChannelLimits> {
    let conversion = Conversion::new(from, to)?;
    if !limits.enabled || conversion.is_identity() {
        return Ok(*limits);
    }
    Ok(ChannelLimits {
        enabled: true,
        delta: conversion.apply_delta(limits.delta),
        upper_high: conversion.apply(limits.upper_high),
        upper_low: conversion.apply(limits.upper_low),
        lower_high: conversion.apply(limits.lower_high),
        lower_low: conversion.apply(limits.lower_low),
    })
}
