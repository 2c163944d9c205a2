//! Unit of measure registry.
//!
//! Channels report their default unit as a numeric id (`unitOfMeasureIdDefault`) and
//! an optional user override as a display name (`unitOfMeasureUserDefined`). This module
//! maps both forms onto [`Unit`], and groups units into [`UnitCategory`] so that
//! converters can refuse cross-category requests.
//!
//! Id `0` is reserved for "unspecified": readings in an unspecified unit are treated as
//! already being in whatever unit the caller asks for.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Numeric unit of measure identifier as carried on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct UnitId(pub u16);

impl UnitId {
    /// The "unspecified" unit.
    pub const UNSPECIFIED: UnitId = UnitId(0);

    /// Whether this is the unspecified unit id.
    #[must_use]
    pub fn is_unspecified(self) -> bool {
        self.0 == 0
    }

    /// Resolve this id against the registry.
    pub fn unit(self) -> ParseResult<Unit> {
        Unit::from_id(self)
    }
}

impl From<u16> for UnitId {
    fn from(value: u16) -> Self {
        UnitId(value)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical quantity a unit measures. Conversions only exist inside one category.
///
/// The numeric ids match `unitOfMeasureCategoryId` in channel snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u16)]
pub enum UnitCategory {
    /// No category (unit id 0).
    Unspecified = 0,
    /// Pressure and water column.
    Pressure = 3,
    /// Temperature.
    Temperature = 7,
    /// Electrical conductivity of a solution.
    Conductivity = 19,
    /// Dissolved solids concentration.
    Concentration = 27,
    /// Electrical potential.
    Voltage = 30,
    /// Length or depth.
    Length = 31,
}

impl UnitCategory {
    /// Numeric category id.
    #[must_use]
    pub fn id(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitCategory::Unspecified => "unspecified",
            UnitCategory::Pressure => "pressure",
            UnitCategory::Temperature => "temperature",
            UnitCategory::Conductivity => "conductivity",
            UnitCategory::Concentration => "concentration",
            UnitCategory::Voltage => "voltage",
            UnitCategory::Length => "length",
        };
        f.write_str(name)
    }
}

/// A known unit of measure.
///
/// # Examples
///
/// ```
/// use fieldline_types::{Unit, UnitCategory, UnitId};
///
/// assert_eq!(Unit::from_id(UnitId(14)).unwrap(), Unit::Fahrenheit);
/// assert_eq!(Unit::from_name("in H2O").unwrap(), Unit::InchesOfWater);
/// assert_eq!(Unit::Fahrenheit.category(), UnitCategory::Temperature);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum Unit {
    /// Unit id 0.
    Unspecified,
    /// Pounds per square inch.
    Psi,
    /// Kilopascal.
    Kilopascal,
    /// Inches of water column.
    InchesOfWater,
    /// Millibar.
    Millibar,
    /// Centimeters of water column.
    CentimetersOfWater,
    /// Meters of water column.
    MetersOfWater,
    /// Degrees Celsius.
    Celsius,
    /// Degrees Fahrenheit.
    Fahrenheit,
    /// Kelvin.
    Kelvin,
    /// Microsiemens per centimeter.
    MicrosiemensPerCm,
    /// Millisiemens per centimeter.
    MillisiemensPerCm,
    /// Siemens per meter.
    SiemensPerMeter,
    /// Milligrams per liter.
    MilligramsPerLiter,
    /// Grams per liter.
    GramsPerLiter,
    /// Parts per million.
    PartsPerMillion,
    /// Volts.
    Volts,
    /// Millivolts.
    Millivolts,
    /// Meters.
    Meters,
    /// Feet.
    Feet,
}

impl Unit {
    /// Every registered unit, in id order.
    pub const ALL: [Unit; 20] = [
        Unit::Unspecified,
        Unit::Psi,
        Unit::Kilopascal,
        Unit::InchesOfWater,
        Unit::Millibar,
        Unit::CentimetersOfWater,
        Unit::MetersOfWater,
        Unit::Celsius,
        Unit::Fahrenheit,
        Unit::Kelvin,
        Unit::MicrosiemensPerCm,
        Unit::MillisiemensPerCm,
        Unit::SiemensPerMeter,
        Unit::MilligramsPerLiter,
        Unit::GramsPerLiter,
        Unit::PartsPerMillion,
        Unit::Volts,
        Unit::Millivolts,
        Unit::Meters,
        Unit::Feet,
    ];

    /// Wire id of this unit.
    #[must_use]
    pub fn id(self) -> UnitId {
        let raw = match self {
            Unit::Unspecified => 0,
            Unit::Psi => 1,
            Unit::Kilopascal => 2,
            Unit::InchesOfWater => 3,
            Unit::Millibar => 4,
            Unit::CentimetersOfWater => 5,
            Unit::MetersOfWater => 6,
            Unit::Celsius => 13,
            Unit::Fahrenheit => 14,
            Unit::Kelvin => 15,
            Unit::MicrosiemensPerCm => 23,
            Unit::MillisiemensPerCm => 24,
            Unit::SiemensPerMeter => 25,
            Unit::MilligramsPerLiter => 35,
            Unit::GramsPerLiter => 36,
            Unit::PartsPerMillion => 37,
            Unit::Volts => 40,
            Unit::Millivolts => 41,
            Unit::Meters => 50,
            Unit::Feet => 51,
        };
        UnitId(raw)
    }

    /// Category this unit belongs to.
    #[must_use]
    pub fn category(self) -> UnitCategory {
        match self {
            Unit::Unspecified => UnitCategory::Unspecified,
            Unit::Psi
            | Unit::Kilopascal
            | Unit::InchesOfWater
            | Unit::Millibar
            | Unit::CentimetersOfWater
            | Unit::MetersOfWater => UnitCategory::Pressure,
            Unit::Celsius | Unit::Fahrenheit | Unit::Kelvin => UnitCategory::Temperature,
            Unit::MicrosiemensPerCm | Unit::MillisiemensPerCm | Unit::SiemensPerMeter => {
                UnitCategory::Conductivity
            }
            Unit::MilligramsPerLiter | Unit::GramsPerLiter | Unit::PartsPerMillion => {
                UnitCategory::Concentration
            }
            Unit::Volts | Unit::Millivolts => UnitCategory::Voltage,
            Unit::Meters | Unit::Feet => UnitCategory::Length,
        }
    }

    /// Display name, as used in `unitOfMeasureNameDefault` / `unitOfMeasureUserDefined`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Unit::Unspecified => "",
            Unit::Psi => "psi",
            Unit::Kilopascal => "kPa",
            Unit::InchesOfWater => "in H2O",
            Unit::Millibar => "mbar",
            Unit::CentimetersOfWater => "cm H2O",
            Unit::MetersOfWater => "m H2O",
            Unit::Celsius => "degC",
            Unit::Fahrenheit => "degF",
            Unit::Kelvin => "K",
            Unit::MicrosiemensPerCm => "uS/cm",
            Unit::MillisiemensPerCm => "mS/cm",
            Unit::SiemensPerMeter => "S/m",
            Unit::MilligramsPerLiter => "mg/L",
            Unit::GramsPerLiter => "g/L",
            Unit::PartsPerMillion => "ppm",
            Unit::Volts => "Volts",
            Unit::Millivolts => "mV",
            Unit::Meters => "m",
            Unit::Feet => "ft",
        }
    }

    /// Look up a unit by wire id.
    pub fn from_id(id: UnitId) -> ParseResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|unit| unit.id() == id)
            .ok_or(ParseError::UnknownUnitId(id.0))
    }

    /// Look up a unit by display name (case-insensitive, surrounding whitespace ignored).
    ///
    /// A handful of spellings seen in device configuration are accepted as aliases.
    pub fn from_name(name: &str) -> ParseResult<Self> {
        let needle = name.trim();
        if needle.is_empty() {
            return Err(ParseError::UnknownUnit(name.to_string()));
        }

        if let Some(unit) = Self::ALL
            .iter()
            .copied()
            .filter(|unit| *unit != Unit::Unspecified)
            .find(|unit| unit.name().eq_ignore_ascii_case(needle))
        {
            return Ok(unit);
        }

        let alias = match needle.to_ascii_lowercase().as_str() {
            "°c" | "c" | "celsius" => Some(Unit::Celsius),
            "°f" | "f" | "fahrenheit" => Some(Unit::Fahrenheit),
            "inh2o" | "in h2o" | "in. h2o" => Some(Unit::InchesOfWater),
            "µs/cm" | "us/cm" => Some(Unit::MicrosiemensPerCm),
            "v" | "volt" => Some(Unit::Volts),
            _ => None,
        };
        alias.ok_or_else(|| ParseError::UnknownUnit(name.to_string()))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Unspecified => f.write_str("unspecified"),
            other => f.write_str(other.name()),
        }
    }
}
