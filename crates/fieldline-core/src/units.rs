//! Unit conversion.
//!
//! Every registered unit is described by an affine map onto its category's base unit
//! (kPa, °C, µS/cm, mg/L, V, m). A [`Conversion`] composes two of those maps once so
//! that converting a whole series is a multiply and an add per reading.
//!
//! # Example
//!
//! ```
//! use fieldline_core::units::{convert, Conversion};
//! use fieldline_types::Unit;
//!
//! let celsius = convert(212.0, Unit::Fahrenheit.id(), Unit::Celsius.id()).unwrap();
//! assert!((celsius - 100.0).abs() < 1e-9);
//!
//! let to_kpa = Conversion::new(Unit::Psi.id(), Unit::Kilopascal.id()).unwrap();
//! assert!((to_kpa.apply(1.0) - 6.894757).abs() < 1e-6);
//! ```

use fieldline_types::{Unit, UnitId};

use crate::error::{Error, Result};

/// `base = value * scale + offset`.
#[derive(Debug, Clone, Copy)]
struct Affine {
    scale: f64,
    offset: f64,
}

impl Affine {
    const IDENTITY: Affine = Affine {
        scale: 1.0,
        offset: 0.0,
    };

    const fn linear(scale: f64) -> Self {
        Affine { scale, offset: 0.0 }
    }
}

fn to_base(unit: Unit) -> Affine {
    match unit {
        Unit::Kilopascal | Unit::Celsius | Unit::MicrosiemensPerCm => Affine::IDENTITY,
        Unit::MilligramsPerLiter | Unit::Volts | Unit::Meters => Affine::IDENTITY,
        Unit::Psi => Affine::linear(6.894_757_293_168),
        Unit::InchesOfWater => Affine::linear(0.249_088_908_333),
        Unit::Millibar => Affine::linear(0.1),
        Unit::CentimetersOfWater => Affine::linear(0.098_066_5),
        Unit::MetersOfWater => Affine::linear(9.806_65),
        Unit::Fahrenheit => Affine {
            scale: 5.0 / 9.0,
            offset: -32.0 * 5.0 / 9.0,
        },
        Unit::Kelvin => Affine {
            scale: 1.0,
            offset: -273.15,
        },
        Unit::MillisiemensPerCm => Affine::linear(1_000.0),
        Unit::SiemensPerMeter => Affine::linear(10_000.0),
        Unit::GramsPerLiter => Affine::linear(1_000.0),
        // Dilute aqueous solutions: 1 ppm ≈ 1 mg/L.
        Unit::PartsPerMillion => Affine::IDENTITY,
        Unit::Millivolts => Affine::linear(0.001),
        Unit::Feet => Affine::linear(0.3048),
        _ => Affine::IDENTITY,
    }
}

/// A resolved conversion between two units of the same category.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    from: UnitId,
    to: UnitId,
    scale: f64,
    offset: f64,
}

impl Conversion {
    /// Resolve a conversion from `from` to `to`.
    ///
    /// Identity requests always succeed, as does any request involving the unspecified
    /// unit (id 0), which is taken to already be in the other unit. Unknown ids and
    /// cross-category pairs fail with [`Error::UnsupportedConversion`].
    pub fn new(from: UnitId, to: UnitId) -> Result<Self> {
        if from == to || from.is_unspecified() || to.is_unspecified() {
            return Ok(Self::identity(from, to));
        }

        let unsupported = || Error::UnsupportedConversion { from, to };
        let source = Unit::from_id(from).map_err(|_| unsupported())?;
        let target = Unit::from_id(to).map_err(|_| unsupported())?;
        if source.category() != target.category() {
            return Err(unsupported());
        }

        let a = to_base(source);
        let b = to_base(target);
        Ok(Self {
            from,
            to,
            scale: a.scale / b.scale,
            offset: (a.offset - b.offset) / b.scale,
        })
    }

    fn identity(from: UnitId, to: UnitId) -> Self {
        Self {
            from,
            to,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Source unit id.
    #[must_use]
    pub fn from(&self) -> UnitId {
        self.from
    }

    /// Target unit id.
    #[must_use]
    pub fn to(&self) -> UnitId {
        self.to
    }

    /// Whether applying this conversion leaves values untouched.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    /// Convert an absolute value.
    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        if self.is_identity() {
            value
        } else {
            value * self.scale + self.offset
        }
    }

    /// Convert a difference between two values (offsets cancel out).
    #[must_use]
    pub fn apply_delta(&self, delta: f64) -> f64 {
        delta * self.scale.abs()
    }
}

/// Convert one value between units.
pub fn convert(value: f64, from: UnitId, to: UnitId) -> Result<f64> {
    Conversion::new(from, to).map(|c| c.apply(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_identity_returns_input_unchanged() {
        let value = 50.1203537;
        assert_eq!(convert(value, UnitId(14), UnitId(14)).unwrap(), value);
        assert_eq!(convert(value, UnitId(0), UnitId(0)).unwrap(), value);
    }

    #[test]
    fn test_unspecified_is_treated_as_target() {
        assert_eq!(convert(12.5, UnitId(0), UnitId(14)).unwrap(), 12.5);
        assert_eq!(convert(12.5, UnitId(3), UnitId(0)).unwrap(), 12.5);
    }

    #[test]
    fn test_temperature() {
        assert!(close(convert(32.0, Unit::Fahrenheit.id(), Unit::Celsius.id()).unwrap(), 0.0));
        assert!(close(convert(100.0, Unit::Celsius.id(), Unit::Fahrenheit.id()).unwrap(), 212.0));
        assert!(close(convert(0.0, Unit::Celsius.id(), Unit::Kelvin.id()).unwrap(), 273.15));
        assert!(close(
            convert(50.17122, Unit::Fahrenheit.id(), Unit::Celsius.id()).unwrap(),
            10.0951222
        ));
    }

    #[test]
    fn test_pressure() {
        let psi = convert(27.68, Unit::InchesOfWater.id(), Unit::Psi.id()).unwrap();
        assert!((psi - 1.0).abs() < 1e-3);
        assert!(close(convert(1.0, Unit::MetersOfWater.id(), Unit::CentimetersOfWater.id()).unwrap(), 100.0));
        assert!(close(convert(10.0, Unit::Millibar.id(), Unit::Kilopascal.id()).unwrap(), 1.0));
    }

    #[test]
    fn test_conductivity_and_concentration() {
        assert!(close(convert(1.0, Unit::SiemensPerMeter.id(), Unit::MicrosiemensPerCm.id()).unwrap(), 10_000.0));
        assert!(close(convert(1413.0, Unit::MicrosiemensPerCm.id(), Unit::MillisiemensPerCm.id()).unwrap(), 1.413));
        assert!(close(convert(2.5, Unit::GramsPerLiter.id(), Unit::MilligramsPerLiter.id()).unwrap(), 2500.0));
    }

    #[test]
    fn test_cross_category_fails() {
        let err = convert(1.0, Unit::Fahrenheit.id(), Unit::InchesOfWater.id()).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedConversion {
                from: UnitId(14),
                to: UnitId(3)
            }
        );
    }

    #[test]
    fn test_unknown_unit_fails() {
        let err = Conversion::new(UnitId(999), UnitId(14)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConversion { from, .. } if from == UnitId(999)));
    }

    #[test]
    fn test_delta_ignores_offset() {
        let c = Conversion::new(Unit::Celsius.id(), Unit::Fahrenheit.id()).unwrap();
        assert!(close(c.apply_delta(10.0), 18.0));
        assert!(!c.is_identity());
        assert_eq!(c.from(), Unit::Celsius.id());
        assert_eq!(c.to(), Unit::Fahrenheit.id());
    }

    fn same_category_pair() -> impl Strategy<Value = (Unit, Unit)> {
        let units: Vec<Unit> = Unit::ALL
            .iter()
            .copied()
            .filter(|u| *u != Unit::Unspecified)
            .collect();
        let a = proptest::sample::select(units.clone());
        let b = proptest::sample::select(units);
        (a, b).prop_filter("same category", |(a, b)| a.category() == b.category())
    }

    proptest! {
        #[test]
        fn test_roundtrip_recovers_value((a, b) in same_category_pair(), value in -1.0e6f64..1.0e6) {
            let there = convert(value, a.id(), b.id()).unwrap();
            let back = convert(there, b.id(), a.id()).unwrap();
            prop_assert!(close(back, value), "{value} -> {there} -> {back}");
        }
    }
}
