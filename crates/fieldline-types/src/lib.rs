//! Platform-agnostic types for Fieldline sensor telemetry.
//!
//! This crate provides the data model shared by the engine (`fieldline-core`), the
//! durable store (`fieldline-store`) and the HTTP service (`fieldline-service`).
//!
//! # Features
//!
//! - Channel snapshots with limit configuration and unit metadata
//! - Readings and the chart-ready [`Series`] output shape
//! - Unit of measure registry ([`Unit`], [`UnitCategory`])
//! - ISO-8601 wire timestamps and named presentation templates
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use fieldline_types::{Reading, Unit};
//!
//! let json = r#"{
//!     "readingDate": "2020-04-24T14:02:07+00:00",
//!     "readingValue": 50.17122,
//!     "exceedsLimitValues": false,
//!     "sensorLatitude": 0,
//!     "sensorLongitude": 0
//! }"#;
//! let reading: Reading = serde_json::from_str(json).unwrap();
//! assert_eq!(reading.reading_value, 50.17122);
//! assert_eq!(Unit::from_name("degF").unwrap(), Unit::Fahrenheit);
//! ```

pub mod error;
pub mod formats;
pub mod types;
pub mod units;

pub use error::{ParseError, ParseResult};
pub use formats::DateFormats;
pub use types::{
    Channel, ChannelDocument, ChannelKey, ChannelLimits, ConfigurationWarning, Reading, Series,
    Thresholds,
};
pub use units::{Unit, UnitCategory, UnitId};
