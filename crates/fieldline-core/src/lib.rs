//! Downsampling and limit-evaluation engine for sensor telemetry.
//!
//! This crate turns raw, append-only channel readings into bounded, unit-normalized
//! series suitable for charting.
//!
//! # Features
//!
//! - **Unit conversion**: affine conversion within a unit category ([`units`])
//! - **Limit evaluation**: single-bit exceedance plus shading bands ([`limits`])
//! - **Downsampling**: streaming bucket reducer that never drops exceedances ([`downsample`])
//! - **Series building**: paged store reads with bounded retry ([`SeriesBuilder`])
//! - **Query cache**: LRU with coalesced builds and eager invalidation ([`QueryCache`])
//! - **Ingest**: per-channel serialized appends ([`Engine`])
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use fieldline_core::{Engine, EngineConfig, MemoryStore, SeriesRequest};
//! use fieldline_types::{Channel, ChannelKey, Reading, Unit};
//! use time::macros::datetime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fieldline_core::Error> {
//!     let engine = Engine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
//!     let key = ChannelKey::new(11, 470, 27504);
//!     engine
//!         .reconfigure(Channel::new(key, "Temperature", Unit::Fahrenheit.id()))
//!         .await?;
//!     engine
//!         .append(key, Reading::new(datetime!(2020-04-24 14:02:07 UTC), 50.17122))
//!         .await?;
//!
//!     let request = SeriesRequest::new(
//!         key,
//!         datetime!(2020-04-24 00:00 UTC),
//!         datetime!(2020-04-25 00:00 UTC),
//!         500,
//!     )
//!     .with_display_unit(Unit::Celsius.id());
//!     let series = engine.series(&request).await?;
//!     assert_eq!(series.unit_of_measure_id_used, Unit::Celsius.id());
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod downsample;
pub mod engine;
pub mod error;
pub mod limits;
pub mod memory;
pub mod retry;
pub mod traits;
pub mod units;

pub use builder::{
    BuilderConfig, DEFAULT_MAX_CHART_ITEMS, DEFAULT_PAGE_SIZE, SeriesBuilder, SeriesRequest,
    resolve_display_unit,
};
pub use cache::{CacheStats, QueryCache, SeriesKey};
pub use downsample::{Downsampler, downsample};
pub use engine::{BatchReceipt, DEFAULT_CACHE_CAPACITY, Engine, EngineConfig, IngestReceipt};
pub use error::{Error, Result};
pub use limits::{FlagBasis, LimitBand, LimitEvaluation, classify, evaluate};
pub use memory::MemoryStore;
pub use retry::{RetryConfig, with_retry};
pub use traits::{Cursor, ReadingPage, ReadingStore, StoredReading};
pub use units::{Conversion, convert};

// Re-export types crate for convenience
pub use fieldline_types;
