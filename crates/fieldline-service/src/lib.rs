//! HTTP API for Fieldline chart series, ingest and export.
//!
//! This crate wraps the downsampling [`Engine`](fieldline_core::Engine) in an axum
//! router. Dashboards ask it for bounded, unit-normalized series; collectors post
//! readings to it.
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/formats` - Named date templates
//! - `GET /api/cache/stats` - Query cache counters
//! - `GET /api/channels` - All channel snapshots
//! - `PUT /api/channels` - Insert or reconfigure a channel
//! - `GET /api/channels/{account}/{device}/{channel}` - One channel snapshot
//! - `GET /api/channels/{account}/{device}/{channel}/series?start&end&max_points&unit` -
//!   Chart-ready series
//! - `POST /api/channels/{account}/{device}/{channel}/readings` - Append one reading or
//!   an array of readings
//! - `GET /api/channels/{account}/{device}/{channel}/export.csv?start&end` - Raw CSV
//! - `POST /api/import` - Import a dashboard fixture document
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/fieldline/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! backend = "sqlite"
//! path = "~/.local/share/fieldline/data.db"
//! read_connections = 4
//!
//! [engine]
//! max_chart_items = 10000
//! cache_capacity = 256
//! page_size = 5000
//!
//! [engine.retry]
//! max_retries = 3
//! initial_delay_ms = 50
//! max_delay_ms = 2000
//!
//! [formats]
//! table = "yy-MM-dd HH:mm"
//! ```

pub mod api;
pub mod config;
pub mod state;

pub use config::{
    Config, ConfigError, EngineSettings, RetrySettings, ServerConfig, StorageBackend,
    StorageConfig, ValidationError,
};
pub use state::AppState;
