//! REST API endpoints for the fieldline-service.
//!
//! Every handler goes through the shared [`Engine`](fieldline_core::Engine): series reads
//! hit the query cache, and ingest or reconfiguration invalidates it before responding.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]:
//!
//! | Engine error | Status |
//! |--------------|--------|
//! | `InvalidRange`, `InvalidData`, malformed timestamps | 400 |
//! | `ChannelNotFound` | 404 |
//! | `UnsupportedConversion`, `InvalidConfig` | 422 |
//! | `StoreUnavailable` (after retries) | 503 |
//! | anything else | 500 |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, warn};

use fieldline_core::{CacheStats, SeriesRequest};
use fieldline_types::formats::parse_iso;
use fieldline_types::{Channel, ChannelKey, DateFormats, ParseError, Reading, Unit, UnitId};

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/formats", get(get_formats))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/import", post(import))
        .route("/api/channels", get(list_channels).put(put_channel))
        .route("/api/channels/{account}/{device}/{channel}", get(get_channel))
        .route(
            "/api/channels/{account}/{device}/{channel}/series",
            get(get_series),
        )
        .route(
            "/api/channels/{account}/{device}/{channel}/readings",
            post(post_readings),
        )
        .route(
            "/api/channels/{account}/{device}/{channel}/export.csv",
            get(export_csv),
        )
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        started_at: state.started_at,
    })
}

/// Named date templates for dashboards.
async fn get_formats(State(state): State<Arc<AppState>>) -> Json<DateFormats> {
    Json(state.config.formats.clone())
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.engine.cache_stats())
}

async fn list_channels(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Channel>>, AppError> {
    Ok(Json(state.engine.channels().await?))
}

async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(u32, u32, u32)>,
) -> Result<Json<Channel>, AppError> {
    let key = channel_key(path);
    let channel = state
        .engine
        .store()
        .channel(key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Channel not found: {key}")))?;
    Ok(Json(channel))
}

/// Result of a channel upsert.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdateResponse {
    pub account_id: u32,
    pub device_id: u32,
    pub channel_id: u32,
    pub sensor_config_version_tag: u32,
    /// False when the stored snapshot was already identical.
    pub changed: bool,
}

/// Insert or replace a channel snapshot.
async fn put_channel(
    State(state): State<Arc<AppState>>,
    Json(channel): Json<Channel>,
) -> Result<Json<ChannelUpdateResponse>, AppError> {
    let key = channel.key();
    let version = channel.sensor_config_version_tag;
    let changed = state.engine.reconfigure(channel).await?;
    Ok(Json(ChannelUpdateResponse {
        account_id: key.account_id,
        device_id: key.device_id,
        channel_id: key.channel_id,
        sensor_config_version_tag: version,
        changed,
    }))
}

/// Query parameters for the series endpoint.
#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    /// Inclusive window start, ISO-8601 with offset.
    pub start: String,
    /// Exclusive window end.
    pub end: String,
    /// Point budget; defaults to the configured chart cap.
    pub max_points: Option<i64>,
    /// Display unit, as a numeric id or a unit name such as `degC`.
    pub unit: Option<String>,
}

/// Build a chart-ready series.
async fn get_series(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(u32, u32, u32)>,
    Query(params): Query<SeriesQuery>,
) -> Result<Response, AppError> {
    let key = channel_key(path);
    let start = parse_iso(&params.start)?;
    let end = parse_iso(&params.end)?;
    let max_points = match params.max_points {
        None => state.config.engine.max_chart_items,
        Some(n) => usize::try_from(n).map_err(|_| {
            AppError::from(fieldline_core::Error::InvalidRange(format!(
                "max_points must not be negative, got {n}"
            )))
        })?,
    };
    let display_unit = match params.unit.as_deref() {
        None => UnitId::UNSPECIFIED,
        Some(unit) => parse_unit(unit)?,
    };

    let request =
        SeriesRequest::new(key, start, end, max_points).with_display_unit(display_unit);
    let series = state.engine.series(&request).await?;
    Ok(Json(series.as_ref()).into_response())
}

fn parse_unit(unit: &str) -> Result<UnitId, AppError> {
    if let Ok(id) = unit.parse::<u16>() {
        return Ok(UnitId(id));
    }
    Ok(Unit::from_name(unit)?.id())
}

/// One reading or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReadingsBody {
    Many(Vec<Reading>),
    One(Reading),
}

/// Append readings to a channel. Exceedance flags in the body are ignored.
async fn post_readings(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(u32, u32, u32)>,
    Json(body): Json<ReadingsBody>,
) -> Result<Response, AppError> {
    let key = channel_key(path);
    let response = match body {
        ReadingsBody::One(reading) => {
            let receipt = state.engine.append(key, reading).await?;
            (StatusCode::CREATED, Json(receipt)).into_response()
        }
        ReadingsBody::Many(readings) => {
            let receipt = state.engine.append_batch(key, readings).await?;
            (StatusCode::CREATED, Json(receipt)).into_response()
        }
    };
    Ok(response)
}

/// Import a dashboard fixture document.
async fn import(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<fieldline_store::ImportResult>, AppError> {
    let documents = fieldline_store::parse_documents(&body)?;
    let result = fieldline_store::import_documents(&state.engine, documents).await?;
    Ok(Json(result))
}

/// Query parameters for the CSV export.
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub start: String,
    pub end: String,
}

/// Raw readings of a channel range as CSV.
async fn export_csv(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(u32, u32, u32)>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let key = channel_key(path);
    let start = parse_iso(&params.start)?;
    let end = parse_iso(&params.end)?;

    let store = state.engine.store();
    let channel = store
        .channel(key)
        .await?
        .ok_or(fieldline_core::Error::ChannelNotFound(key))?;

    let mut body = Vec::new();
    fieldline_store::export_csv(
        store.as_ref(),
        &channel,
        start,
        end,
        state.config.engine.page_size,
        &mut body,
    )
    .await?;

    let disposition = format!(
        "attachment; filename=\"{}-{}-{}.csv\"",
        key.account_id, key.device_id, key.channel_id
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

fn channel_key((account, device, channel): (u32, u32, u32)) -> ChannelKey {
    ChannelKey::new(account, device, channel)
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unprocessable(String),
    Unavailable(String),
    Internal(String),
}

impl From<fieldline_core::Error> for AppError {
    fn from(e: fieldline_core::Error) -> Self {
        use fieldline_core::Error;

        let message = e.to_string();
        match e {
            Error::InvalidRange(_) | Error::InvalidData(_) => AppError::BadRequest(message),
            Error::ChannelNotFound(_) => AppError::NotFound(message),
            Error::UnsupportedConversion { .. } | Error::InvalidConfig(_) => {
                AppError::Unprocessable(message)
            }
            Error::StoreUnavailable { .. } => AppError::Unavailable(message),
            _ => AppError::Internal(message),
        }
    }
}

impl From<fieldline_store::Error> for AppError {
    fn from(e: fieldline_store::Error) -> Self {
        match e {
            fieldline_store::Error::Engine(e) => e.into(),
            fieldline_store::Error::Serialization(e) => {
                AppError::BadRequest(format!("Invalid document: {e}"))
            }
            other => other.into_core("request").into(),
        }
    }
}

impl From<ParseError> for AppError {
    fn from(e: ParseError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Unavailable(msg) => {
                warn!("Store unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::Internal(msg) => {
                error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
