//! Fixture import and raw CSV export.
//!
//! Both work against any [`ReadingStore`]: import goes through the [`Engine`] so flags are
//! computed at ingest and the cache stays coherent, and export pages through the store
//! without building a series.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use fieldline_core::{Engine, ReadingStore};
use fieldline_types::formats::format_iso;
use fieldline_types::{Channel, ChannelDocument};

use crate::error::{Error, Result};

/// Summary of a fixture import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Channel snapshots that were new or changed.
    pub channels: usize,
    /// Channel snapshots identical to what was already stored.
    pub unchanged_channels: usize,
    pub readings: usize,
    /// Imported readings that exceed their channel limits.
    pub exceeding: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FixtureDocument {
    Many(Vec<ChannelDocument>),
    One(Box<ChannelDocument>),
}

/// Parse a dashboard fixture: an array of channels with embedded readings, or a single
/// channel object.
pub fn parse_documents(json: &str) -> Result<Vec<ChannelDocument>> {
    let documents = match serde_json::from_str(json)? {
        FixtureDocument::Many(docs) => docs,
        FixtureDocument::One(doc) => vec![*doc],
    };
    Ok(documents)
}

/// Register every channel of the documents and append their readings.
///
/// Stored exceedance flags are recomputed from each channel's limits; flags present in
/// the document are ignored.
pub async fn import_documents(
    engine: &Engine,
    documents: Vec<ChannelDocument>,
) -> Result<ImportResult> {
    let mut result = ImportResult::default();

    for ChannelDocument { channel, readings } in documents {
        let key = channel.key();
        if engine.reconfigure(channel).await? {
            result.channels += 1;
        } else {
            result.unchanged_channels += 1;
        }

        let flagged_in_source = readings.iter().filter(|r| r.exceeds_limit_values).count();
        let receipt = engine.append_batch(key, readings).await?;
        if receipt.exceeding != flagged_in_source {
            warn!(
                "Channel {}: document flagged {} readings, limits flag {}",
                key, flagged_in_source, receipt.exceeding
            );
        }
        result.readings += receipt.appended;
        result.exceeding += receipt.exceeding;
    }

    info!(
        "Imported {} channels ({} unchanged), {} readings ({} exceeding)",
        result.channels, result.unchanged_channels, result.readings, result.exceeding
    );
    Ok(result)
}

/// Read a fixture file and import it.
pub async fn import_file<P: AsRef<Path>>(engine: &Engine, path: P) -> Result<ImportResult> {
    let path = path.as_ref();
    info!("Importing fixture {}", path.display());
    let json = tokio::fs::read_to_string(path).await?;
    import_documents(engine, parse_documents(&json)?).await
}

#[derive(Serialize)]
struct ExportRow<'a> {
    account_id: u32,
    device_id: u32,
    channel_id: u32,
    channel_name: &'a str,
    unit_of_measure_id: u16,
    reading_date: String,
    reading_value: f64,
    exceeds_limit_values: bool,
    sensor_latitude: f64,
    sensor_longitude: f64,
}

/// Write the raw readings of `channel` in `[start, end)` as CSV, in the channel's
/// default unit. Returns the number of rows written.
pub async fn export_csv<W: Write>(
    store: &dyn ReadingStore,
    channel: &Channel,
    start: OffsetDateTime,
    end: OffsetDateTime,
    page_size: usize,
    writer: W,
) -> Result<usize> {
    if start >= end {
        return Err(fieldline_core::Error::InvalidRange(format!(
            "start {start} is not before end {end}"
        ))
        .into());
    }

    let key = channel.key();
    let mut csv = csv::Writer::from_writer(writer);
    let mut rows = 0;
    let mut after = None;

    loop {
        let page = store
            .query_range(key, start, end, after, page_size.max(1))
            .await?;
        for stored in &page.readings {
            let reading = &stored.reading;
            let reading_date = format_iso(reading.reading_date)
                .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;
            csv.serialize(ExportRow {
                account_id: key.account_id,
                device_id: key.device_id,
                channel_id: key.channel_id,
                channel_name: &channel.channel_name,
                unit_of_measure_id: channel.unit_of_measure_id_default.0,
                reading_date,
                reading_value: reading.reading_value,
                exceeds_limit_values: reading.exceeds_limit_values,
                sensor_latitude: reading.sensor_latitude,
                sensor_longitude: reading.sensor_longitude,
            })?;
            rows += 1;
        }
        match page.next {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }

    csv.flush()?;
    Ok(rows)
}
