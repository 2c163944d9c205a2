//! Wire timestamps and named presentation templates.
//!
//! Readings travel as ISO-8601 timestamps with an explicit offset
//! (`2020-04-24T14:02:07+00:00`). The engine only ever produces and consumes that form;
//! the named templates in [`DateFormats`] are handed to whatever renders tables and chart
//! axes, and are never interpreted here.

use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

const ISO_OFFSET: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
);

const ISO_OFFSET_SUBSECOND: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
);

/// Format a timestamp in the wire form, normalized to UTC (`+00:00`).
///
/// Sub-second precision is written only when present.
///
/// ```
/// use fieldline_types::formats::format_iso;
/// use time::macros::datetime;
///
/// let ts = datetime!(2020-04-24 16:02:07 +02:00);
/// assert_eq!(format_iso(ts).unwrap(), "2020-04-24T14:02:07+00:00");
/// ```
pub fn format_iso(timestamp: OffsetDateTime) -> ParseResult<String> {
    let utc = timestamp.to_offset(UtcOffset::UTC);
    let description = if utc.nanosecond() == 0 {
        ISO_OFFSET
    } else {
        ISO_OFFSET_SUBSECOND
    };
    utc.format(description)
        .map_err(|e| ParseError::InvalidData(format!("cannot format timestamp: {e}")))
}

/// Parse a wire timestamp. Accepts the offset form and general RFC 3339 (`Z` suffix).
pub fn parse_iso(input: &str) -> ParseResult<OffsetDateTime> {
    let trimmed = input.trim();
    OffsetDateTime::parse(trimmed, ISO_OFFSET)
        .or_else(|_| OffsetDateTime::parse(trimmed, ISO_OFFSET_SUBSECOND))
        .or_else(|_| OffsetDateTime::parse(trimmed, &Rfc3339))
        .map_err(|e| ParseError::InvalidDate {
            input: input.to_string(),
            reason: e.to_string(),
        })
}

/// Serde adapter for wire timestamps, for use with `#[serde(with = "...")]`.
#[cfg(feature = "serde")]
pub mod iso {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    /// Serialize as `2020-04-24T14:02:07+00:00`.
    pub fn serialize<S: Serializer>(
        timestamp: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let text = super::format_iso(*timestamp).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    /// Deserialize from any form accepted by [`super::parse_iso`].
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_iso(&text).map_err(serde::de::Error::custom)
    }
}

/// Named date presentation templates.
///
/// These are passed explicitly to the formatting collaborator instead of living in
/// process-wide constants, so deployments and tests can vary them independently.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DateFormats {
    /// General purpose timestamp with zone.
    pub default: String,
    /// Chart axis labels (12-hour).
    pub chart: String,
    /// Table cells.
    pub table: String,
    /// Alternate month-first table layout.
    pub table_alt: String,
    /// System log timestamps.
    pub syslogs: String,
    /// Event list timestamps.
    pub event: String,
    /// Raw export, full ISO with offset.
    pub raw: String,
    /// Default dashboard time span (`d.hh:mm:ss`).
    pub timespan_24_hours: String,
}

impl Default for DateFormats {
    fn default() -> Self {
        Self {
            default: "yyyy-MM-dd HH:mm Z".to_string(),
            chart: "yy-MM-dd HH:mm A".to_string(),
            table: "yy-MM-dd HH:mm".to_string(),
            table_alt: "MM-dd-yy HH:mm".to_string(),
            syslogs: "yyyy-MM-dd HH:mm:ss Z".to_string(),
            event: "MM-dd-yy HH:mm".to_string(),
            raw: "yyyy-MM-ddTHH:mm:ss+00:00".to_string(),
            timespan_24_hours: "1.00:00:00".to_string(),
        }
    }
}
