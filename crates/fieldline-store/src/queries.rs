//! Query builder for channel reading ranges.
//!
//! [`RangeQuery`] selects readings of one channel inside a half-open time window,
//! ordered by `(reading_date, seq)`, and supports cursor paging.
//!
//! # Example
//!
//! ```
//! use fieldline_store::{RangeQuery, Store};
//! use fieldline_types::ChannelKey;
//! use time::macros::datetime;
//!
//! let store = Store::open_in_memory()?;
//! let query = RangeQuery::new(ChannelKey::new(11, 470, 27507))
//!     .since(datetime!(2020-04-24 00:00 UTC))
//!     .until(datetime!(2020-04-25 00:00 UTC))
//!     .limit(500);
//!
//! let page = store.query_range(&query)?;
//! assert!(page.readings.is_empty());
//! # Ok::<(), fieldline_store::Error>(())
//! ```

use rusqlite::ToSql;
use time::OffsetDateTime;

use fieldline_core::Cursor;
use fieldline_types::ChannelKey;

use crate::error::{Error, Result};

/// Columns selected by every reading query, in row-mapping order.
pub(crate) const READING_COLUMNS: &str = "seq, reading_date, reading_value, exceeds_limit_values, \
     sensor_latitude, sensor_longitude, config_version, limits_fingerprint";

/// Convert a timestamp to the stored unix-nanosecond form.
pub(crate) fn to_nanos(timestamp: OffsetDateTime) -> Result<i64> {
    i64::try_from(timestamp.unix_timestamp_nanos())
        .map_err(|_| Error::InvalidTimestamp(format!("{timestamp} is outside the storable range")))
}

/// Fluent query builder for [`Store::query_range`](crate::Store::query_range).
///
/// `since` is inclusive and `until` exclusive; both default to unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeQuery {
    pub channel: ChannelKey,
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
    /// Resume strictly after this position.
    pub after: Option<Cursor>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    pub fn new(channel: ChannelKey) -> Self {
        Self {
            channel,
            since: None,
            until: None,
            after: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn since(mut self, start: OffsetDateTime) -> Self {
        self.since = Some(start);
        self
    }

    #[must_use]
    pub fn until(mut self, end: OffsetDateTime) -> Self {
        self.until = Some(end);
        self
    }

    #[must_use]
    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.after = cursor;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build the WHERE clause and its parameters.
    pub(crate) fn build_where(&self) -> Result<(String, Vec<Box<dyn ToSql>>)> {
        let mut conditions = vec![
            "account_id = ?".to_string(),
            "device_id = ?".to_string(),
            "channel_id = ?".to_string(),
        ];
        let mut params: Vec<Box<dyn ToSql>> = vec![
            Box::new(self.channel.account_id),
            Box::new(self.channel.device_id),
            Box::new(self.channel.channel_id),
        ];

        if let Some(since) = self.since {
            conditions.push("reading_date >= ?".to_string());
            params.push(Box::new(to_nanos(since)?));
        }
        if let Some(until) = self.until {
            conditions.push("reading_date < ?".to_string());
            params.push(Box::new(to_nanos(until)?));
        }
        if let Some(cursor) = self.after {
            let ts = to_nanos(cursor.timestamp)?;
            let seq = i64::try_from(cursor.sequence)
                .map_err(|_| Error::InvalidTimestamp(format!("cursor sequence {}", cursor.sequence)))?;
            conditions.push("(reading_date > ? OR (reading_date = ? AND seq > ?))".to_string());
            params.push(Box::new(ts));
            params.push(Box::new(ts));
            params.push(Box::new(seq));
        }

        Ok((format!("WHERE {}", conditions.join(" AND ")), params))
    }

    /// Build the full SELECT statement. The limit is inlined.
    pub(crate) fn build_sql(&self, where_clause: &str) -> String {
        let mut sql = format!(
            "SELECT {READING_COLUMNS} FROM readings {where_clause} ORDER BY reading_date ASC, seq ASC"
        );
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}
