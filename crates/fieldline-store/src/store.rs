//! Main store implementation.

use std::path::Path;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use fieldline_core::{FlagBasis, ReadingPage, StoredReading};
use fieldline_types::{Channel, ChannelKey, Reading};

use crate::error::{Error, Result};
use crate::queries::{RangeQuery, to_nanos};
use crate::schema;

/// How long a connection waits on a locked database before reporting it busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store for channel snapshots and readings.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open a read-only connection to a database another connection has initialized.
    ///
    /// Any number of these can read alongside the writing connection once it has
    /// switched the database to WAL.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening read-only connection to {}", path.display());
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Channel operations
impl Store {
    /// Insert or replace a channel snapshot, returning the previous one.
    pub fn put_channel(&self, channel: &Channel) -> Result<Option<Channel>> {
        let key = channel.key();
        let snapshot = serde_json::to_string(channel)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let tx = self.conn.unchecked_transaction()?;
        let previous = get_channel(&tx, key)?;
        tx.execute(
            "INSERT INTO channels (account_id, device_id, channel_id, config_version, snapshot, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(account_id, device_id, channel_id) DO UPDATE SET
                config_version = excluded.config_version,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at",
            rusqlite::params![
                key.account_id,
                key.device_id,
                key.channel_id,
                channel.sensor_config_version_tag,
                snapshot,
                now,
            ],
        )?;
        tx.commit()?;

        debug!(
            "Stored channel {} at version {}",
            key, channel.sensor_config_version_tag
        );
        Ok(previous)
    }

    /// Get a channel snapshot.
    pub fn get_channel(&self, key: ChannelKey) -> Result<Option<Channel>> {
        get_channel(&self.conn, key)
    }

    /// List all channel snapshots, ordered by key.
    pub fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot FROM channels ORDER BY account_id, device_id, channel_id",
        )?;
        let snapshots = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        snapshots
            .iter()
            .map(|s| serde_json::from_str(s).map_err(Error::from))
            .collect()
    }

    fn channel_exists(&self, key: ChannelKey) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM channels WHERE account_id = ?1 AND device_id = ?2 AND channel_id = ?3",
                rusqlite::params![key.account_id, key.device_id, key.channel_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

fn get_channel(conn: &Connection, key: ChannelKey) -> Result<Option<Channel>> {
    let snapshot: Option<String> = conn
        .query_row(
            "SELECT snapshot FROM channels WHERE account_id = ?1 AND device_id = ?2 AND channel_id = ?3",
            rusqlite::params![key.account_id, key.device_id, key.channel_id],
            |row| row.get(0),
        )
        .optional()?;

    snapshot
        .map(|s| serde_json::from_str(&s).map_err(Error::from))
        .transpose()
}

// Reading operations
impl Store {
    /// Append a reading and return its sequence.
    ///
    /// `basis` is stored alongside so later readers can tell whether the flag is current.
    pub fn append_reading(
        &self,
        key: ChannelKey,
        reading: &Reading,
        basis: FlagBasis,
    ) -> Result<u64> {
        if !self.channel_exists(key)? {
            return Err(Error::ChannelNotFound(key));
        }

        self.conn.execute(
            "INSERT INTO readings (account_id, device_id, channel_id, reading_date, reading_value,
             exceeds_limit_values, sensor_latitude, sensor_longitude, config_version,
             limits_fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                key.account_id,
                key.device_id,
                key.channel_id,
                to_nanos(reading.reading_date)?,
                reading.reading_value,
                reading.exceeds_limit_values,
                reading.sensor_latitude,
                reading.sensor_longitude,
                basis.version,
                basis.limits.cast_signed(),
            ],
        )?;

        // AUTOINCREMENT rowids start at 1 and never go negative.
        Ok(self.conn.last_insert_rowid().unsigned_abs())
    }

    /// Query one page of readings.
    ///
    /// `next` is set only when readings remain beyond this page.
    pub fn query_range(&self, query: &RangeQuery) -> Result<ReadingPage> {
        // Fetch one extra row to learn whether another page exists.
        let lookahead = RangeQuery {
            limit: query.limit.map(|l| l.saturating_add(1)),
            ..*query
        };
        let (where_clause, params) = lookahead.build_where()?;
        let sql = lookahead.build_sql(&where_clause);

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let mut readings = stmt
            .query_map(params_ref.as_slice(), map_reading)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next = match query.limit {
            Some(limit) if readings.len() > limit => {
                readings.truncate(limit);
                readings.last().map(StoredReading::cursor)
            }
            _ => None,
        };

        Ok(ReadingPage { readings, next })
    }

    /// Count readings, for one channel or overall.
    pub fn count_readings(&self, key: Option<ChannelKey>) -> Result<u64> {
        let count: i64 = match key {
            Some(key) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE account_id = ?1 AND device_id = ?2 AND channel_id = ?3",
                rusqlite::params![key.account_id, key.device_id, key.channel_id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count.unsigned_abs())
    }
}

/// Map a row selected with [`READING_COLUMNS`](crate::queries::READING_COLUMNS).
fn map_reading(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    let seq: i64 = row.get(0)?;
    let nanos: i64 = row.get(1)?;
    let reading_date = OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(e)))?;

    Ok(StoredReading {
        reading: Reading {
            reading_date,
            reading_value: row.get(2)?,
            exceeds_limit_values: row.get(3)?,
            sensor_latitude: row.get(4)?,
            sensor_longitude: row.get(5)?,
        },
        sequence: seq.unsigned_abs(),
        basis: FlagBasis {
            version: row.get(6)?,
            limits: row.get::<_, i64>(7)?.cast_unsigned(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldline_types::{ChannelLimits, UnitId};
    use time::macros::datetime;

    fn pressure() -> Channel {
        Channel::new(ChannelKey::new(11, 470, 27507), "Pressure", UnitId(3))
            .with_limits(ChannelLimits::outer(14.0, -100.0))
            .with_version(4)
    }

    fn basis() -> FlagBasis {
        FlagBasis::of(&pressure())
    }

    fn range(key: ChannelKey) -> RangeQuery {
        RangeQuery::new(key)
            .since(datetime!(2020-04-24 00:00 UTC))
            .until(datetime!(2020-04-25 00:00 UTC))
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_readings(None).unwrap(), 0);
        assert!(store.list_channels().unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");

        let store = Store::open(&path).unwrap();
        store.put_channel(&pressure()).unwrap();
        drop(store);

        assert!(path.exists());
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.list_channels().unwrap(), vec![pressure()]);
    }

    #[test]
    fn test_read_only_connection_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let writer = Store::open(&path).unwrap();
        let reader = Store::open_read_only(&path).unwrap();

        writer.put_channel(&pressure()).unwrap();
        let reading = Reading::new(datetime!(2020-04-24 10:00 UTC), 15.0).flagged(true);
        writer.append_reading(pressure().key(), &reading, basis()).unwrap();

        assert_eq!(reader.get_channel(pressure().key()).unwrap(), Some(pressure()));
        let page = reader.query_range(&range(pressure().key())).unwrap();
        assert_eq!(page.readings[0].reading, reading);
        assert_eq!(page.readings[0].basis, basis());

        assert!(matches!(
            reader.put_channel(&pressure().with_version(5)),
            Err(Error::Database(_))
        ));
    }

    #[test]
    fn test_put_channel_returns_previous() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.put_channel(&pressure()).unwrap(), None);

        let updated = pressure().with_version(5);
        let previous = store.put_channel(&updated).unwrap();
        assert_eq!(previous, Some(pressure()));
        assert_eq!(
            store.get_channel(updated.key()).unwrap(),
            Some(updated.clone())
        );
        assert_eq!(store.list_channels().unwrap().len(), 1);
    }

    #[test]
    fn test_list_channels_ordered_by_key() {
        let store = Store::open_in_memory().unwrap();
        let b = Channel::new(ChannelKey::new(11, 470, 27507), "Pressure", UnitId(3));
        let a = Channel::new(ChannelKey::new(11, 470, 27504), "Temperature", UnitId(14));
        store.put_channel(&b).unwrap();
        store.put_channel(&a).unwrap();

        let names: Vec<_> = store
            .list_channels()
            .unwrap()
            .into_iter()
            .map(|c| c.channel_name)
            .collect();
        assert_eq!(names, ["Temperature", "Pressure"]);
    }

    #[test]
    fn test_append_unknown_channel() {
        let store = Store::open_in_memory().unwrap();
        let key = ChannelKey::new(1, 1, 1);
        let err = store
            .append_reading(key, &Reading::new(datetime!(2020-04-24 10:00 UTC), 1.0), basis())
            .unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound(k) if k == key));
    }

    #[test]
    fn test_append_and_query_in_time_order() {
        let store = Store::open_in_memory().unwrap();
        let channel = pressure();
        let key = channel.key();
        store.put_channel(&channel).unwrap();

        let late = Reading::new(datetime!(2020-04-24 14:07:07 UTC), 8.21).flagged(false);
        let early = Reading::new(datetime!(2020-04-24 14:02:07 UTC), 8.13).flagged(false);
        let outside = Reading::new(datetime!(2020-04-25 00:00 UTC), 9.0);
        let s1 = store.append_reading(key, &late, basis()).unwrap();
        let s2 = store.append_reading(key, &early, basis()).unwrap();
        store.append_reading(key, &outside, basis()).unwrap();
        assert!(s2 > s1);

        let page = store.query_range(&range(key)).unwrap();
        assert_eq!(page.next, None);
        assert_eq!(page.readings.len(), 2);
        assert_eq!(page.readings[0].reading, early);
        assert_eq!(page.readings[1].reading, late);
        assert_eq!(page.readings[0].basis, basis());
        assert_eq!(page.readings[0].basis.version, 4);
        assert_eq!(store.count_readings(Some(key)).unwrap(), 3);
    }

    #[test]
    fn test_reading_fields_survive_storage() {
        let store = Store::open_in_memory().unwrap();
        let key = pressure().key();
        store.put_channel(&pressure()).unwrap();

        let mut reading = Reading::new(datetime!(2020-04-24 14:02:07.25 UTC), -3.5).flagged(true);
        reading.sensor_latitude = 38.9;
        reading.sensor_longitude = -77.05;
        store.append_reading(key, &reading, basis()).unwrap();

        let page = store.query_range(&range(key)).unwrap();
        assert_eq!(page.readings[0].reading, reading);
    }

    #[test]
    fn test_paging_with_equal_timestamps() {
        let store = Store::open_in_memory().unwrap();
        let key = pressure().key();
        store.put_channel(&pressure()).unwrap();

        let ts = datetime!(2020-04-24 12:00 UTC);
        for i in 0..5 {
            store
                .append_reading(key, &Reading::new(ts, f64::from(i)), basis())
                .unwrap();
        }

        let mut values = Vec::new();
        let mut after = None;
        let mut pages = 0;
        loop {
            let page = store
                .query_range(&range(key).after(after).limit(2))
                .unwrap();
            pages += 1;
            values.extend(page.readings.iter().map(|r| r.reading.reading_value));
            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        assert_eq!(values, [0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_exact_page_has_no_next() {
        let store = Store::open_in_memory().unwrap();
        let key = pressure().key();
        store.put_channel(&pressure()).unwrap();
        for minute in 0..3 {
            let ts = datetime!(2020-04-24 12:00 UTC) + time::Duration::minutes(minute);
            store.append_reading(key, &Reading::new(ts, 1.0), basis()).unwrap();
        }

        let page = store.query_range(&range(key).limit(3)).unwrap();
        assert_eq!(page.readings.len(), 3);
        assert_eq!(page.next, None);
    }

    #[test]
    fn test_channels_do_not_mix() {
        let store = Store::open_in_memory().unwrap();
        let other = Channel::new(ChannelKey::new(11, 470, 27504), "Temperature", UnitId(14));
        store.put_channel(&pressure()).unwrap();
        store.put_channel(&other).unwrap();

        let ts = datetime!(2020-04-24 12:00 UTC);
        store
            .append_reading(pressure().key(), &Reading::new(ts, 8.0), basis())
            .unwrap();
        store
            .append_reading(other.key(), &Reading::new(ts, 50.0), FlagBasis::of(&other))
            .unwrap();

        let page = store.query_range(&range(other.key())).unwrap();
        assert_eq!(page.readings.len(), 1);
        assert_eq!(page.readings[0].reading.reading_value, 50.0);
        assert_eq!(store.count_readings(None).unwrap(), 2);
    }
}
