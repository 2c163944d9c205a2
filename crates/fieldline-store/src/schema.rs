//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Created database schema v{}", SCHEMA_VERSION);
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    } else if version > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Version 1: channel snapshots and the append-only readings log.
///
/// Reading timestamps are unix nanoseconds; `seq` is the store sequence and breaks
/// timestamp ties in arrival order. `config_version` and `limits_fingerprint` record
/// what the exceedance flag was computed under.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Latest snapshot per channel, stored as its wire JSON
        CREATE TABLE IF NOT EXISTS channels (
            account_id INTEGER NOT NULL,
            device_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            config_version INTEGER NOT NULL,
            snapshot TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (account_id, device_id, channel_id)
        );

        CREATE TABLE IF NOT EXISTS readings (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            device_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            reading_date INTEGER NOT NULL,
            reading_value REAL NOT NULL,
            exceeds_limit_values INTEGER NOT NULL,
            sensor_latitude REAL NOT NULL,
            sensor_longitude REAL NOT NULL,
            config_version INTEGER NOT NULL,
            limits_fingerprint INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (account_id, device_id, channel_id)
                REFERENCES channels(account_id, device_id, channel_id)
        );
        CREATE INDEX IF NOT EXISTS idx_readings_channel_time
            ON readings(account_id, device_id, channel_id, reading_date, seq);
        "#,
    )?;

    Ok(())
}

fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    // Future migrations go here, e.g. `if old_version < 2 { migrate_to_v2(conn)?; }`
    info!(
        "Migrating database schema v{} -> v{}",
        old_version, SCHEMA_VERSION
    );
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"channels".to_string()));
        assert!(tables.contains(&"readings".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Initializing again is a no-op
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        let err = initialize(&conn).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedSchema { found, supported }
                if found == SCHEMA_VERSION + 1 && supported == SCHEMA_VERSION
        ));
    }
}
