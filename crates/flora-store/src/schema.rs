//! Table layout, versioned through SQLite's `user_version` pragma.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

/// Layout version written by this crate.
pub const SCHEMA_VERSION: i32 = 2;

const TABLES_V1: &str = r#"
CREATE TABLE devices (
    id TEXT PRIMARY KEY,
    name TEXT,
    firmware TEXT,
    battery INTEGER,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);

-- Live and history readings share one table; a device never
-- reports two readings for the same second.
CREATE TABLE readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL REFERENCES devices(id),
    kind TEXT NOT NULL CHECK (kind IN ('live', 'history')),
    history_index INTEGER,
    captured_at INTEGER NOT NULL,
    synced_at INTEGER NOT NULL,
    temperature REAL NOT NULL,
    brightness INTEGER NOT NULL,
    moisture INTEGER NOT NULL,
    conductivity INTEGER NOT NULL,
    UNIQUE(device_id, captured_at)
);
CREATE INDEX idx_readings_device_time ON readings(device_id, captured_at);

-- Position of an interrupted history transfer. Indices are stored
-- as written; validation happens when a transfer resumes.
CREATE TABLE history_progress (
    device_id TEXT PRIMARY KEY,
    current_index INTEGER NOT NULL,
    total_entries INTEGER NOT NULL,
    last_update INTEGER NOT NULL,
    device_boot_time INTEGER
);
"#;

// v2: entries skipped before the saved cursor
const TABLES_V2: &str = r#"
ALTER TABLE history_progress ADD COLUMN skipped TEXT NOT NULL DEFAULT '';
"#;

fn user_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Create the tables of a fresh database, bring an older one up to date,
/// or reject a layout newer than this crate understands.
pub fn initialize(conn: &Connection) -> Result<()> {
    let found = user_version(conn)?;
    if found == SCHEMA_VERSION {
        return Ok(());
    }
    if !(0..SCHEMA_VERSION).contains(&found) {
        return Err(Error::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.unchecked_transaction()?;
    if found < 1 {
        tx.execute_batch(TABLES_V1)?;
    }
    if found < 2 {
        tx.execute_batch(TABLES_V2)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    if found > 0 {
        info!("Upgraded database layout from version {} to {}", found, SCHEMA_VERSION);
    }
    Ok(())
}
