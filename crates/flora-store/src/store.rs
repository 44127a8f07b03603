//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use flora_types::{DeviceInfo, HistoryLoadingProgress, Reading};

use crate::error::{Error, Result};
use crate::models::{ReadingKind, StoredDevice, StoredReading};
use crate::queries::ReadingQuery;
use crate::schema;

/// SQLite-based store for sensor data.
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

/// Read a unix timestamp column.
fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<StoredDevice> {
    Ok(StoredDevice {
        id: row.get(0)?,
        name: row.get(1)?,
        firmware: row.get(2)?,
        battery: row.get(3)?,
        first_seen: timestamp(row, 4)?,
        last_seen: timestamp(row, 5)?,
    })
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    let kind: String = row.get(2)?;
    Ok(StoredReading {
        id: row.get(0)?,
        device_id: row.get(1)?,
        kind: kind
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
        history_index: row.get(3)?,
        captured_at: timestamp(row, 4)?,
        synced_at: timestamp(row, 5)?,
        temperature: row.get(6)?,
        brightness: row.get(7)?,
        moisture: row.get(8)?,
        conductivity: row.get(9)?,
    })
}

/// Skipped entry indices are kept as a comma-separated list.
fn encode_skipped(skipped: &[u16]) -> String {
    skipped
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_skipped(text: &str) -> Vec<u16> {
    text.split(',')
        .filter(|part| !part.trim().is_empty())
        .filter_map(|part| match part.trim().parse() {
            Ok(index) => Some(index),
            Err(_) => {
                warn!("Ignoring malformed skipped entry {:?}", part);
                None
            }
        })
        .collect()
}

const PROGRESS_COLUMNS: &str =
    "device_id, current_index, total_entries, last_update, device_boot_time, skipped";

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryLoadingProgress> {
    let skipped: String = row.get(5)?;
    Ok(HistoryLoadingProgress {
        device_id: row.get(0)?,
        current_index: row.get(1)?,
        total_entries: row.get(2)?,
        last_update: timestamp(row, 3)?,
        device_boot_time: optional_timestamp(row, 4)?,
        skipped: decode_skipped(&skipped),
    })
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
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        schema::initialize(&conn)?;

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

// Device operations
impl Store {
    /// Get or create a device entry, refreshing its name and last-seen time.
    pub fn upsert_device(&self, device_id: &str, name: Option<&str>) -> Result<StoredDevice> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        self.conn.execute(
            "INSERT INTO devices (id, name, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = COALESCE(?2, name),
                last_seen = ?3",
            rusqlite::params![device_id, name, now],
        )?;

        self.get_device(device_id)?
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))
    }

    /// Record the battery and firmware read during a handshake.
    pub fn update_device_info(&self, device_id: &str, info: &DeviceInfo) -> Result<()> {
        self.upsert_device(device_id, None)?;
        let firmware = (!info.firmware.is_empty()).then_some(info.firmware.as_str());

        self.conn.execute(
            "UPDATE devices SET
                firmware = COALESCE(?2, firmware),
                battery = ?3,
                last_seen = ?4
             WHERE id = ?1",
            rusqlite::params![
                device_id,
                firmware,
                info.battery,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;

        Ok(())
    }

    /// Get a device by ID.
    pub fn get_device(&self, device_id: &str) -> Result<Option<StoredDevice>> {
        let device = self
            .conn
            .query_row(
                "SELECT id, name, firmware, battery, first_seen, last_seen
                 FROM devices WHERE id = ?",
                [device_id],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    /// List all devices, most recently seen first.
    pub fn list_devices(&self) -> Result<Vec<StoredDevice>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, firmware, battery, first_seen, last_seen
             FROM devices ORDER BY last_seen DESC, id",
        )?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(devices)
    }
}

// Reading operations
impl Store {
    fn insert(
        &self,
        device_id: &str,
        kind: ReadingKind,
        history_index: Option<u16>,
        reading: &Reading,
    ) -> Result<bool> {
        self.upsert_device(device_id, None)?;

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO readings (device_id, kind, history_index, captured_at,
             synced_at, temperature, brightness, moisture, conductivity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                device_id,
                kind.as_str(),
                history_index,
                reading.timestamp.unix_timestamp(),
                OffsetDateTime::now_utc().unix_timestamp(),
                reading.temperature,
                reading.brightness,
                reading.moisture,
                reading.conductivity,
            ],
        )?;

        Ok(inserted > 0)
    }

    /// Insert a live reading.
    ///
    /// Returns `false` when a reading with the same timestamp is already
    /// stored for the device.
    pub fn insert_reading(&self, device_id: &str, reading: &Reading) -> Result<bool> {
        self.insert(device_id, ReadingKind::Live, None, reading)
    }

    /// Insert a history entry downloaded from position `index` of the
    /// device log, ignoring duplicates.
    pub fn insert_history(&self, device_id: &str, index: u16, reading: &Reading) -> Result<bool> {
        self.insert(device_id, ReadingKind::History, Some(index), reading)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), reading_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Get the latest reading for a device, live or history.
    pub fn latest_reading(&self, device_id: &str) -> Result<Option<StoredReading>> {
        let query = ReadingQuery::new().device(device_id).limit(1);
        Ok(self.query_readings(&query)?.pop())
    }

    /// Count readings, optionally per device and per kind.
    pub fn count_readings(&self, device_id: Option<&str>, kind: Option<ReadingKind>) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM readings
             WHERE (?1 IS NULL OR device_id = ?1) AND (?2 IS NULL OR kind = ?2)",
            rusqlite::params![device_id, kind.map(ReadingKind::as_str)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

// Transfer progress operations
impl Store {
    /// Load the saved transfer position for a device, exactly as written.
    pub fn load_progress(&self, device_id: &str) -> Result<Option<HistoryLoadingProgress>> {
        let progress = self
            .conn
            .query_row(
                &format!("SELECT {PROGRESS_COLUMNS} FROM history_progress WHERE device_id = ?"),
                [device_id],
                progress_from_row,
            )
            .optional()?;
        Ok(progress)
    }

    /// Save or replace the transfer position for a device.
    pub fn save_progress(&self, progress: &HistoryLoadingProgress) -> Result<()> {
        self.conn.execute(
            "INSERT INTO history_progress
                (device_id, current_index, total_entries, last_update, device_boot_time, skipped)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(device_id) DO UPDATE SET
                current_index = ?2,
                total_entries = ?3,
                last_update = ?4,
                device_boot_time = ?5,
                skipped = ?6",
            rusqlite::params![
                progress.device_id,
                progress.current_index,
                progress.total_entries,
                progress.last_update.unix_timestamp(),
                progress.device_boot_time.map(OffsetDateTime::unix_timestamp),
                encode_skipped(&progress.skipped),
            ],
        )?;

        debug!(
            "Saved progress for {}: {}/{} ({} skipped)",
            progress.device_id,
            progress.current_index,
            progress.total_entries,
            progress.skipped.len()
        );
        Ok(())
    }

    /// Delete the saved transfer position. Returns whether one existed.
    pub fn clear_progress(&self, device_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM history_progress WHERE device_id = ?", [device_id])?;
        Ok(deleted > 0)
    }

    /// Every saved transfer position.
    pub fn list_progress(&self) -> Result<Vec<HistoryLoadingProgress>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM history_progress ORDER BY device_id"
        ))?;
        let records = stmt
            .query_map([], progress_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn reading_at(timestamp: OffsetDateTime, moisture: u8) -> Reading {
        Reading {
            temperature: 19.5,
            brightness: 2300,
            moisture,
            conductivity: 380,
            timestamp,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_devices().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_device() {
        let store = Store::open_in_memory().unwrap();

        let device = store.upsert_device("test-device", Some("Flower care")).unwrap();
        assert_eq!(device.id, "test-device");
        assert_eq!(device.name.as_deref(), Some("Flower care"));

        // a missing name keeps the stored one
        let device = store.upsert_device("test-device", None).unwrap();
        assert_eq!(device.name.as_deref(), Some("Flower care"));
    }

    #[test]
    fn test_update_device_info() {
        let store = Store::open_in_memory().unwrap();
        let info = DeviceInfo {
            battery: 64,
            firmware: "3.2.1".to_string(),
        };
        store.update_device_info("test-device", &info).unwrap();

        let device = store.get_device("test-device").unwrap().unwrap();
        assert_eq!(device.battery, Some(64));
        assert_eq!(device.firmware.as_deref(), Some("3.2.1"));
    }

    #[test]
    fn test_insert_and_query_reading() {
        let store = Store::open_in_memory().unwrap();
        let reading = reading_at(datetime!(2026-05-01 12:00 UTC), 41);

        assert!(store.insert_reading("test-device", &reading).unwrap());

        let readings = store
            .query_readings(&ReadingQuery::new().device("test-device"))
            .unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].kind, ReadingKind::Live);
        assert_eq!(readings[0].history_index, None);
        assert_eq!(readings[0].to_reading(), reading);
    }

    #[test]
    fn test_history_deduplicated_by_timestamp() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2026-05-01 12:00 UTC);

        assert!(store.insert_history("test-device", 0, &reading_at(at, 40)).unwrap());
        assert!(!store.insert_history("test-device", 0, &reading_at(at, 45)).unwrap());
        assert!(!store.insert_reading("test-device", &reading_at(at, 50)).unwrap());

        assert_eq!(store.count_readings(Some("test-device"), None).unwrap(), 1);
        let stored = store.latest_reading("test-device").unwrap().unwrap();
        assert_eq!(stored.moisture, 40);
        assert_eq!(stored.history_index, Some(0));
    }

    #[test]
    fn test_count_by_kind() {
        let store = Store::open_in_memory().unwrap();
        let base = datetime!(2026-05-01 00:00 UTC);
        for i in 0..5u16 {
            let at = base + time::Duration::hours(i64::from(i));
            store.insert_history("a", i, &reading_at(at, 30)).unwrap();
        }
        store
            .insert_reading("a", &reading_at(base + time::Duration::days(1), 30))
            .unwrap();
        store.insert_reading("b", &reading_at(base, 30)).unwrap();

        assert_eq!(store.count_readings(None, None).unwrap(), 7);
        assert_eq!(store.count_readings(Some("a"), Some(ReadingKind::History)).unwrap(), 5);
        assert_eq!(store.count_readings(None, Some(ReadingKind::Live)).unwrap(), 2);

        let latest = store.latest_reading("a").unwrap().unwrap();
        assert_eq!(latest.kind, ReadingKind::Live);

        let page = store
            .query_readings(
                &ReadingQuery::new()
                    .device("a")
                    .kind(ReadingKind::History)
                    .oldest_first()
                    .limit(2)
                    .offset(1),
            )
            .unwrap();
        let indices: Vec<_> = page.iter().filter_map(|r| r.history_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_progress_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_progress("a").unwrap().is_none());

        let mut progress =
            HistoryLoadingProgress::new("a", 40, 100, Some(datetime!(2026-04-24 08:00 UTC)));
        progress.last_update = datetime!(2026-05-01 12:00 UTC);
        store.save_progress(&progress).unwrap();
        assert_eq!(store.load_progress("a").unwrap(), Some(progress.clone()));

        progress.current_index = 41;
        progress.skipped = vec![3, 17];
        store.save_progress(&progress).unwrap();
        let loaded = store.load_progress("a").unwrap().unwrap();
        assert_eq!(loaded.current_index, 41);
        assert_eq!(loaded.skipped, vec![3, 17]);
        assert_eq!(store.list_progress().unwrap().len(), 1);

        assert!(store.clear_progress("a").unwrap());
        assert!(!store.clear_progress("a").unwrap());
        assert!(store.load_progress("a").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_progress_stored_as_is() {
        let store = Store::open_in_memory().unwrap();
        let mut progress = HistoryLoadingProgress::new("a", 0, 10, None);
        progress.current_index = -1;
        progress.last_update = datetime!(2026-05-01 12:00 UTC);
        store.save_progress(&progress).unwrap();

        let loaded = store.load_progress("a").unwrap().unwrap();
        assert_eq!(loaded.current_index, -1);
        assert!(!loaded.is_consistent());
    }

    #[test]
    fn test_malformed_skipped_list_tolerated() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_progress(&HistoryLoadingProgress::new("a", 5, 10, None))
            .unwrap();
        store
            .conn
            .execute("UPDATE history_progress SET skipped = '1,x,,4'", [])
            .unwrap();

        let loaded = store.load_progress("a").unwrap().unwrap();
        assert_eq!(loaded.skipped, vec![1, 4]);
        assert_eq!(encode_skipped(&loaded.skipped), "1,4");
    }
}
