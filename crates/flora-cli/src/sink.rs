//! SQLite-backed persistence for sessions.

use std::sync::{Mutex, MutexGuard, PoisonError};

use flora_core::{DeviceInfo, Error, HistoryLoadingProgress, ProgressStore, Reading, ReadingSink};
use flora_store::Store;
use tracing::debug;

/// Shares one [`Store`] between the session layer and the CLI.
///
/// The SQLite connection is not `Sync`, so every call goes through a mutex.
#[derive(Debug)]
pub struct StoreHandle {
    store: Mutex<Store>,
}

impl StoreHandle {
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Lock the underlying store.
    pub fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProgressStore for StoreHandle {
    fn load(&self, device_id: &str) -> flora_core::Result<Option<HistoryLoadingProgress>> {
        self.lock()
            .load_progress(device_id)
            .map_err(Error::persistence)
    }

    fn save(&self, progress: &HistoryLoadingProgress) -> flora_core::Result<()> {
        self.lock().save_progress(progress).map_err(Error::persistence)
    }

    fn clear(&self, device_id: &str) -> flora_core::Result<()> {
        self.lock()
            .clear_progress(device_id)
            .map(drop)
            .map_err(Error::persistence)
    }
}

impl ReadingSink for StoreHandle {
    fn upsert_device(
        &self,
        device_id: &str,
        name: Option<&str>,
        info: Option<&DeviceInfo>,
    ) -> flora_core::Result<()> {
        let store = self.lock();
        store
            .upsert_device(device_id, name)
            .map_err(Error::persistence)?;
        if let Some(info) = info {
            store
                .update_device_info(device_id, info)
                .map_err(Error::persistence)?;
        }
        Ok(())
    }

    fn append_live(&self, device_id: &str, reading: &Reading) -> flora_core::Result<()> {
        let inserted = self
            .lock()
            .insert_reading(device_id, reading)
            .map_err(Error::persistence)?;
        if !inserted {
            debug!(device_id, "Live reading already stored");
        }
        Ok(())
    }

    fn append_history(&self, device_id: &str, index: u16, reading: &Reading) -> flora_core::Result<()> {
        let inserted = self
            .lock()
            .insert_history(device_id, index, reading)
            .map_err(Error::persistence)?;
        if !inserted {
            debug!(device_id, index, "History entry already stored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flora_core::mock::{MockRadio, MockSensor};
    use flora_core::{ConnectionPool, PoolConfig, TransferOptions};
    use flora_store::ReadingKind;
    use time::macros::datetime;

    use super::*;

    const SENSOR: &str = "C4:7C:8D:6A:3E:11";

    fn handle() -> StoreHandle {
        StoreHandle::new(Store::open_in_memory().unwrap())
    }

    #[test]
    fn test_progress_store_round_trip() {
        let handle = handle();
        assert!(handle.load(SENSOR).unwrap().is_none());

        let mut progress = HistoryLoadingProgress::new(SENSOR, 12, 50, None);
        progress.last_update = datetime!(2026-05-01 12:00 UTC);
        handle.save(&progress).unwrap();
        assert_eq!(handle.load(SENSOR).unwrap(), Some(progress));

        handle.clear(SENSOR).unwrap();
        // clearing twice is fine
        handle.clear(SENSOR).unwrap();
        assert!(handle.load(SENSOR).unwrap().is_none());
    }

    #[test]
    fn test_reading_sink_records_device_info() {
        let handle = handle();
        let info = DeviceInfo {
            battery: 87,
            firmware: "3.2.1".to_string(),
        };
        handle
            .upsert_device(SENSOR, Some("Flower care"), Some(&info))
            .unwrap();

        let device = handle.lock().get_device(SENSOR).unwrap().unwrap();
        assert_eq!(device.name.as_deref(), Some("Flower care"));
        assert_eq!(device.battery, Some(87));
    }

    #[test]
    fn test_duplicate_readings_are_not_errors() {
        let handle = handle();
        let reading = Reading {
            temperature: 20.0,
            brightness: 900,
            moisture: 35,
            conductivity: 300,
            timestamp: datetime!(2026-05-01 12:00 UTC),
        };
        handle.append_live(SENSOR, &reading).unwrap();
        handle.append_live(SENSOR, &reading).unwrap();
        assert_eq!(handle.lock().count_readings(Some(SENSOR), None).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_sync_into_sqlite() {
        let radio = Arc::new(MockRadio::new());
        radio.add_sensor(MockSensor::new(SENSOR).history_len(30));
        let pool = ConnectionPool::start(radio, PoolConfig::default())
            .await
            .unwrap();
        let session = pool.connect(SENSOR).await.unwrap();

        let handle = handle();
        let outcome = session
            .sync_history(&handle, &handle, &TransferOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.retrieved, 30);
        assert!(outcome.is_complete());
        let store = handle.lock();
        assert_eq!(
            store
                .count_readings(Some(SENSOR), Some(ReadingKind::History))
                .unwrap(),
            30
        );
        assert!(store.load_progress(SENSOR).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_sync_resumes_from_sqlite() {
        let radio = Arc::new(MockRadio::new());
        radio.add_sensor(MockSensor::new(SENSOR).history_len(50).disconnect_after(20));
        let pool = ConnectionPool::start(radio, PoolConfig::default())
            .await
            .unwrap();
        let handle = handle();

        let session = pool.connect(SENSOR).await.unwrap();
        let first = session
            .sync_history(&handle, &handle, &TransferOptions::default())
            .await;
        assert!(first.is_err());
        let saved = handle.load(SENSOR).unwrap().unwrap();
        assert_eq!(saved.total_entries, 50);
        assert!(saved.current_index > 0);

        let session = pool.connect(SENSOR).await.unwrap();
        let second = session
            .sync_history(&handle, &handle, &TransferOptions::default())
            .await
            .unwrap();
        assert_eq!(i64::from(second.resumed_from), saved.current_index);
        assert_eq!(
            handle
                .lock()
                .count_readings(Some(SENSOR), Some(ReadingKind::History))
                .unwrap(),
            50
        );
    }
}
