//! Persistence collaborators.
//!
//! Sessions never talk to a database directly. History progress goes through
//! a [`ProgressStore`] and decoded readings go to a [`ReadingSink`]; both are
//! synchronous because every call is a small local write.
//!
//! In-memory implementations are provided for tests and for callers that do
//! not need durability.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use flora_types::{DeviceInfo, HistoryLoadingProgress, Reading};

use crate::error::Result;

/// Durable home of [`HistoryLoadingProgress`] records, keyed by device id.
pub trait ProgressStore: Send + Sync {
    /// Load the record for `device_id`, if any.
    fn load(&self, device_id: &str) -> Result<Option<HistoryLoadingProgress>>;

    /// Insert or replace the record for `progress.device_id`.
    fn save(&self, progress: &HistoryLoadingProgress) -> Result<()>;

    /// Remove the record for `device_id`. Removing a missing record is not
    /// an error.
    fn clear(&self, device_id: &str) -> Result<()>;
}

/// Receiver of decoded readings.
pub trait ReadingSink: Send + Sync {
    /// Record or refresh what is known about a device.
    fn upsert_device(&self, device_id: &str, name: Option<&str>, info: Option<&DeviceInfo>)
    -> Result<()>;

    /// Store a live reading.
    fn append_live(&self, device_id: &str, reading: &Reading) -> Result<()>;

    /// Store a reading decoded from history entry `index`.
    fn append_history(&self, device_id: &str, index: u16, reading: &Reading) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Progress store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<String, HistoryLoadingProgress>>,
}

impl MemoryProgressStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record as-is, without any consistency check.
    pub fn insert_raw(&self, progress: HistoryLoadingProgress) {
        lock(&self.records).insert(progress.device_id.clone(), progress);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    /// Whether no record is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(&self, device_id: &str) -> Result<Option<HistoryLoadingProgress>> {
        Ok(lock(&self.records).get(device_id).cloned())
    }

    fn save(&self, progress: &HistoryLoadingProgress) -> Result<()> {
        self.insert_raw(progress.clone());
        Ok(())
    }

    fn clear(&self, device_id: &str) -> Result<()> {
        lock(&self.records).remove(device_id);
        Ok(())
    }
}

/// A reading captured by [`MemoryReadingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    /// Device the reading came from.
    pub device_id: String,
    /// History index, `None` for live readings.
    pub index: Option<u16>,
    /// The reading.
    pub reading: Reading,
}

/// Reading sink keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryReadingSink {
    readings: Mutex<Vec<StoredReading>>,
    devices: Mutex<HashMap<String, (Option<String>, Option<DeviceInfo>)>>,
}

impl MemoryReadingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All readings in arrival order.
    pub fn readings(&self) -> Vec<StoredReading> {
        lock(&self.readings).clone()
    }

    /// History indices stored for `device_id`, in arrival order.
    pub fn history_indices(&self, device_id: &str) -> Vec<u16> {
        lock(&self.readings)
            .iter()
            .filter(|r| r.device_id == device_id)
            .filter_map(|r| r.index)
            .collect()
    }

    /// Live readings stored for `device_id`.
    pub fn live_count(&self, device_id: &str) -> usize {
        lock(&self.readings)
            .iter()
            .filter(|r| r.device_id == device_id && r.index.is_none())
            .count()
    }

    /// Device info last recorded for `device_id`.
    pub fn device_info(&self, device_id: &str) -> Option<DeviceInfo> {
        lock(&self.devices)
            .get(device_id)
            .and_then(|(_, info)| info.clone())
    }
}

impl ReadingSink for MemoryReadingSink {
    fn upsert_device(
        &self,
        device_id: &str,
        name: Option<&str>,
        info: Option<&DeviceInfo>,
    ) -> Result<()> {
        let mut devices = lock(&self.devices);
        let entry = devices.entry(device_id.to_string()).or_default();
        if let Some(name) = name {
            entry.0 = Some(name.to_string());
        }
        if let Some(info) = info {
            entry.1 = Some(info.clone());
        }
        Ok(())
    }

    fn append_live(&self, device_id: &str, reading: &Reading) -> Result<()> {
        lock(&self.readings).push(StoredReading {
            device_id: device_id.to_string(),
            index: None,
            reading: *reading,
        });
        Ok(())
    }

    fn append_history(&self, device_id: &str, index: u16, reading: &Reading) -> Result<()> {
        lock(&self.readings).push(StoredReading {
            device_id: device_id.to_string(),
            index: Some(index),
            reading: *reading,
        });
        Ok(())
    }
}
