//! Bluetooth UUIDs for soil sensors.
//!
//! The sensor exposes two custom services: a data service carrying the
//! control, live-reading and firmware characteristics, and a history service
//! carrying the history control, history data and device clock
//! characteristics.

use uuid::{Uuid, uuid};

// --- Advertisement ---

/// Service UUID advertised by the sensor, used as the scan filter.
pub const ADVERTISED_SERVICE: Uuid = uuid!("0000fe95-0000-1000-8000-00805f9b34fb");

// --- Services ---

/// Data service (live readings, control, firmware).
pub const DATA_SERVICE: Uuid = uuid!("00001204-0000-1000-8000-00805f9b34fb");

/// History service (stored log, device clock).
pub const HISTORY_SERVICE: Uuid = uuid!("00001206-0000-1000-8000-00805f9b34fb");

// --- Data service characteristics ---

/// Control characteristic, receives the mode-change command.
pub const CONTROL: Uuid = uuid!("00001a00-0000-1000-8000-00805f9b34fb");

/// Live sensor values (16 bytes).
pub const LIVE_DATA: Uuid = uuid!("00001a01-0000-1000-8000-00805f9b34fb");

/// Battery level and firmware version.
pub const FIRMWARE_BATTERY: Uuid = uuid!("00001a02-0000-1000-8000-00805f9b34fb");

// --- History service characteristics ---

/// History control, receives the history-mode and address commands.
pub const HISTORY_CONTROL: Uuid = uuid!("00001a10-0000-1000-8000-00805f9b34fb");

/// History data, answers with the entry count or a single entry.
pub const HISTORY_DATA: Uuid = uuid!("00001a11-0000-1000-8000-00805f9b34fb");

/// Seconds elapsed since the device booted.
pub const DEVICE_TIME: Uuid = uuid!("00001a12-0000-1000-8000-00805f9b34fb");
