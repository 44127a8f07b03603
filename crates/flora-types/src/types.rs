//! Core types for soil sensor data.

use core::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A decoded set of sensor values with the wall-clock time they refer to.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Soil temperature in °C.
    pub temperature: f32,
    /// Ambient light in lux.
    pub brightness: u32,
    /// Soil moisture percentage (0-100).
    pub moisture: u8,
    /// Soil conductivity in µS/cm.
    pub conductivity: u16,
    /// When the values were captured.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

/// One entry of the on-device history log.
///
/// The timestamp is relative to the device's boot. Use
/// [`HistoricalReading::timestamp`] with an estimated boot epoch to place it
/// on the wall clock.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoricalReading {
    /// Seconds since the device booted when the entry was recorded.
    pub device_seconds: u32,
    /// Soil temperature in °C.
    pub temperature: f32,
    /// Ambient light in lux.
    pub brightness: u32,
    /// Soil moisture percentage (0-100).
    pub moisture: u8,
    /// Soil conductivity in µS/cm.
    pub conductivity: u16,
}

impl HistoricalReading {
    /// Wall-clock time of this entry given the device boot epoch.
    #[must_use]
    pub fn timestamp(&self, boot_epoch: OffsetDateTime) -> OffsetDateTime {
        boot_epoch + Duration::from_secs(u64::from(self.device_seconds))
    }

    /// Convert into a [`Reading`] anchored at `boot_epoch`.
    #[must_use]
    pub fn to_reading(&self, boot_epoch: OffsetDateTime) -> Reading {
        Reading {
            temperature: self.temperature,
            brightness: self.brightness,
            moisture: self.moisture,
            conductivity: self.conductivity,
            timestamp: self.timestamp(boot_epoch),
        }
    }
}

/// Battery level and firmware version reported by the sensor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// Battery level (0-100).
    pub battery: u8,
    /// Firmware version string, e.g. "3.2.1".
    pub firmware: String,
}

/// Logical role of a characteristic in the sensor protocol.
///
/// Sessions map each role to the platform handle discovered on the
/// peripheral; protocol code only ever refers to roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CharacteristicRole {
    /// Mode-change command sink.
    Control,
    /// Live sensor values.
    LiveData,
    /// Battery and firmware.
    FirmwareBattery,
    /// History mode and address commands.
    HistoryControl,
    /// Entry count and history entries.
    HistoryData,
    /// Seconds since boot.
    DeviceTime,
}

impl CharacteristicRole {
    /// Every role, all of which must be present before a session authenticates.
    pub const ALL: [CharacteristicRole; 6] = [
        CharacteristicRole::Control,
        CharacteristicRole::LiveData,
        CharacteristicRole::FirmwareBattery,
        CharacteristicRole::HistoryControl,
        CharacteristicRole::HistoryData,
        CharacteristicRole::DeviceTime,
    ];

    /// The characteristic UUID for this role.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        match self {
            CharacteristicRole::Control => crate::uuid::CONTROL,
            CharacteristicRole::LiveData => crate::uuid::LIVE_DATA,
            CharacteristicRole::FirmwareBattery => crate::uuid::FIRMWARE_BATTERY,
            CharacteristicRole::HistoryControl => crate::uuid::HISTORY_CONTROL,
            CharacteristicRole::HistoryData => crate::uuid::HISTORY_DATA,
            CharacteristicRole::DeviceTime => crate::uuid::DEVICE_TIME,
        }
    }

    /// Look up the role for a characteristic UUID.
    ///
    /// ```
    /// use flora_types::{CharacteristicRole, uuid};
    ///
    /// assert_eq!(
    ///     CharacteristicRole::from_uuid(&uuid::LIVE_DATA),
    ///     Some(CharacteristicRole::LiveData)
    /// );
    /// assert_eq!(CharacteristicRole::from_uuid(&uuid::ADVERTISED_SERVICE), None);
    /// ```
    #[must_use]
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.uuid() == *uuid)
    }
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CharacteristicRole::Control => "control",
            CharacteristicRole::LiveData => "live data",
            CharacteristicRole::FirmwareBattery => "firmware/battery",
            CharacteristicRole::HistoryControl => "history control",
            CharacteristicRole::HistoryData => "history data",
            CharacteristicRole::DeviceTime => "device time",
        };
        f.write_str(name)
    }
}
