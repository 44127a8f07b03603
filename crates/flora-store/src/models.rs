//! Data models for stored data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use flora_types::Reading;

/// A device stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDevice {
    /// Device identifier (address or UUID).
    pub id: String,
    /// Advertised name.
    pub name: Option<String>,
    /// Firmware version from the last handshake.
    pub firmware: Option<String>,
    /// Battery percentage from the last handshake.
    pub battery: Option<u8>,
    /// First time this device was seen.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    /// Last time this device was seen.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

/// Where a stored reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    /// Read live from the sensor.
    Live,
    /// Downloaded from the on-device log.
    History,
}

impl ReadingKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ReadingKind::Live => "live",
            ReadingKind::History => "history",
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(ReadingKind::Live),
            "history" => Ok(ReadingKind::History),
            other => Err(format!("unknown reading kind '{other}'")),
        }
    }
}

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// Device identifier.
    pub device_id: String,
    /// Live or history.
    pub kind: ReadingKind,
    /// Index in the device log, for history readings.
    pub history_index: Option<u16>,
    /// When the reading was taken.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// When the reading was written to the database.
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
    /// Temperature in Celsius.
    pub temperature: f32,
    /// Light in lux.
    pub brightness: u32,
    /// Soil moisture percentage.
    pub moisture: u8,
    /// Soil conductivity in µS/cm.
    pub conductivity: u16,
}

impl StoredReading {
    /// Convert to a [`Reading`].
    pub fn to_reading(&self) -> Reading {
        Reading {
            temperature: self.temperature,
            brightness: self.brightness,
            moisture: self.moisture,
            conductivity: self.conductivity,
            timestamp: self.captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_kind_round_trip() {
        for kind in [ReadingKind::Live, ReadingKind::History] {
            assert_eq!(kind.to_string().parse::<ReadingKind>(), Ok(kind));
        }
        assert!("stream".parse::<ReadingKind>().is_err());
        assert_eq!(
            serde_json::to_string(&ReadingKind::History).unwrap(),
            "\"history\""
        );
    }
}
