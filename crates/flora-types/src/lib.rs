//! Platform-agnostic types for wireless soil sensors.
//!
//! This crate holds everything about the sensor protocol that does not need
//! a radio: reading types, the byte-level wire codec, characteristic UUIDs
//! and the resumable transfer progress record. `flora-core` builds the
//! session layer on top of it.
//!
//! # Example
//!
//! ```
//! use flora_types::codec::{decode_entry_count, encode_history_address_command};
//!
//! let total = decode_entry_count(&[0x96, 0x00]).unwrap();
//! assert_eq!(total, 150);
//! assert_eq!(encode_history_address_command(1), [0xA1, 0x01, 0x00]);
//! ```

pub mod codec;
pub mod error;
pub mod progress;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use progress::{HistoryLoadingProgress, ProgressRejection};
pub use types::{CharacteristicRole, DeviceInfo, HistoricalReading, Reading};
pub use self::uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::invalid_length("live reading", 16, 3);
        assert_eq!(
            err.to_string(),
            "Invalid live reading payload: expected 16 bytes, got 3"
        );

        let err = ParseError::InvalidValue("moisture 180% out of range".to_string());
        assert_eq!(err.to_string(), "Invalid value: moisture 180% out of range");
    }

    #[test]
    fn test_reading_serialization() {
        let reading = Reading {
            temperature: 21.5,
            brightness: 1500,
            moisture: 33,
            conductivity: 420,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };

        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"moisture\":33"));
        assert!(json.contains("\"timestamp\":\"1970-01-01T00:00:00Z\""));

        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_device_info_serialization() {
        let info = DeviceInfo {
            battery: 87,
            firmware: "3.2.1".to_string(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"battery":87,"firmware":"3.2.1"}"#);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&CharacteristicRole::HistoryData).unwrap(),
            "\"HistoryData\""
        );
    }
}
