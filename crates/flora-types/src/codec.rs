//! Wire codec for the sensor protocol.
//!
//! Pure functions translating between byte buffers and protocol values.
//! Every decoder checks the exact payload length before touching any field
//! and returns [`ParseError::InvalidLength`] on mismatch, so a short or
//! oversized notification never produces a partial reading.
//!
//! # Layouts
//!
//! Live reading (16 bytes):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | temperature, i16 LE, 0.1 °C |
//! | 3 | 4 | brightness, u32 LE, lux |
//! | 7 | 1 | moisture, % |
//! | 8 | 2 | conductivity, u16 LE, µS/cm |
//!
//! History entry (16 bytes) carries a leading u32 LE device timestamp and
//! the same fields shifted by four bytes.

use std::time::Duration;

use bytes::Buf;
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};
use crate::types::{DeviceInfo, HistoricalReading, Reading};

/// Mode-change command written to the control characteristic before
/// requesting live data.
pub const MODE_CHANGE_COMMAND: [u8; 2] = [0xA0, 0x1F];

/// Puts the history characteristic into count mode; the next history data
/// read answers with the entry count.
pub const HISTORY_MODE_COMMAND: [u8; 3] = [0xA0, 0x00, 0x00];

/// Opcode of the history address command.
pub const HISTORY_ADDRESS_OPCODE: u8 = 0xA1;

/// Length of live and history entry payloads.
pub const READING_LEN: usize = 16;

/// Length of the entry count payload.
pub const ENTRY_COUNT_LEN: usize = 2;

/// Length of the device time payload.
pub const DEVICE_TIME_LEN: usize = 4;

/// Length of the firmware/battery payload.
pub const FIRMWARE_BATTERY_LEN: usize = 7;

fn expect_len(what: &'static str, bytes: &[u8], expected: usize) -> ParseResult<()> {
    if bytes.len() != expected {
        return Err(ParseError::invalid_length(what, expected, bytes.len()));
    }
    Ok(())
}

fn check_moisture(moisture: u8) -> ParseResult<u8> {
    if moisture > 100 {
        return Err(ParseError::InvalidValue(format!(
            "moisture {moisture}% out of range"
        )));
    }
    Ok(moisture)
}

/// Decode the number of stored history entries.
///
/// ```
/// use flora_types::codec::decode_entry_count;
///
/// assert_eq!(decode_entry_count(&[0x96, 0x00]), Ok(150));
/// assert!(decode_entry_count(&[0x96]).is_err());
/// ```
pub fn decode_entry_count(bytes: &[u8]) -> ParseResult<u16> {
    expect_len("entry count", bytes, ENTRY_COUNT_LEN)?;
    let mut buf = bytes;
    Ok(buf.get_u16_le())
}

/// Decode a live reading captured at `captured_at`.
pub fn decode_live_reading(bytes: &[u8], captured_at: OffsetDateTime) -> ParseResult<Reading> {
    expect_len("live reading", bytes, READING_LEN)?;
    let mut buf = bytes;

    let temperature = f32::from(buf.get_i16_le()) / 10.0;
    buf.advance(1);
    let brightness = buf.get_u32_le();
    let moisture = check_moisture(buf.get_u8())?;
    let conductivity = buf.get_u16_le();

    Ok(Reading {
        temperature,
        brightness,
        moisture,
        conductivity,
        timestamp: captured_at,
    })
}

/// Decode one history log entry.
pub fn decode_history_entry(bytes: &[u8]) -> ParseResult<HistoricalReading> {
    expect_len("history entry", bytes, READING_LEN)?;
    let mut buf = bytes;

    let device_seconds = buf.get_u32_le();
    let temperature = f32::from(buf.get_i16_le()) / 10.0;
    buf.advance(1);
    let brightness = buf.get_u32_le();
    let moisture = check_moisture(buf.get_u8())?;
    let conductivity = buf.get_u16_le();

    Ok(HistoricalReading {
        device_seconds,
        temperature,
        brightness,
        moisture,
        conductivity,
    })
}

/// Encode the command selecting history entry `index`.
///
/// ```
/// use flora_types::codec::encode_history_address_command;
///
/// assert_eq!(encode_history_address_command(0x0102), [0xA1, 0x02, 0x01]);
/// ```
#[must_use]
pub fn encode_history_address_command(index: u16) -> [u8; 3] {
    let [lo, hi] = index.to_le_bytes();
    [HISTORY_ADDRESS_OPCODE, lo, hi]
}

/// Decode the time elapsed since the device booted.
pub fn decode_device_boot_offset(bytes: &[u8]) -> ParseResult<Duration> {
    expect_len("device time", bytes, DEVICE_TIME_LEN)?;
    let mut buf = bytes;
    Ok(Duration::from_secs(u64::from(buf.get_u32_le())))
}

/// Estimate the wall-clock boot epoch from the current time and the boot
/// offset reported by the device.
#[must_use]
pub fn boot_epoch(now: OffsetDateTime, offset: Duration) -> OffsetDateTime {
    now - offset
}

/// Decode the battery level and firmware version.
///
/// Byte 0 is the battery percentage, byte 1 a separator, and the remaining
/// bytes an ASCII version string padded with NULs.
pub fn decode_firmware_battery(bytes: &[u8]) -> ParseResult<DeviceInfo> {
    expect_len("firmware/battery", bytes, FIRMWARE_BATTERY_LEN)?;

    let battery = bytes[0];
    if battery > 100 {
        return Err(ParseError::InvalidValue(format!(
            "battery {battery}% out of range"
        )));
    }

    let firmware = std::str::from_utf8(&bytes[2..])
        .map_err(|_| ParseError::InvalidValue("firmware version is not ASCII".to_string()))?
        .trim_end_matches('\0')
        .to_string();

    Ok(DeviceInfo { battery, firmware })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    fn live_bytes(temp: i16, brightness: u32, moisture: u8, conductivity: u16) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..2].copy_from_slice(&temp.to_le_bytes());
        bytes[3..7].copy_from_slice(&brightness.to_le_bytes());
        bytes[7] = moisture;
        bytes[8..10].copy_from_slice(&conductivity.to_le_bytes());
        bytes
    }

    #[test]
    fn test_entry_count() {
        assert_eq!(decode_entry_count(&[0x96, 0x00]), Ok(150));
        assert_eq!(decode_entry_count(&[0x00, 0x01]), Ok(256));
    }

    #[test]
    fn test_entry_count_rejects_wrong_length() {
        assert_eq!(
            decode_entry_count(&[0x96]),
            Err(ParseError::invalid_length("entry count", 2, 1))
        );
        assert!(decode_entry_count(&[0x96, 0x00, 0x00]).is_err());
        assert!(decode_entry_count(&[]).is_err());
    }

    #[test]
    fn test_live_reading_temperature_scale() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xE8;
        bytes[1] = 0x03;
        let now = datetime!(2026-05-01 12:00 UTC);

        let reading = decode_live_reading(&bytes, now).unwrap();
        assert!((reading.temperature - 100.0).abs() < f32::EPSILON);
        assert_eq!(reading.timestamp, now);
    }

    #[test]
    fn test_live_reading_fields() {
        let bytes = live_bytes(-35, 12_000, 42, 350);
        let reading = decode_live_reading(&bytes, OffsetDateTime::UNIX_EPOCH).unwrap();

        assert!((reading.temperature - -3.5).abs() < 0.001);
        assert_eq!(reading.brightness, 12_000);
        assert_eq!(reading.moisture, 42);
        assert_eq!(reading.conductivity, 350);
    }

    #[test]
    fn test_live_reading_rejects_wrong_length() {
        let now = OffsetDateTime::UNIX_EPOCH;
        assert!(decode_live_reading(&[0u8; 15], now).is_err());
        assert!(decode_live_reading(&[0u8; 17], now).is_err());
    }

    #[test]
    fn test_live_reading_rejects_moisture_out_of_range() {
        let bytes = live_bytes(200, 0, 150, 0);
        assert!(matches!(
            decode_live_reading(&bytes, OffsetDateTime::UNIX_EPOCH),
            Err(ParseError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_history_entry_layout() {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&7200u32.to_le_bytes());
        bytes[4..6].copy_from_slice(&215i16.to_le_bytes());
        bytes[7..11].copy_from_slice(&800u32.to_le_bytes());
        bytes[11] = 55;
        bytes[12..14].copy_from_slice(&410u16.to_le_bytes());

        let entry = decode_history_entry(&bytes).unwrap();
        assert_eq!(entry.device_seconds, 7200);
        assert!((entry.temperature - 21.5).abs() < 0.001);
        assert_eq!(entry.brightness, 800);
        assert_eq!(entry.moisture, 55);
        assert_eq!(entry.conductivity, 410);
    }

    #[test]
    fn test_history_entry_rejects_wrong_length() {
        assert_eq!(
            decode_history_entry(&[0u8; 10]),
            Err(ParseError::invalid_length("history entry", 16, 10))
        );
    }

    #[test]
    fn test_address_command() {
        assert_eq!(encode_history_address_command(0), [0xA1, 0x00, 0x00]);
        assert_eq!(encode_history_address_command(300), [0xA1, 0x2C, 0x01]);
    }

    #[test]
    fn test_boot_offset_and_epoch() {
        let offset = decode_device_boot_offset(&[0x10, 0x0E, 0x00, 0x00]).unwrap();
        assert_eq!(offset, Duration::from_secs(3600));

        let now = datetime!(2026-05-01 12:00 UTC);
        assert_eq!(boot_epoch(now, offset), datetime!(2026-05-01 11:00 UTC));

        assert!(decode_device_boot_offset(&[0x10, 0x0E]).is_err());
    }

    #[test]
    fn test_firmware_battery() {
        let info = decode_firmware_battery(&[0x63, 0x2D, b'3', b'.', b'2', b'.', b'1']).unwrap();
        assert_eq!(info.battery, 99);
        assert_eq!(info.firmware, "3.2.1");

        let padded = decode_firmware_battery(&[50, 0x2D, b'3', b'.', b'2', 0, 0]).unwrap();
        assert_eq!(padded.firmware, "3.2");

        assert!(decode_firmware_battery(&[0xFF, 0x2D, b'3', b'.', b'2', b'.', b'1']).is_err());
        assert!(decode_firmware_battery(&[50]).is_err());
    }

    proptest! {
        #[test]
        fn prop_decoders_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
            let _ = decode_entry_count(&bytes);
            let _ = decode_live_reading(&bytes, OffsetDateTime::UNIX_EPOCH);
            let _ = decode_history_entry(&bytes);
            let _ = decode_device_boot_offset(&bytes);
            let _ = decode_firmware_battery(&bytes);
        }

        #[test]
        fn prop_address_command_carries_index(index in any::<u16>()) {
            let cmd = encode_history_address_command(index);
            prop_assert_eq!(cmd[0], HISTORY_ADDRESS_OPCODE);
            prop_assert_eq!(u16::from_le_bytes([cmd[1], cmd[2]]), index);
        }
    }
}
