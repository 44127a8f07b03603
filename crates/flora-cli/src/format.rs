//! Output formatting for text and JSON.

use anyhow::Result;
use flora_core::{BackgroundFetchResult, DeviceInfo, DiscoveredSensor, HistoryOutcome, Reading};
use flora_store::StoredReading;
use flora_types::HistoryLoadingProgress;
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::style;

/// Options controlling output formatting.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, compact: bool) -> Self {
        Self { no_color, compact }
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }

    fn label(&self, text: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            format!("{}", text.bold())
        }
    }
}

fn format_time(time: OffsetDateTime) -> String {
    time.format(&Rfc3339).unwrap_or_else(|_| time.to_string())
}

// ============================================================================
// Scan
// ============================================================================

pub fn format_scan_json(sensors: &[DiscoveredSensor], opts: &FormatOptions) -> Result<String> {
    #[derive(Serialize)]
    struct ScanResult<'a> {
        count: usize,
        devices: &'a [DiscoveredSensor],
    }

    opts.as_json(&ScanResult {
        count: sensors.len(),
        devices: sensors,
    })
}

#[must_use]
pub fn format_scan_text(sensors: &[DiscoveredSensor], opts: &FormatOptions) -> String {
    #[derive(Tabled)]
    struct SensorRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Signal")]
        signal: String,
        #[tabled(rename = "Identifier")]
        identifier: String,
    }

    if sensors.is_empty() {
        return "No sensors found.\n".to_string();
    }

    let rows: Vec<SensorRow> = sensors
        .iter()
        .map(|s| {
            let name = s.name.as_deref().unwrap_or("Unknown");
            SensorRow {
                name: if opts.no_color {
                    name.to_string()
                } else {
                    format!("{}", name.cyan())
                },
                signal: style::format_signal_bar(s.rssi, opts.no_color),
                identifier: s.identifier.clone(),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    style::apply_table_style(&mut table);
    format!("Found {} sensor(s)\n\n{}\n", sensors.len(), table)
}

// ============================================================================
// Live reading
// ============================================================================

pub fn format_reading_json(
    device_id: &str,
    reading: &Reading,
    info: Option<&DeviceInfo>,
    opts: &FormatOptions,
) -> Result<String> {
    #[derive(Serialize)]
    struct ReadingJson<'a> {
        device: &'a str,
        #[serde(flatten)]
        reading: &'a Reading,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<&'a DeviceInfo>,
    }

    opts.as_json(&ReadingJson {
        device: device_id,
        reading,
        info,
    })
}

#[must_use]
pub fn format_reading_text(
    device_id: &str,
    reading: &Reading,
    info: Option<&DeviceInfo>,
    opts: &FormatOptions,
) -> String {
    let mut output = format!("{} {}\n", opts.label("Device:"), device_id);
    if let Some(info) = info {
        output.push_str(&format!(
            "{} {}   {} {}\n",
            opts.label("Battery:"),
            style::format_battery(info.battery, opts.no_color),
            opts.label("Firmware:"),
            info.firmware
        ));
    }
    output.push_str(&format!(
        "{} {:.1}°C\n{} {}%\n{} {} lux\n{} {} µS/cm\n{} {}\n",
        opts.label("Temperature: "),
        reading.temperature,
        opts.label("Moisture:    "),
        reading.moisture,
        opts.label("Light:       "),
        reading.brightness,
        opts.label("Conductivity:"),
        reading.conductivity,
        opts.label("Time:        "),
        format_time(reading.timestamp),
    ));
    output
}

// ============================================================================
// History sync
// ============================================================================

/// Summary printed after a history sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub device: String,
    #[serde(flatten)]
    pub outcome: HistoryOutcome,
    pub stored: u64,
}

pub fn format_sync_json(summary: &SyncSummary, opts: &FormatOptions) -> Result<String> {
    opts.as_json(summary)
}

#[must_use]
pub fn format_sync_text(summary: &SyncSummary, opts: &FormatOptions) -> String {
    let outcome = &summary.outcome;
    let mut output = String::new();

    if outcome.total == 0 {
        output.push_str("Device history is empty\n");
    } else if outcome.resumed_from > 0 {
        output.push_str(&format!(
            "Resumed at entry {} of {}\n",
            outcome.resumed_from, outcome.total
        ));
    }
    output.push_str(&format!("Downloaded: {} entries\n", outcome.retrieved));
    output.push_str(&format!("Stored for {}: {}\n", summary.device, summary.stored));

    if !outcome.skipped.is_empty() {
        let skipped = outcome
            .skipped
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let line = format!("Skipped {} unreadable entries: {}", outcome.skipped.len(), skipped);
        if opts.no_color {
            output.push_str(&line);
        } else {
            output.push_str(&format!("{}", line.yellow()));
        }
        output.push('\n');
    }
    output
}

// ============================================================================
// Background fetch
// ============================================================================

pub fn format_fetch_json(result: &BackgroundFetchResult, opts: &FormatOptions) -> Result<String> {
    #[derive(Serialize)]
    struct FetchJson<'a> {
        successful: Vec<&'a str>,
        failed: Vec<&'a str>,
        total_data_points: usize,
        duration_ms: u128,
    }

    opts.as_json(&FetchJson {
        successful: result.successful.iter().map(String::as_str).collect(),
        failed: result.failed.iter().map(String::as_str).collect(),
        total_data_points: result.total_data_points,
        duration_ms: result.duration.as_millis(),
    })
}

#[must_use]
pub fn format_fetch_text(result: &BackgroundFetchResult, opts: &FormatOptions) -> String {
    let mut output = String::new();
    for device in &result.successful {
        let mark = if opts.no_color {
            "ok".to_string()
        } else {
            format!("{}", "ok".green())
        };
        output.push_str(&format!("  {:<6} {}\n", mark, device));
    }
    for device in &result.failed {
        let mark = if opts.no_color {
            "failed".to_string()
        } else {
            format!("{}", "failed".red())
        };
        output.push_str(&format!("  {:<6} {}\n", mark, device));
    }
    output.push_str(&format!(
        "{} reading(s) from {}/{} device(s) in {:.1}s\n",
        result.total_data_points,
        result.successful.len(),
        result.successful.len() + result.failed.len(),
        result.duration.as_secs_f64()
    ));
    output
}

// ============================================================================
// Stored readings
// ============================================================================

pub fn format_readings_json(readings: &[StoredReading], opts: &FormatOptions) -> Result<String> {
    opts.as_json(&readings)
}

#[must_use]
pub fn format_readings_text(readings: &[StoredReading]) -> String {
    #[derive(Tabled)]
    struct ReadingRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Device")]
        device: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Temp °C")]
        temperature: String,
        #[tabled(rename = "Moisture %")]
        moisture: u8,
        #[tabled(rename = "Light lux")]
        brightness: u32,
        #[tabled(rename = "µS/cm")]
        conductivity: u16,
    }

    if readings.is_empty() {
        return "No stored readings.\n".to_string();
    }

    let rows: Vec<ReadingRow> = readings
        .iter()
        .map(|r| ReadingRow {
            time: format_time(r.captured_at),
            device: r.device_id.clone(),
            kind: match r.history_index {
                Some(index) => format!("{} #{}", r.kind, index),
                None => r.kind.to_string(),
            },
            temperature: format!("{:.1}", r.temperature),
            moisture: r.moisture,
            brightness: r.brightness,
            conductivity: r.conductivity,
        })
        .collect();

    let mut table = Table::new(rows);
    style::apply_table_style(&mut table);
    format!("{}\n", table)
}

// ============================================================================
// Transfer progress
// ============================================================================

pub fn format_progress_json(
    records: &[HistoryLoadingProgress],
    opts: &FormatOptions,
) -> Result<String> {
    opts.as_json(&records)
}

#[must_use]
pub fn format_progress_text(records: &[HistoryLoadingProgress]) -> String {
    if records.is_empty() {
        return "No interrupted transfers.\n".to_string();
    }

    let mut output = String::new();
    for record in records {
        if record.is_consistent() {
            output.push_str(&format!(
                "{}: entry {} of {} ({:.0}%), saved {}\n",
                record.device_id,
                record.current_index,
                record.total_entries,
                record.fraction() * 100.0,
                format_time(record.last_update)
            ));
        } else {
            output.push_str(&format!(
                "{}: unusable record ({}/{}), will restart from entry 0\n",
                record.device_id, record.current_index, record.total_entries
            ));
        }
    }
    output
}
