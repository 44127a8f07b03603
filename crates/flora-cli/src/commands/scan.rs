//! Scan command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use flora_core::{ConnectionPool, ReadingSink};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_scan_json, format_scan_text};
use crate::sink::StoreHandle;
use crate::style;

pub async fn cmd_scan(
    pool: &ConnectionPool,
    store: &StoreHandle,
    duration: Duration,
    format: OutputFormat,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<String> {
    let spinner = (!quiet && format == OutputFormat::Text).then(|| {
        style::spinner(format!(
            "Scanning for sensors... ({}s)",
            duration.as_secs()
        ))
    });

    let sensors = pool.scan(duration).await;
    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }
    let sensors = sensors.context("Failed to scan for sensors")?;

    for sensor in &sensors {
        store
            .upsert_device(&sensor.identifier, sensor.name.as_deref(), None)
            .context("Failed to record discovered sensor")?;
    }

    match format {
        OutputFormat::Json => format_scan_json(&sensors, opts),
        OutputFormat::Text => Ok(format_scan_text(&sensors, opts)),
    }
}
