//! Readings command - list what the local database holds.

use anyhow::{Context, Result};
use flora_store::{ReadingKind, ReadingQuery, Store};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_readings_json, format_readings_text};

pub fn cmd_readings(
    store: &Store,
    device: Option<&str>,
    kind: Option<ReadingKind>,
    limit: u32,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<String> {
    let mut query = ReadingQuery::new().limit(limit);
    if let Some(device) = device {
        query = query.device(device);
    }
    if let Some(kind) = kind {
        query = query.kind(kind);
    }

    let readings = store
        .query_readings(&query)
        .context("Failed to query readings")?;

    match format {
        OutputFormat::Json => format_readings_json(&readings, opts),
        OutputFormat::Text => Ok(format_readings_text(&readings)),
    }
}
