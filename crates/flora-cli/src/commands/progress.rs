//! Progress commands - inspect or discard interrupted transfers.

use anyhow::{Context, Result};
use flora_store::Store;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_progress_json, format_progress_text};

pub fn cmd_progress_show(
    store: &Store,
    device: Option<&str>,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<String> {
    let records = match device {
        Some(device) => store
            .load_progress(device)
            .context("Failed to load progress")?
            .into_iter()
            .collect(),
        None => store.list_progress().context("Failed to list progress")?,
    };

    match format {
        OutputFormat::Json => format_progress_json(&records, opts),
        OutputFormat::Text => Ok(format_progress_text(&records)),
    }
}

pub fn cmd_progress_clear(store: &Store, device: &str) -> Result<String> {
    let cleared = store
        .clear_progress(device)
        .context("Failed to clear progress")?;
    Ok(if cleared {
        format!("Cleared saved progress for {}\n", device)
    } else {
        format!("No saved progress for {}\n", device)
    })
}
