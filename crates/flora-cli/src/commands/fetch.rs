//! Fetch command - one bounded background pass over several devices.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use flora_core::{BackgroundFetcher, BackgroundOptions, ConnectionPool};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_fetch_json, format_fetch_text};
use crate::sink::StoreHandle;
use crate::style;

pub async fn cmd_fetch(
    pool: Arc<ConnectionPool>,
    store: Arc<StoreHandle>,
    options: BackgroundOptions,
    devices: &[String],
    format: OutputFormat,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<String> {
    if devices.is_empty() {
        bail!(
            "No devices to fetch. Use --device <ID> (repeatable) or list devices in the config file."
        );
    }

    let spinner = (!quiet && format == OutputFormat::Text).then(|| {
        style::spinner(format!(
            "Fetching {} device(s) within {}s...",
            devices.len(),
            options.deadline.as_secs()
        ))
    });

    let fetcher = BackgroundFetcher::new(pool, options).with_sink(store);
    let result = fetcher.fetch(devices).await;
    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }
    let result = result.context("Background fetch failed")?;

    match format {
        OutputFormat::Json => format_fetch_json(&result, opts),
        OutputFormat::Text => Ok(format_fetch_text(&result, opts)),
    }
}
