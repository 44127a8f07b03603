//! Sync command - download device history into the local database.

use anyhow::{Context, Result};
use flora_core::{
    ConnectionPool, LoadingState, ReadingSink, SessionEvent, TransferOptions,
};
use flora_store::ReadingKind;
use indicatif::ProgressBar;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, SyncSummary, format_sync_json, format_sync_text};
use crate::sink::StoreHandle;
use crate::style;

/// Arguments for the sync command.
pub struct SyncArgs {
    pub device_id: String,
    pub format: OutputFormat,
    pub full: bool,
    pub quiet: bool,
}

/// Execute the sync command.
///
/// Progress is saved after every entry, so an interrupted sync (Ctrl-C, lost
/// link, timeout) resumes where it stopped unless `--full` is given.
pub async fn cmd_sync(
    pool: &ConnectionPool,
    store: &StoreHandle,
    options: TransferOptions,
    args: SyncArgs,
    opts: &FormatOptions,
) -> Result<String> {
    let device_id = args.device_id.as_str();
    let options = options.restart(args.full);
    if args.full {
        info!("Full sync requested, discarding saved progress");
    }

    let session = pool
        .connect(device_id)
        .await
        .with_context(|| format!("Failed to connect to {}", device_id))?;
    store
        .upsert_device(device_id, None, session.device_info().as_ref())
        .context("Failed to record device")?;

    let bar = (!args.quiet && args.format == OutputFormat::Text).then(style::transfer_bar);
    let progress_task = bar.clone().map(|bar| {
        let events = session.subscribe();
        tokio::spawn(follow_progress(events, bar))
    });

    let canceller = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling, progress is kept for the next sync...");
                session.cancel();
            }
        })
    };

    let result = session.sync_history(store, store, &options).await;
    canceller.abort();
    if let Some(task) = progress_task {
        task.abort();
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    if let Err(e) = pool.disconnect(device_id).await {
        debug!(device_id, "Disconnect failed: {}", e);
    }

    let outcome = result.with_context(|| match session.last_transfer() {
        Some(partial) => format!(
            "History sync failed after {} entries ({} skipped); the next sync resumes",
            partial.retrieved,
            partial.skipped.len()
        ),
        None => "History sync failed".to_string(),
    })?;
    let stored = store
        .lock()
        .count_readings(Some(device_id), Some(ReadingKind::History))
        .context("Failed to count stored readings")?;

    let summary = SyncSummary {
        device: device_id.to_string(),
        outcome,
        stored,
    };
    match args.format {
        OutputFormat::Json => format_sync_json(&summary, opts),
        OutputFormat::Text => Ok(format_sync_text(&summary, opts)),
    }
}

async fn follow_progress(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    bar: ProgressBar,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Progress { current, total, .. }) => {
                bar.set_length(u64::from(total));
                bar.set_position(u64::from(current));
            }
            Ok(SessionEvent::Warning { message, .. }) => bar.println(message),
            Ok(SessionEvent::Loading {
                state: LoadingState::Loading,
                ..
            }) => bar.set_message("Downloading history..."),
            Ok(SessionEvent::Loading { .. }) => break,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}
