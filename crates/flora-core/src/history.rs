//! Resumable history transfer.
//!
//! The sensor keeps a log of up to 65535 entries addressed by index. A
//! transfer switches the history characteristic into count mode, reads the
//! device clock and the entry count, then walks the log one entry at a time:
//! write the address command, wait for the value, decode, store, persist
//! progress.
//!
//! Progress is written after every entry, so a dropped link or a killed
//! process loses at most the entry in flight. The record also lists the
//! entries skipped so far; a resumed transfer carries them into its final
//! sweep. The next transfer validates the saved record against the count
//! the device reports and resumes from it, or starts over when the log
//! changed.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flora_types::codec::{
    HISTORY_MODE_COMMAND, boot_epoch, decode_device_boot_offset, decode_entry_count,
    decode_history_entry, encode_history_address_command,
};
use flora_types::{CharacteristicRole, HistoricalReading, HistoryLoadingProgress, ProgressRejection};

use crate::config::TransferOptions;
use crate::detector::RecoveryAction;
use crate::error::{Error, Result, TimeoutScope};
use crate::events::{LoadingState, SessionEvent};
use crate::session::DeviceSession;
use crate::traits::{ProgressStore, ReadingSink};

/// Summary of a finished history transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryOutcome {
    /// Entry count reported by the device.
    pub total: u16,
    /// Index the transfer started from.
    pub resumed_from: u16,
    /// Entries stored during this transfer.
    pub retrieved: u32,
    /// Entries given up on, in ascending order.
    pub skipped: Vec<u16>,
}

impl HistoryOutcome {
    fn empty() -> Self {
        Self {
            total: 0,
            resumed_from: 0,
            retrieved: 0,
            skipped: Vec::new(),
        }
    }

    /// Whether every entry was stored.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Failures the loop detector may retry or skip. Anything else aborts the
/// transfer.
fn is_entry_failure(error: &Error) -> bool {
    matches!(
        error,
        Error::Decode { .. }
            | Error::Timeout {
                scope: TimeoutScope::Entry,
                ..
            }
    )
}

struct Transfer<'a> {
    progress: &'a dyn ProgressStore,
    sink: &'a dyn ReadingSink,
    options: &'a TransferOptions,
    token: &'a CancellationToken,
    total: u16,
    boot: OffsetDateTime,
}

impl DeviceSession {
    /// Download the history log, resuming from saved progress when it is
    /// still valid.
    ///
    /// Entries that keep failing are skipped and reported in
    /// [`HistoryOutcome::skipped`]. The whole transfer is bounded by
    /// [`TransferOptions::global_timeout`]; when it runs out the session is
    /// disconnected and a global [`Error::Timeout`] is returned.
    #[tracing::instrument(level = "info", skip_all, fields(device_id = %self.device_id()))]
    pub async fn sync_history(
        &self,
        progress: &dyn ProgressStore,
        sink: &dyn ReadingSink,
        options: &TransferOptions,
    ) -> Result<HistoryOutcome> {
        options.validate()?;
        let _op = self.lock_operations().await;
        self.require_authenticated("sync history")?;
        let token = self.operation_token();

        self.emit_loading(LoadingState::Loading);
        let deadline = Instant::now() + options.global_timeout;
        let mut outcome = HistoryOutcome::empty();
        let run = timeout_at(
            deadline,
            self.transfer(progress, sink, options, &token, &mut outcome),
        )
        .await;
        let result = match run {
            Ok(result) => result,
            Err(_) => {
                let _ = self.disconnect().await;
                Err(Error::timeout(
                    TimeoutScope::Global,
                    "history transfer",
                    options.global_timeout,
                ))
            }
        };
        self.record_transfer(outcome.clone());

        match result {
            Ok(()) => {
                self.emit_loading(LoadingState::Completed {
                    retrieved: outcome.retrieved,
                    skipped: outcome.skipped.len() as u32,
                });
                Ok(outcome)
            }
            Err(Error::Cancelled) => {
                info!(retrieved = outcome.retrieved, "History transfer cancelled");
                self.emit_loading(LoadingState::Cancelled);
                Err(Error::Cancelled)
            }
            Err(e) => {
                warn!(
                    retrieved = outcome.retrieved,
                    skipped = outcome.skipped.len(),
                    "History transfer failed: {}",
                    e
                );
                self.emit_loading(LoadingState::Error {
                    message: e.to_string(),
                    retrieved: outcome.retrieved,
                    skipped: outcome.skipped.len() as u32,
                });
                Err(e)
            }
        }
    }

    fn emit_loading(&self, state: LoadingState) {
        self.emit(SessionEvent::Loading {
            device_id: self.device_id().to_string(),
            state,
        });
    }

    async fn transfer(
        &self,
        progress: &dyn ProgressStore,
        sink: &dyn ReadingSink,
        options: &TransferOptions,
        token: &CancellationToken,
        outcome: &mut HistoryOutcome,
    ) -> Result<()> {
        let read_timeout = self.config().read_timeout;
        self.detector().reset_transfer();

        self.write_role(CharacteristicRole::HistoryControl, &HISTORY_MODE_COMMAND, token)
            .await?;

        let clock = self
            .request(
                CharacteristicRole::DeviceTime,
                read_timeout,
                TimeoutScope::Entry,
                "read device time",
                token,
            )
            .await?;
        let boot = boot_epoch(OffsetDateTime::now_utc(), decode_device_boot_offset(&clock)?);
        self.set_boot_epoch(boot);

        let count = self
            .request(
                CharacteristicRole::HistoryData,
                read_timeout,
                TimeoutScope::Entry,
                "read entry count",
                token,
            )
            .await?;
        let total = match decode_entry_count(&count) {
            Ok(total) => total,
            Err(e) => {
                self.emit_warning(format!("Unreadable entry count ({e}), treating log as empty"));
                0
            }
        };

        if total == 0 {
            progress.clear(self.device_id())?;
            self.set_transfer_position(0, 0);
            info!("No history entries on device");
            return Ok(());
        }

        let (start, carried) = self.resume_point(progress, total, options.restart)?;
        info!(start, total, carried = carried.len(), "Starting history transfer");
        self.set_transfer_position(start, total);
        self.emit(SessionEvent::Progress {
            device_id: self.device_id().to_string(),
            current: start,
            total,
        });

        let transfer = Transfer {
            progress,
            sink,
            options,
            token,
            total,
            boot,
        };
        *outcome = HistoryOutcome {
            total,
            resumed_from: start,
            retrieved: 0,
            skipped: carried,
        };

        for index in start..total {
            if self.process_entry(&transfer, index).await? {
                outcome.retrieved += 1;
            } else {
                outcome.skipped.push(index);
            }
            self.save_position(&transfer, index + 1, &outcome.skipped)?;
        }

        if options.retry_skipped && !outcome.skipped.is_empty() {
            self.sweep_skipped(&transfer, outcome).await?;
        }

        progress.clear(self.device_id())?;
        info!(
            retrieved = outcome.retrieved,
            skipped = outcome.skipped.len(),
            "History transfer complete"
        );
        Ok(())
    }

    /// Where to start, plus the entries an interrupted run skipped before
    /// that point.
    fn resume_point(
        &self,
        progress: &dyn ProgressStore,
        total: u16,
        restart: bool,
    ) -> Result<(u16, Vec<u16>)> {
        let device_id = self.device_id();
        if restart {
            progress.clear(device_id)?;
            return Ok((0, Vec::new()));
        }
        let Some(saved) = progress.load(device_id)? else {
            return Ok((0, Vec::new()));
        };

        match saved.validate(total) {
            Ok(index) => {
                let carried = saved.skipped_before(index);
                info!(
                    "Resuming history at {}/{} with {} skipped entries",
                    index,
                    total,
                    carried.len()
                );
                Ok((index, carried))
            }
            Err(ProgressRejection::Corrupt) => {
                self.emit_warning(format!(
                    "Discarding corrupt progress ({}/{})",
                    saved.current_index, saved.total_entries
                ));
                progress.clear(device_id)?;
                Ok((0, Vec::new()))
            }
            Err(ProgressRejection::Stale { saved, fresh }) => {
                let stale = Error::StaleProgress { saved, fresh };
                self.emit_warning(format!("{stale}, restarting from 0"));
                progress.clear(device_id)?;
                Ok((0, Vec::new()))
            }
        }
    }

    /// Fetch and store `index`. Returns `false` when the entry was skipped.
    async fn process_entry(&self, transfer: &Transfer<'_>, index: u16) -> Result<bool> {
        loop {
            if transfer.token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let stalled = self.detector().on_progress(index, Instant::now());
            if stalled == Some(RecoveryAction::Skip) {
                self.emit_warning(format!("History stalled at entry {index}, skipping"));
                return Ok(false);
            }

            let failure = match self.fetch_entry(index, transfer).await {
                Ok(entry) => {
                    self.detector().on_entry_success(index);
                    self.store_entry(transfer, index, &entry)?;
                    pause(transfer.options.entry_spacing, transfer.token).await?;
                    return Ok(true);
                }
                Err(e) if is_entry_failure(&e) => e,
                Err(e) => return Err(e),
            };

            let action = self.detector().on_entry_failure(index, Instant::now());
            match action {
                RecoveryAction::Retry => {
                    debug!("Entry {} failed ({}), retrying", index, failure);
                    pause(transfer.options.retry_delay, transfer.token).await?;
                }
                _ => {
                    self.emit_warning(format!("Skipping entry {index}: {failure}"));
                    return Ok(false);
                }
            }
        }
    }

    /// Give each skipped entry one more attempt. The saved record keeps
    /// whatever is still missing.
    async fn sweep_skipped(
        &self,
        transfer: &Transfer<'_>,
        outcome: &mut HistoryOutcome,
    ) -> Result<()> {
        debug!("Retrying {} skipped entries", outcome.skipped.len());
        let pending = std::mem::take(&mut outcome.skipped);

        for (position, &index) in pending.iter().enumerate() {
            if transfer.token.is_cancelled() {
                outcome.skipped.extend_from_slice(&pending[position..]);
                return Err(Error::Cancelled);
            }
            match self.fetch_entry(index, transfer).await {
                Ok(entry) => {
                    self.store_entry(transfer, index, &entry)?;
                    outcome.retrieved += 1;
                    let mut remaining = outcome.skipped.clone();
                    remaining.extend_from_slice(&pending[position + 1..]);
                    self.save_position(transfer, transfer.total, &remaining)?;
                    pause(transfer.options.entry_spacing, transfer.token).await?;
                }
                Err(e) if is_entry_failure(&e) => {
                    debug!("Entry {} still failing: {}", index, e);
                    outcome.skipped.push(index);
                }
                Err(e) => {
                    outcome.skipped.extend_from_slice(&pending[position..]);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn fetch_entry(&self, index: u16, transfer: &Transfer<'_>) -> Result<HistoricalReading> {
        self.write_role(
            CharacteristicRole::HistoryControl,
            &encode_history_address_command(index),
            transfer.token,
        )
        .await?;
        let bytes = self
            .request(
                CharacteristicRole::HistoryData,
                transfer.options.entry_timeout,
                TimeoutScope::Entry,
                "read history entry",
                transfer.token,
            )
            .await?;
        decode_history_entry(&bytes).map_err(|e| Error::decode_at(index, e))
    }

    /// Hand a decoded entry to the sink.
    fn store_entry(
        &self,
        transfer: &Transfer<'_>,
        index: u16,
        entry: &HistoricalReading,
    ) -> Result<()> {
        let device_id = self.device_id();
        let reading = entry.to_reading(transfer.boot);
        transfer.sink.append_history(device_id, index, &reading)?;

        self.emit(SessionEvent::HistoricalReading {
            device_id: device_id.to_string(),
            index,
            reading,
        });
        Ok(())
    }

    /// Persist the cursor together with the entries still missing before it.
    fn save_position(&self, transfer: &Transfer<'_>, next: u16, skipped: &[u16]) -> Result<()> {
        let device_id = self.device_id();
        transfer.progress.save(
            &HistoryLoadingProgress::new(device_id, next, transfer.total, Some(transfer.boot))
                .with_skipped(skipped),
        )?;
        self.set_transfer_position(next, transfer.total);
        self.emit(SessionEvent::Progress {
            device_id: device_id.to_string(),
            current: next,
            total: transfer.total,
        });
        Ok(())
    }
}

async fn pause(duration: std::time::Duration, token: &CancellationToken) -> Result<()> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flora_types::ParseError;
    use std::time::Duration;

    #[test]
    fn test_entry_failure_classification() {
        assert!(is_entry_failure(&Error::decode_at(
            3,
            ParseError::invalid_length("history entry", 16, 2)
        )));
        assert!(is_entry_failure(&Error::timeout(
            TimeoutScope::Entry,
            "read history entry",
            Duration::from_secs(5)
        )));
        assert!(!is_entry_failure(&Error::timeout(
            TimeoutScope::Global,
            "history transfer",
            Duration::from_secs(1800)
        )));
        assert!(!is_entry_failure(&Error::Disconnected("gone".into())));
        assert!(!is_entry_failure(&Error::Cancelled));
    }

    #[test]
    fn test_outcome_completeness() {
        let mut outcome = HistoryOutcome::empty();
        assert!(outcome.is_complete());
        outcome.skipped.push(4);
        assert!(!outcome.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            pause(Duration::from_secs(10), &token).await,
            Err(Error::Cancelled)
        ));
        assert!(pause(Duration::ZERO, &token).await.is_ok());
    }
}
