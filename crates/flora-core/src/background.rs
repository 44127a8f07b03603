//! Deadline-bounded background fetch.
//!
//! A [`BackgroundFetcher`] drives a batch of sessions under a hard wall-clock
//! budget, as needed when the host only grants a short background window.
//! Each device gets its own timeout; whatever is still pending when the
//! deadline passes is recorded as failed, and every session is disconnected
//! before the result is returned.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::config::BackgroundOptions;
use crate::error::{Error, Result, TimeoutScope};
use crate::pool::ConnectionPool;
use crate::traits::ReadingSink;

/// Outcome of one background fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundFetchResult {
    /// Devices that delivered a reading.
    pub successful: BTreeSet<String>,
    /// Devices that failed, timed out or were still pending at the deadline.
    pub failed: BTreeSet<String>,
    /// Readings collected.
    pub total_data_points: usize,
    /// Wall-clock time of the run, including the disconnect sweep.
    pub duration: Duration,
}

impl BackgroundFetchResult {
    /// Whether every requested device succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrator for background fetches. Only one fetch runs per pool at a
/// time, across every fetcher sharing it.
pub struct BackgroundFetcher {
    pool: Arc<ConnectionPool>,
    options: BackgroundOptions,
    sink: Option<Arc<dyn ReadingSink>>,
}

impl BackgroundFetcher {
    /// Create a fetcher over `pool`.
    pub fn new(pool: Arc<ConnectionPool>, options: BackgroundOptions) -> Self {
        Self {
            pool,
            options,
            sink: None,
        }
    }

    /// Store every reading in `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Whether a fetch is in progress on the pool.
    pub fn is_running(&self) -> bool {
        self.pool.is_background_running()
    }

    /// Fetch one live reading from each device before the deadline.
    ///
    /// Returns [`Error::AlreadyRunning`] if another fetch is in progress on
    /// the same pool.
    #[tracing::instrument(level = "info", skip_all, fields(devices = device_ids.len()))]
    pub async fn fetch(&self, device_ids: &[String]) -> Result<BackgroundFetchResult> {
        self.options.validate()?;
        let _running = self.pool.try_begin_background().ok_or(Error::AlreadyRunning)?;

        let started = Instant::now();
        let deadline = started + self.options.deadline;
        let devices: BTreeSet<String> = device_ids.iter().cloned().collect();
        let mut pending = devices.clone();
        let mut result = BackgroundFetchResult::default();

        let mut tasks: FuturesUnordered<_> = devices
            .iter()
            .map(|device_id| self.fetch_one(device_id))
            .collect();
        let expired = sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                next = tasks.next() => match next {
                    Some((device_id, Ok(points))) => {
                        debug!(device_id, "Background fetch succeeded");
                        pending.remove(device_id);
                        result.successful.insert(device_id.to_string());
                        result.total_data_points += points;
                    }
                    Some((device_id, Err(e))) => {
                        warn!(device_id, "Background fetch failed: {}", e);
                        pending.remove(device_id);
                        result.failed.insert(device_id.to_string());
                    }
                    None => break,
                },
                _ = &mut expired => {
                    warn!("Deadline reached with {} device(s) pending", pending.len());
                    break;
                }
            }
        }
        drop(tasks);
        result.failed.extend(pending);

        let sweep = join_all(devices.iter().map(|device_id| self.pool.disconnect(device_id)));
        if timeout(self.options.disconnect_grace, sweep).await.is_err() {
            warn!("Disconnect sweep exceeded {:?}", self.options.disconnect_grace);
        }
        self.pool.stop_scan_if_idle().await;

        result.duration = started.elapsed();
        info!(
            successful = result.successful.len(),
            failed = result.failed.len(),
            duration = ?result.duration,
            "Background fetch finished"
        );
        Ok(result)
    }

    async fn fetch_one<'a>(&self, device_id: &'a str) -> (&'a str, Result<usize>) {
        let budget = self.options.per_device_timeout;
        let outcome = timeout(budget, self.read_device(device_id))
            .await
            .unwrap_or_else(|_| {
                Err(Error::timeout(
                    TimeoutScope::Device,
                    format!("background fetch of {device_id}"),
                    budget,
                ))
            });

        if let Err(e) = self.pool.disconnect(device_id).await {
            debug!(device_id, "Disconnect after fetch failed: {}", e);
        }
        (device_id, outcome)
    }

    async fn read_device(&self, device_id: &str) -> Result<usize> {
        let session = self.pool.connect(device_id).await?;
        let reading = session.read_live().await?;
        if let Some(sink) = &self.sink {
            sink.upsert_device(device_id, None, session.device_info().as_ref())?;
            sink.append_live(device_id, &reading)?;
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serialization() {
        let mut result = BackgroundFetchResult::default();
        result.successful.insert("a".to_string());
        result.failed.insert("b".to_string());
        result.total_data_points = 1;
        result.duration = Duration::from_secs(3);
        assert!(!result.is_complete());

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""successful":["a"]"#));
        assert!(json.contains(r#""failed":["b"]"#));
        let back: BackgroundFetchResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
