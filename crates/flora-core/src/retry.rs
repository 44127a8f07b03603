//! Backoff and retry for transient radio operations.
//!
//! Only used around short request/response exchanges (the authentication
//! handshake). History entries have their own accounting in the
//! [`LoopDetector`](crate::detector::LoopDetector).
//!
//! # Example
//!
//! ```
//! use flora_core::{Error, RetryConfig, with_retry};
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::new(3);
//!
//! let value = with_retry(&config, "read firmware", || async {
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay, before jitter.
    pub max_delay: Duration,
    /// Random extra delay as a fraction of the computed one, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Default backoff with `retries` retries.
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    /// Sensors are often slow to answer the first read after a connect;
    /// two short retries cover it.
    pub fn for_handshake() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
            jitter: 0.25,
        }
    }

    /// Set the number of retries.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the first delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Delays to wait before each retry, in order.
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            retry: 0,
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        let doubled = self
            .base_delay
            .checked_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        let capped = doubled.min(self.max_delay);
        if self.jitter > 0.0 {
            capped.mul_f64(1.0 + rand::rng().random_range(0.0..=self.jitter))
        } else {
            capped
        }
    }
}

/// Iterator over the retry delays of a [`RetryConfig`].
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    retry: u32,
}

impl Iterator for Backoff<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry >= self.config.retries {
            return None;
        }
        let delay = self.config.delay(self.retry);
        self.retry += 1;
        Some(delay)
    }
}

/// Run `operation`, retrying errors for which
/// [`Error::is_retryable`](crate::Error::is_retryable) holds until the
/// backoff is exhausted. Other errors are returned at once.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(config, operation, Error::is_retryable, op).await
}

/// Like [`with_retry`], with the caller deciding which errors are worth
/// another attempt.
pub async fn with_retry_if<F, Fut, T, P>(
    config: &RetryConfig,
    operation: &str,
    should_retry: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut backoff = config.backoff();
    let mut attempt = 1u32;

    loop {
        let error = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => e,
        };

        let Some(delay) = backoff.next() else {
            return Err(error);
        };
        warn!(operation, attempt, ?delay, "Retrying after error: {}", error);
        attempt += 1;
        sleep(delay).await;
    }
}
