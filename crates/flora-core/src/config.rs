//! Configuration for sessions, the connection pool and background fetches.
//!
//! Every struct has sensible defaults and `#[must_use]` builder setters,
//! and a `validate()` method that rejects values the session layer cannot
//! work with.
//!
//! ```
//! use std::time::Duration;
//! use flora_core::config::{PoolConfig, TransferOptions};
//!
//! let pool = PoolConfig::default().max_sessions(3);
//! assert!(pool.validate().is_ok());
//!
//! let transfer = TransferOptions::default().entry_spacing(Duration::from_millis(50));
//! assert_eq!(transfer.entry_spacing, Duration::from_millis(50));
//! ```

use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Default timeout for establishing a link.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service and characteristic discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single read request.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a single write.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeouts and handshake retries for one session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for the radio to confirm a connection.
    pub connection_timeout: Duration,
    /// Timeout for service and characteristic discovery.
    pub discovery_timeout: Duration,
    /// Timeout for a read request to be answered.
    pub read_timeout: Duration,
    /// Timeout for a write to complete.
    pub write_timeout: Duration,
    /// Retries for the authentication handshake.
    pub auth_retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            auth_retry: RetryConfig::for_handshake(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the handshake retry policy.
    #[must_use]
    pub fn auth_retry(mut self, retry: RetryConfig) -> Self {
        self.auth_retry = retry;
        self
    }

    /// Check that every timeout is non-zero.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connection_timeout", self.connection_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Thresholds of the loop and stall detection engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDetectionConfig {
    /// Number of progress observations kept for stagnation detection.
    pub window_depth: usize,
    /// Minimum time the index must stay unchanged across the full window.
    pub stagnation_threshold: Duration,
    /// Attempts allowed on one entry before it is skipped.
    pub max_entry_attempts: u32,
    /// Time allowed on one entry before it is skipped.
    pub max_entry_duration: Duration,
    /// Reconnection attempts allowed inside `connection_window`.
    pub max_connection_attempts: usize,
    /// Sliding window for reconnection attempts.
    pub connection_window: Duration,
    /// Consecutive failures that open the circuit breaker.
    pub breaker_threshold: u32,
    /// Time the breaker stays open before allowing a trial.
    pub breaker_cool_down: Duration,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            window_depth: 5,
            stagnation_threshold: Duration::from_secs(30),
            max_entry_attempts: 5,
            max_entry_duration: Duration::from_secs(60),
            max_connection_attempts: 5,
            connection_window: Duration::from_secs(5 * 60),
            breaker_threshold: 5,
            breaker_cool_down: Duration::from_secs(30),
        }
    }
}

impl LoopDetectionConfig {
    /// Set the stagnation window depth.
    #[must_use]
    pub fn window_depth(mut self, depth: usize) -> Self {
        self.window_depth = depth;
        self
    }

    /// Set the stagnation threshold.
    #[must_use]
    pub fn stagnation_threshold(mut self, threshold: Duration) -> Self {
        self.stagnation_threshold = threshold;
        self
    }

    /// Set the per-entry attempt ceiling.
    #[must_use]
    pub fn max_entry_attempts(mut self, attempts: u32) -> Self {
        self.max_entry_attempts = attempts;
        self
    }

    /// Set the per-entry time ceiling.
    #[must_use]
    pub fn max_entry_duration(mut self, duration: Duration) -> Self {
        self.max_entry_duration = duration;
        self
    }

    /// Set the reconnection ceiling and its window.
    #[must_use]
    pub fn connection_limit(mut self, attempts: usize, window: Duration) -> Self {
        self.max_connection_attempts = attempts;
        self.connection_window = window;
        self
    }

    /// Set the breaker threshold and cool-down.
    #[must_use]
    pub fn breaker(mut self, threshold: u32, cool_down: Duration) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_cool_down = cool_down;
        self
    }

    /// Check that windows and thresholds are usable.
    pub fn validate(&self) -> Result<()> {
        if self.window_depth < 2 {
            return Err(Error::invalid_config("window_depth must be at least 2"));
        }
        if self.max_entry_attempts == 0 {
            return Err(Error::invalid_config("max_entry_attempts must be at least 1"));
        }
        if self.max_connection_attempts == 0 {
            return Err(Error::invalid_config(
                "max_connection_attempts must be at least 1",
            ));
        }
        if self.breaker_threshold == 0 {
            return Err(Error::invalid_config("breaker_threshold must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently connected sessions.
    pub max_sessions: usize,
    /// How long a connect may wait for a scan to find the device.
    pub scan_timeout: Duration,
    /// Capacity of each session's event channel.
    pub event_capacity: usize,
    /// Per-session connection settings.
    pub connection: ConnectionConfig,
    /// Per-session loop detection settings.
    pub loop_detection: LoopDetectionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            scan_timeout: Duration::from_secs(20),
            event_capacity: 100,
            connection: ConnectionConfig::default(),
            loop_detection: LoopDetectionConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Set the concurrent session ceiling.
    #[must_use]
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the scan timeout for connects.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the per-session connection settings.
    #[must_use]
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Set the loop detection settings.
    #[must_use]
    pub fn loop_detection(mut self, loop_detection: LoopDetectionConfig) -> Self {
        self.loop_detection = loop_detection;
        self
    }

    /// Validate this config and the nested ones.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::invalid_config("max_sessions must be at least 1"));
        }
        if self.scan_timeout.is_zero() {
            return Err(Error::invalid_config("scan_timeout must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be at least 1"));
        }
        self.connection.validate()?;
        self.loop_detection.validate()
    }
}

/// Options for a history transfer.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Timeout for one address-write/read exchange.
    pub entry_timeout: Duration,
    /// Pause between two successful entries.
    pub entry_spacing: Duration,
    /// Pause before retrying a failed entry.
    pub retry_delay: Duration,
    /// Hard ceiling on the whole transfer.
    pub global_timeout: Duration,
    /// Give skipped entries one more attempt after the main pass.
    pub retry_skipped: bool,
    /// Discard saved progress and start from entry 0.
    pub restart: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            entry_timeout: DEFAULT_READ_TIMEOUT,
            entry_spacing: Duration::from_millis(20),
            retry_delay: Duration::from_millis(200),
            global_timeout: Duration::from_secs(30 * 60),
            retry_skipped: true,
            restart: false,
        }
    }
}

impl TransferOptions {
    /// Set the per-entry timeout.
    #[must_use]
    pub fn entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = timeout;
        self
    }

    /// Set the pause between entries.
    #[must_use]
    pub fn entry_spacing(mut self, spacing: Duration) -> Self {
        self.entry_spacing = spacing;
        self
    }

    /// Set the pause before retrying an entry.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the global ceiling.
    #[must_use]
    pub fn global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    /// Enable or disable the skipped-entry sweep.
    #[must_use]
    pub fn retry_skipped(mut self, enabled: bool) -> Self {
        self.retry_skipped = enabled;
        self
    }

    /// Start from entry 0 regardless of saved progress.
    #[must_use]
    pub fn restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    /// Check the timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.entry_timeout.is_zero() {
            return Err(Error::invalid_config("entry_timeout must be non-zero"));
        }
        if self.global_timeout < self.entry_timeout {
            return Err(Error::invalid_config(
                "global_timeout must not be shorter than entry_timeout",
            ));
        }
        Ok(())
    }
}

/// Options for a bounded background fetch.
#[derive(Debug, Clone)]
pub struct BackgroundOptions {
    /// Hard deadline for the whole run.
    pub deadline: Duration,
    /// Budget for each device.
    pub per_device_timeout: Duration,
    /// Time allowed for the final disconnect sweep.
    pub disconnect_grace: Duration,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(25),
            per_device_timeout: Duration::from_secs(8),
            disconnect_grace: Duration::from_secs(2),
        }
    }
}

impl BackgroundOptions {
    /// Set the run deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the per-device budget.
    #[must_use]
    pub fn per_device_timeout(mut self, timeout: Duration) -> Self {
        self.per_device_timeout = timeout;
        self
    }

    /// Set the disconnect grace period.
    #[must_use]
    pub fn disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Check that the per-device budget fits in the deadline.
    pub fn validate(&self) -> Result<()> {
        if self.deadline.is_zero() || self.per_device_timeout.is_zero() {
            return Err(Error::invalid_config(
                "deadline and per_device_timeout must be non-zero",
            ));
        }
        if self.per_device_timeout > self.deadline {
            return Err(Error::invalid_config(
                "per_device_timeout must not exceed the deadline",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConnectionConfig::default().validate().is_ok());
        assert!(LoopDetectionConfig::default().validate().is_ok());
        assert!(PoolConfig::default().validate().is_ok());
        assert!(TransferOptions::default().validate().is_ok());
        assert!(BackgroundOptions::default().validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_sessions, 5);

        let detection = LoopDetectionConfig::default();
        assert_eq!(detection.window_depth, 5);
        assert_eq!(detection.stagnation_threshold, Duration::from_secs(30));
        assert_eq!(detection.max_entry_attempts, 5);
        assert_eq!(detection.max_entry_duration, Duration::from_secs(60));
        assert_eq!(detection.connection_window, Duration::from_secs(300));

        let transfer = TransferOptions::default();
        assert_eq!(transfer.global_timeout, Duration::from_secs(1800));
        assert_eq!(transfer.entry_spacing, Duration::from_millis(20));

        let background = BackgroundOptions::default();
        assert_eq!(background.deadline, Duration::from_secs(25));
        assert_eq!(background.per_device_timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(PoolConfig::default().max_sessions(0).validate().is_err());
        assert!(
            ConnectionConfig::default()
                .read_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            LoopDetectionConfig::default()
                .window_depth(1)
                .validate()
                .is_err()
        );
        assert!(
            BackgroundOptions::default()
                .per_device_timeout(Duration::from_secs(30))
                .validate()
                .is_err()
        );
        assert!(
            TransferOptions::default()
                .global_timeout(Duration::from_millis(1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_nested_validation() {
        let config = PoolConfig::default()
            .loop_detection(LoopDetectionConfig::default().breaker(0, Duration::from_secs(1)));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("breaker_threshold"));
    }
}
