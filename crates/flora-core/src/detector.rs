//! Loop and stall detection.
//!
//! A session runs every history attempt and every reconnection past a
//! [`LoopDetector`], which combines four independent trackers:
//!
//! - [`StagnationTracker`]: progress keeps being reported while the index
//!   does not move.
//! - [`EntryAttemptTracker`]: one entry keeps failing.
//! - [`ConnectionLoopTracker`]: the device keeps reconnecting.
//! - [`CircuitBreaker`]: consecutive connection failures.
//!
//! All trackers take the current [`Instant`] as an argument so they can be
//! driven deterministically in tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::LoopDetectionConfig;

/// What the session should do after a detector verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Try the same operation again.
    Retry,
    /// Give up on the current entry and move on.
    Skip,
    /// Stop reconnecting and stay passive.
    StopReconnecting,
    /// Abort the run.
    Abort,
}

/// Detects an index that stays unchanged across the observation window.
///
/// The elapsed time is measured from the first observation of the current
/// index, not from the oldest observation still in the window.
#[derive(Debug, Clone)]
pub struct StagnationTracker {
    depth: usize,
    threshold: Duration,
    run: Option<Run>,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    index: u16,
    since: Instant,
    observations: usize,
}

impl StagnationTracker {
    /// Create a tracker needing `depth` consecutive observations.
    pub fn new(depth: usize, threshold: Duration) -> Self {
        Self {
            depth,
            threshold,
            run: None,
        }
    }

    /// Record an observation of `index`. Returns `true` once the last
    /// `depth` observations all saw `index` and more than the threshold has
    /// passed since it was first seen.
    pub fn observe(&mut self, index: u16, now: Instant) -> bool {
        let run = match self.run {
            Some(run) if run.index == index => Run {
                observations: run.observations + 1,
                ..run
            },
            _ => Run {
                index,
                since: now,
                observations: 1,
            },
        };
        self.run = Some(run);
        run.observations >= self.depth && now.duration_since(run.since) > self.threshold
    }

    /// Forget all observations.
    pub fn reset(&mut self) {
        self.run = None;
    }
}

/// Verdict on a failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryVerdict {
    /// Still within both ceilings.
    WithinLimits {
        /// Attempts made so far.
        attempts: u32,
    },
    /// More attempts than allowed.
    TooManyAttempts {
        /// Attempts made so far.
        attempts: u32,
    },
    /// The entry has been tried for too long.
    TimedOut {
        /// Time since the first attempt.
        elapsed: Duration,
    },
}

/// Counts attempts per history entry.
#[derive(Debug, Clone)]
pub struct EntryAttemptTracker {
    max_attempts: u32,
    max_duration: Duration,
    attempts: HashMap<u16, (u32, Instant)>,
}

impl EntryAttemptTracker {
    /// Create a tracker allowing `max_attempts` within `max_duration`.
    pub fn new(max_attempts: u32, max_duration: Duration) -> Self {
        Self {
            max_attempts,
            max_duration,
            attempts: HashMap::new(),
        }
    }

    /// Record one attempt on `index`.
    pub fn record_attempt(&mut self, index: u16, now: Instant) -> EntryVerdict {
        let (count, first) = self.attempts.entry(index).or_insert((0, now));
        *count += 1;

        if *count > self.max_attempts {
            return EntryVerdict::TooManyAttempts { attempts: *count };
        }
        let elapsed = now.duration_since(*first);
        if elapsed > self.max_duration {
            return EntryVerdict::TimedOut { elapsed };
        }
        EntryVerdict::WithinLimits { attempts: *count }
    }

    /// Attempts recorded for `index`.
    pub fn attempts(&self, index: u16) -> u32 {
        self.attempts.get(&index).map_or(0, |(count, _)| *count)
    }

    /// Forget `index`, typically after it succeeded or was skipped.
    pub fn clear(&mut self, index: u16) {
        self.attempts.remove(&index);
    }

    /// Forget every entry.
    pub fn reset(&mut self) {
        self.attempts.clear();
    }
}

/// Counts reconnection attempts in a sliding window.
#[derive(Debug, Clone)]
pub struct ConnectionLoopTracker {
    max_attempts: usize,
    window: Duration,
    attempts: VecDeque<Instant>,
}

impl ConnectionLoopTracker {
    /// Create a tracker allowing `max_attempts` per `window`.
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: VecDeque::new(),
        }
    }

    /// Record an attempt. Returns `true` when the window now holds more
    /// attempts than allowed.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.attempts.front() {
            if now.duration_since(oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        self.attempts.push_back(now);
        self.attempts.len() > self.max_attempts
    }

    /// Attempts currently inside the window.
    pub fn attempts(&self) -> usize {
        self.attempts.len()
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Operations flow normally.
    Closed,
    /// Operations are rejected until the cool-down elapses.
    Open,
    /// One trial operation is allowed.
    HalfOpen,
}

/// Closed/open/half-open guard over consecutive failures.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cool_down: Duration,
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Create a breaker opening after `threshold` consecutive failures.
    pub fn new(threshold: u32, cool_down: Duration) -> Self {
        Self {
            threshold,
            cool_down,
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }

    /// Current state, moving from open to half-open once the cool-down has
    /// elapsed.
    pub fn state(&mut self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open
            && self
                .last_failure
                .is_some_and(|at| now.duration_since(at) >= self.cool_down)
        {
            self.state = CircuitState::HalfOpen;
            self.trial_in_flight = false;
        }
        self.state
    }

    /// Ask to run an operation. In half-open state only one caller is let
    /// through until its outcome is recorded.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state(now) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a success: the breaker closes and the failure count resets.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.trial_in_flight = false;
    }

    /// Record a failure.
    pub fn record_failure(&mut self, now: Instant) {
        self.failures += 1;
        self.last_failure = Some(now);
        self.trial_in_flight = false;

        match self.state {
            CircuitState::HalfOpen => self.state = CircuitState::Open,
            CircuitState::Closed if self.failures >= self.threshold => {
                self.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Consecutive failures recorded.
    pub fn failure_count(&self) -> u32 {
        self.failures
    }
}

/// Per-session combination of all trackers.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    stagnation: StagnationTracker,
    entries: EntryAttemptTracker,
    connections: ConnectionLoopTracker,
    breaker: CircuitBreaker,
}

impl LoopDetector {
    /// Create a detector from configuration.
    pub fn new(config: &LoopDetectionConfig) -> Self {
        Self {
            stagnation: StagnationTracker::new(config.window_depth, config.stagnation_threshold),
            entries: EntryAttemptTracker::new(
                config.max_entry_attempts,
                config.max_entry_duration,
            ),
            connections: ConnectionLoopTracker::new(
                config.max_connection_attempts,
                config.connection_window,
            ),
            breaker: CircuitBreaker::new(config.breaker_threshold, config.breaker_cool_down),
        }
    }

    /// Observe that the transfer is about to work on `index`.
    ///
    /// Returns [`RecoveryAction::Skip`] when progress has stagnated.
    pub fn on_progress(&mut self, index: u16, now: Instant) -> Option<RecoveryAction> {
        if self.stagnation.observe(index, now) {
            self.stagnation.reset();
            self.entries.clear(index);
            return Some(RecoveryAction::Skip);
        }
        None
    }

    /// Decide what to do after `index` failed.
    pub fn on_entry_failure(&mut self, index: u16, now: Instant) -> RecoveryAction {
        match self.entries.record_attempt(index, now) {
            EntryVerdict::WithinLimits { .. } => RecoveryAction::Retry,
            EntryVerdict::TooManyAttempts { .. } | EntryVerdict::TimedOut { .. } => {
                self.entries.clear(index);
                RecoveryAction::Skip
            }
        }
    }

    /// Record that `index` was fetched.
    pub fn on_entry_success(&mut self, index: u16) {
        self.entries.clear(index);
    }

    /// Gate a connection attempt.
    ///
    /// Returns `Err(action)` when the attempt must not be made:
    /// [`RecoveryAction::Abort`] while the breaker is open,
    /// [`RecoveryAction::StopReconnecting`] when a connection loop is
    /// detected.
    pub fn begin_connection(&mut self, now: Instant) -> Result<(), RecoveryAction> {
        if !self.breaker.allow(now) {
            return Err(RecoveryAction::Abort);
        }
        if self.connections.record(now) {
            // the granted half-open trial is spent
            self.breaker.record_failure(now);
            return Err(RecoveryAction::StopReconnecting);
        }
        Ok(())
    }

    /// Record the outcome of a connection attempt.
    pub fn end_connection(&mut self, success: bool, now: Instant) {
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure(now);
        }
    }

    /// Clear transfer-scoped state before a new history transfer.
    pub fn reset_transfer(&mut self) {
        self.stagnation.reset();
        self.entries.reset();
    }

    /// Reconnection attempts inside the current window.
    pub fn connection_attempts(&self) -> usize {
        self.connections.attempts()
    }

    /// Breaker state.
    pub fn circuit_state(&mut self, now: Instant) -> CircuitState {
        self.breaker.state(now)
    }
}
