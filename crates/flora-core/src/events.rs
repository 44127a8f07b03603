//! Session event system.
//!
//! Every [`DeviceSession`](crate::session::DeviceSession) publishes its
//! connection state on a `watch` channel and everything else (readings,
//! transfer progress, warnings) on a broadcast channel of
//! [`SessionEvent`]s.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use flora_types::{DeviceInfo, Reading};

use crate::session::SessionState;

/// State of a history transfer as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingState {
    /// No transfer running.
    Idle,
    /// Transfer in progress.
    Loading,
    /// Transfer finished.
    Completed {
        /// Entries stored.
        retrieved: u32,
        /// Entries given up on.
        skipped: u32,
    },
    /// Transfer failed. The counts cover what was done before the failure.
    Error {
        message: String,
        /// Entries stored before the failure.
        retrieved: u32,
        /// Entries given up on before the failure.
        skipped: u32,
    },
    /// Transfer was cancelled.
    Cancelled,
}

/// Events published by a session.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// Connection state changed.
    StateChanged {
        device_id: String,
        state: SessionState,
    },
    /// Battery and firmware read during the handshake.
    DeviceInfo { device_id: String, info: DeviceInfo },
    /// A live reading was decoded.
    LiveReading { device_id: String, reading: Reading },
    /// A history entry was decoded and stored.
    HistoricalReading {
        device_id: String,
        index: u16,
        reading: Reading,
    },
    /// History transfer progress, `current` entries of `total` done.
    Progress {
        device_id: String,
        current: u16,
        total: u16,
    },
    /// History transfer state changed.
    Loading {
        device_id: String,
        state: LoadingState,
    },
    /// A problem was recovered from locally.
    Warning { device_id: String, message: String },
}

impl SessionEvent {
    /// The device this event belongs to.
    pub fn device_id(&self) -> &str {
        match self {
            SessionEvent::StateChanged { device_id, .. }
            | SessionEvent::DeviceInfo { device_id, .. }
            | SessionEvent::LiveReading { device_id, .. }
            | SessionEvent::HistoricalReading { device_id, .. }
            | SessionEvent::Progress { device_id, .. }
            | SessionEvent::Loading { device_id, .. }
            | SessionEvent::Warning { device_id, .. } => device_id,
        }
    }
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
