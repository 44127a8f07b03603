//! The radio capability consumed by the session layer.
//!
//! The platform radio is modelled as a request API plus a single event
//! stream. Requests (`connect`, `read`, ...) return once they have been
//! issued; their outcome arrives later as a [`RadioEvent`]. A read, for
//! example, completes with a [`RadioEvent::ValueUpdated`] carrying the
//! characteristic value.
//!
//! The event stream is taken exactly once, by the
//! [`ConnectionPool`](crate::pool::ConnectionPool), which routes each event
//! to the session owning the peripheral.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Platform handle of a peripheral.
///
/// On Linux and Windows this is the Bluetooth address; on macOS it is the
/// CoreBluetooth UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Callbacks delivered by the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// The adapter was powered on or off.
    AdapterStateChanged {
        /// Whether the adapter can be used.
        powered: bool,
    },
    /// A peripheral matching the scan filter advertised.
    Discovered {
        /// Handle to connect to.
        peripheral: PeripheralId,
        /// Bluetooth address, all zeros where the platform hides it.
        address: String,
        /// Advertised local name.
        name: Option<String>,
        /// Signal strength.
        rssi: Option<i16>,
    },
    /// A requested connection was established.
    Connected {
        /// The connected peripheral.
        peripheral: PeripheralId,
    },
    /// A requested connection could not be established.
    ConnectFailed {
        /// The peripheral.
        peripheral: PeripheralId,
        /// Platform reason.
        reason: String,
    },
    /// The link to a peripheral went down.
    Disconnected {
        /// The peripheral.
        peripheral: PeripheralId,
        /// Platform reason, absent for requested disconnects.
        reason: Option<String>,
    },
    /// A characteristic value arrived, in answer to a read or unsolicited.
    ValueUpdated {
        /// The peripheral.
        peripheral: PeripheralId,
        /// Characteristic the value belongs to.
        characteristic: Uuid,
        /// Raw value.
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// The peripheral this event concerns, if any.
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            RadioEvent::AdapterStateChanged { .. } => None,
            RadioEvent::Discovered { peripheral, .. }
            | RadioEvent::Connected { peripheral }
            | RadioEvent::ConnectFailed { peripheral, .. }
            | RadioEvent::Disconnected { peripheral, .. }
            | RadioEvent::ValueUpdated { peripheral, .. } => Some(peripheral),
        }
    }
}

/// Sending half of a radio event stream.
pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;

/// Receiving half of a radio event stream.
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Create a radio event stream.
pub fn radio_channel() -> (RadioEventSender, RadioEventReceiver) {
    mpsc::unbounded_channel()
}

/// The platform radio as seen by the session layer.
///
/// Implemented by [`BtleplugRadio`](crate::btle::BtleplugRadio) for real
/// hardware and [`MockRadio`](crate::mock::MockRadio) for tests.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Take the event stream. Returns `None` once it has been taken.
    fn take_events(&self) -> Option<RadioEventReceiver>;

    /// Whether the adapter is powered on.
    async fn is_powered(&self) -> Result<bool>;

    /// Start scanning for peripherals advertising any of `services`.
    async fn start_scan(&self, services: &[Uuid]) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Request a connection; the outcome arrives as `Connected` or
    /// `ConnectFailed`.
    async fn connect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Request a disconnect; completion arrives as `Disconnected`.
    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Discover the services of a connected peripheral.
    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<Uuid>>;

    /// Discover the characteristics of one service.
    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Vec<Uuid>>;

    /// Write a value, waiting for the write response.
    async fn write(&self, peripheral: &PeripheralId, characteristic: Uuid, value: &[u8])
    -> Result<()>;

    /// Request a read; the value arrives as `ValueUpdated`.
    async fn read(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_id_display() {
        let id = PeripheralId::new("C4:7C:8D:6A:3E:11");
        assert_eq!(id.to_string(), "C4:7C:8D:6A:3E:11");
        assert_eq!(id.as_str(), "C4:7C:8D:6A:3E:11");
        assert_eq!(PeripheralId::from("C4:7C:8D:6A:3E:11"), id);
    }

    #[test]
    fn test_event_peripheral() {
        let id = PeripheralId::new("A");
        let event = RadioEvent::ValueUpdated {
            peripheral: id.clone(),
            characteristic: flora_types::uuid::LIVE_DATA,
            value: vec![1, 2],
        };
        assert_eq!(event.peripheral(), Some(&id));
        assert_eq!(
            RadioEvent::AdapterStateChanged { powered: false }.peripheral(),
            None
        );
    }
}
