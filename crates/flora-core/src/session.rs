//! Per-device session state machine.
//!
//! A [`DeviceSession`] is the long-lived relationship with one sensor. It
//! survives any number of radio connections: every connect walks
//! `disconnected → connecting → connected → authenticated`, and any failure
//! or unexpected link loss goes through `error(reason)` back to
//! `disconnected`.
//!
//! Sessions are created and owned by the
//! [`ConnectionPool`](crate::pool::ConnectionPool), which resolves the
//! peripheral and feeds every radio callback into
//! [`DeviceSession::handle_radio_event`]. Callers observe the session
//! through [`DeviceSession::watch_state`] and [`DeviceSession::subscribe`].
//!
//! Session fields live behind a short synchronous lock that is never held
//! across an `.await`. Protocol operations on one session are serialized by
//! an async operation lock, so requests are never pipelined.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flora_types::codec::{MODE_CHANGE_COMMAND, decode_firmware_battery, decode_live_reading};
use flora_types::uuid::{DATA_SERVICE, HISTORY_SERVICE};
use flora_types::{CharacteristicRole, DeviceInfo, Reading};

use crate::config::{ConnectionConfig, PoolConfig};
use crate::detector::{CircuitState, LoopDetector, RecoveryAction};
use crate::error::{Error, Result, TimeoutScope};
use crate::events::{EventDispatcher, EventReceiver, SessionEvent};
use crate::history::HistoryOutcome;
use crate::radio::{PeripheralId, Radio, RadioEvent};
use crate::retry::with_retry_if;
use crate::slots::SlotPermit;

/// How long a requested disconnect may take to be confirmed by the radio
/// before the session finalizes it locally.
const DISCONNECT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No link. Initial state.
    Disconnected,
    /// A connection has been requested.
    Connecting,
    /// The radio confirmed the link.
    Connected,
    /// Characteristics discovered and handshake accepted.
    Authenticated,
    /// The last connection failed or was lost.
    Error(String),
}

impl SessionState {
    /// Whether moving to `next` is a legal transition.
    ///
    /// Forward moves go one step at a time; `error` and `disconnected` are
    /// reachable from anywhere.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        matches!(
            (self, next),
            (_, SessionState::Error(_) | SessionState::Disconnected)
                | (SessionState::Disconnected, SessionState::Connecting)
                | (SessionState::Connecting, SessionState::Connected)
                | (SessionState::Connected, SessionState::Authenticated)
        )
    }

    /// Whether protocol operations are possible.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    /// Whether a link is up, authenticated or not.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Authenticated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

#[derive(Default)]
struct SessionInner {
    peripheral: Option<PeripheralId>,
    characteristics: HashMap<CharacteristicRole, Uuid>,
    authenticated: bool,
    pending_reads: HashMap<Uuid, oneshot::Sender<Result<Vec<u8>>>>,
    connect_waiter: Option<oneshot::Sender<Result<()>>>,
    disconnect_waiter: Option<oneshot::Sender<()>>,
    disconnect_requested: bool,
    current_index: u16,
    total_entries: u16,
    boot_epoch: Option<OffsetDateTime>,
    device_info: Option<DeviceInfo>,
    last_reading: Option<Reading>,
    last_transfer: Option<HistoryOutcome>,
    permit: Option<SlotPermit>,
}

/// Everything a session knows about one sensor.
pub struct DeviceSession {
    device_id: String,
    radio: Arc<dyn Radio>,
    config: ConnectionConfig,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    events: EventDispatcher,
    op_lock: tokio::sync::Mutex<()>,
    connect_lock: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
    detector: Mutex<LoopDetector>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub(crate) fn new(device_id: impl Into<String>, radio: Arc<dyn Radio>, config: &PoolConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            device_id: device_id.into(),
            radio,
            config: config.connection.clone(),
            inner: Mutex::new(SessionInner::default()),
            state_tx,
            events: EventDispatcher::new(config.event_capacity),
            op_lock: tokio::sync::Mutex::new(()),
            connect_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
            detector: Mutex::new(LoopDetector::new(&config.loop_detection)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn detector(&self) -> MutexGuard<'_, LoopDetector> {
        self.detector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stable device identifier.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to readings, progress and warnings.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Battery and firmware read during the last handshake.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.lock().device_info.clone()
    }

    /// The last live reading.
    pub fn last_reading(&self) -> Option<Reading> {
        self.lock().last_reading
    }

    /// The peripheral currently bound to this session.
    pub fn peripheral(&self) -> Option<PeripheralId> {
        self.lock().peripheral.clone()
    }

    /// Position of the current or last history transfer as
    /// `(current, total)`.
    pub fn transfer_position(&self) -> (u16, u16) {
        let inner = self.lock();
        (inner.current_index, inner.total_entries)
    }

    /// What the last history transfer got done, including one that failed or
    /// timed out.
    pub fn last_transfer(&self) -> Option<HistoryOutcome> {
        self.lock().last_transfer.clone()
    }

    /// Boot epoch estimated by the current or last history transfer.
    pub fn boot_epoch(&self) -> Option<OffsetDateTime> {
        self.lock().boot_epoch
    }

    /// State of the reconnection circuit breaker.
    pub fn circuit_state(&self) -> CircuitState {
        self.detector().circuit_state(Instant::now())
    }

    /// Cancel the operation in flight, if any.
    ///
    /// Pending requests resolve with [`Error::Cancelled`] at their next
    /// suspension point. The next operation starts with a fresh token.
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    pub(crate) fn operation_token(&self) -> CancellationToken {
        let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
        current.clone()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.events.send(event);
    }

    pub(crate) fn emit_warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(device_id = %self.device_id, "{}", message);
        self.emit(SessionEvent::Warning {
            device_id: self.device_id.clone(),
            message,
        });
    }

    fn set_state(&self, next: SessionState) -> bool {
        let mut previous = None;
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == next || !current.can_transition_to(&next) {
                return false;
            }
            previous = Some(std::mem::replace(current, next.clone()));
            true
        });

        if let Some(previous) = previous {
            debug!(device_id = %self.device_id, from = %previous, to = %next, "State changed");
            self.emit(SessionEvent::StateChanged {
                device_id: self.device_id.clone(),
                state: next,
            });
        }
        changed
    }

    pub(crate) fn require_authenticated(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_authenticated() {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, state))
        }
    }

    pub(crate) fn set_transfer_position(&self, current: u16, total: u16) {
        let mut inner = self.lock();
        inner.current_index = current;
        inner.total_entries = total;
    }

    pub(crate) fn record_transfer(&self, outcome: HistoryOutcome) {
        self.lock().last_transfer = Some(outcome);
    }

    pub(crate) fn set_boot_epoch(&self, boot_epoch: OffsetDateTime) {
        self.lock().boot_epoch = Some(boot_epoch);
    }

    /// Keep `permit` for as long as the current link is up.
    pub(crate) fn attach_permit(&self, permit: SlotPermit) {
        let mut inner = self.lock();
        if inner.authenticated {
            inner.permit = Some(permit);
        }
    }

    /// Apply one radio callback routed to this session.
    pub fn handle_radio_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::Connected { peripheral } => {
                let waiter = self.lock().connect_waiter.take();
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(()));
                    }
                    None => debug!(device_id = %self.device_id, %peripheral, "Unsolicited connect"),
                }
            }
            RadioEvent::ConnectFailed { reason, .. } => {
                let waiter = self.lock().connect_waiter.take();
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(Error::connection_failed(
                        Some(self.device_id.clone()),
                        reason,
                    )));
                }
            }
            RadioEvent::Disconnected { reason, .. } => self.on_link_lost(reason),
            RadioEvent::ValueUpdated {
                characteristic,
                value,
                ..
            } => {
                let waiter = self.lock().pending_reads.remove(&characteristic);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(value));
                    }
                    None => debug!(
                        device_id = %self.device_id,
                        %characteristic,
                        "Dropping unsolicited value ({} bytes)",
                        value.len()
                    ),
                }
            }
            RadioEvent::AdapterStateChanged { .. } | RadioEvent::Discovered { .. } => {}
        }
    }

    /// Tear down everything tied to the current link and resolve every
    /// pending continuation.
    pub(crate) fn on_link_lost(&self, reason: Option<String>) {
        let message = reason
            .clone()
            .unwrap_or_else(|| "link closed".to_string());

        let (requested, pending, connect_waiter, disconnect_waiter, permit) = {
            let mut inner = self.lock();
            inner.peripheral = None;
            inner.characteristics.clear();
            inner.authenticated = false;
            (
                std::mem::take(&mut inner.disconnect_requested),
                std::mem::take(&mut inner.pending_reads),
                inner.connect_waiter.take(),
                inner.disconnect_waiter.take(),
                inner.permit.take(),
            )
        };

        for (_, waiter) in pending {
            let _ = waiter.send(Err(Error::Disconnected(message.clone())));
        }
        if let Some(waiter) = connect_waiter {
            let _ = waiter.send(Err(Error::Disconnected(message.clone())));
        }
        if let Some(waiter) = disconnect_waiter {
            let _ = waiter.send(());
        }
        drop(permit);

        if self.state() == SessionState::Disconnected {
            return;
        }
        if requested {
            info!(device_id = %self.device_id, "Disconnected");
        } else {
            self.set_state(SessionState::Error(message.clone()));
            self.emit_warning(format!("Link lost: {message}"));
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Run `fut` under `duration`, resolving early on cancellation.
    pub(crate) async fn bounded<T>(
        &self,
        token: &CancellationToken,
        scope: TimeoutScope,
        operation: &str,
        duration: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = timeout(duration, fut) => {
                result.map_err(|_| Error::timeout(scope, operation, duration))?
            }
        }
    }

    fn handle_for(&self, role: CharacteristicRole) -> Result<(PeripheralId, Uuid)> {
        let inner = self.lock();
        let peripheral = inner
            .peripheral
            .clone()
            .ok_or_else(|| Error::Disconnected("no peripheral bound".to_string()))?;
        let characteristic = inner
            .characteristics
            .get(&role)
            .copied()
            .ok_or_else(|| Error::characteristic_not_found(role))?;
        Ok((peripheral, characteristic))
    }

    /// Read the characteristic for `role` and wait for its value.
    pub(crate) async fn request(
        &self,
        role: CharacteristicRole,
        duration: Duration,
        scope: TimeoutScope,
        operation: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let (peripheral, characteristic) = self.handle_for(role)?;
        let (tx, rx) = oneshot::channel();
        self.lock().pending_reads.insert(characteristic, tx);

        let exchange = async {
            self.radio.read(&peripheral, characteristic).await?;
            rx.await
                .map_err(|_| Error::Disconnected("read abandoned".to_string()))?
        };
        let result = self
            .bounded(token, scope, operation, duration, exchange)
            .await;
        if result.is_err() {
            self.lock().pending_reads.remove(&characteristic);
        }
        result
    }

    /// Write `value` to the characteristic for `role`.
    pub(crate) async fn write_role(
        &self,
        role: CharacteristicRole,
        value: &[u8],
        token: &CancellationToken,
    ) -> Result<()> {
        let (peripheral, characteristic) = self.handle_for(role)?;
        let operation = format!("write {role}");
        self.bounded(
            token,
            TimeoutScope::Entry,
            &operation,
            self.config.write_timeout,
            self.radio.write(&peripheral, characteristic, value),
        )
        .await
    }

    /// Connect through `peripheral`, negotiate characteristics and run the
    /// authentication handshake.
    ///
    /// Returns immediately if the session is already authenticated.
    #[tracing::instrument(level = "info", skip_all, fields(device_id = %self.device_id, peripheral = %peripheral))]
    pub(crate) async fn connect_via(&self, peripheral: PeripheralId) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.state().is_authenticated() {
            return Ok(());
        }

        let gate = self.detector().begin_connection(Instant::now());
        if let Err(action) = gate {
            return Err(match action {
                RecoveryAction::StopReconnecting => {
                    let attempts = self.detector().connection_attempts();
                    self.emit_warning(format!(
                        "Connection loop detected ({attempts} attempts), not reconnecting"
                    ));
                    Error::ConnectionLoop {
                        device_id: self.device_id.clone(),
                        attempts,
                    }
                }
                _ => Error::CircuitOpen {
                    device_id: self.device_id.clone(),
                },
            });
        }

        if self.state() != SessionState::Disconnected {
            // leftover link from a failed attempt
            let _ = self.close_link().await;
        }

        let token = self.operation_token();
        match self.establish(peripheral, &token).await {
            Ok(()) => {
                self.detector().end_connection(true, Instant::now());
                Ok(())
            }
            Err(e) => {
                warn!("Connection attempt failed: {}", e);
                self.set_state(SessionState::Error(e.to_string()));
                let _ = self.close_link().await;
                self.detector().end_connection(false, Instant::now());
                Err(e)
            }
        }
    }

    async fn establish(&self, peripheral: PeripheralId, token: &CancellationToken) -> Result<()> {
        let confirmation = {
            let mut inner = self.lock();
            inner.peripheral = Some(peripheral.clone());
            inner.disconnect_requested = false;
            let (tx, rx) = oneshot::channel();
            inner.connect_waiter = Some(tx);
            rx
        };
        self.set_state(SessionState::Connecting);

        info!("Connecting to device...");
        let confirmed = async {
            self.radio.connect(&peripheral).await?;
            confirmation
                .await
                .map_err(|_| Error::Disconnected("connect abandoned".to_string()))?
        };
        self.bounded(
            token,
            TimeoutScope::Device,
            "connect to device",
            self.config.connection_timeout,
            confirmed,
        )
        .await?;
        self.set_state(SessionState::Connected);
        info!("Connected!");

        self.negotiate(&peripheral, token).await?;
        let info = self.authenticate(token).await?;

        {
            let mut inner = self.lock();
            inner.authenticated = true;
            inner.device_info = Some(info.clone());
        }
        self.emit(SessionEvent::DeviceInfo {
            device_id: self.device_id.clone(),
            info,
        });
        self.set_state(SessionState::Authenticated);
        Ok(())
    }

    async fn negotiate(&self, peripheral: &PeripheralId, token: &CancellationToken) -> Result<()> {
        info!("Discovering services...");
        let discovery = self.config.discovery_timeout;
        let services = self
            .bounded(
                token,
                TimeoutScope::Device,
                "discover services",
                discovery,
                self.radio.discover_services(peripheral),
            )
            .await?;
        debug!("Found {} services", services.len());

        let mut characteristics = HashMap::new();
        for service in [DATA_SERVICE, HISTORY_SERVICE] {
            if !services.contains(&service) {
                debug!("Service {} not advertised", service);
                continue;
            }
            let found = self
                .bounded(
                    token,
                    TimeoutScope::Device,
                    "discover characteristics",
                    discovery,
                    self.radio.discover_characteristics(peripheral, service),
                )
                .await?;
            for uuid in found {
                if let Some(role) = CharacteristicRole::from_uuid(&uuid) {
                    characteristics.insert(role, uuid);
                }
            }
        }

        if let Some(missing) = CharacteristicRole::ALL
            .into_iter()
            .find(|role| !characteristics.contains_key(role))
        {
            return Err(Error::characteristic_not_found(missing));
        }
        debug!("Mapped {} characteristics", characteristics.len());
        self.lock().characteristics = characteristics;
        Ok(())
    }

    /// The handshake is accepted when the firmware/battery characteristic
    /// answers with a well-formed payload. Garbled answers and timeouts are
    /// retried under `auth_retry` before the handshake is rejected.
    async fn authenticate(&self, token: &CancellationToken) -> Result<DeviceInfo> {
        let read_timeout = self.config.read_timeout;
        let info = with_retry_if(
            &self.config.auth_retry,
            "authentication handshake",
            |e| e.is_retryable() || matches!(e, Error::Decode { .. }),
            || async move {
                let bytes = self
                    .request(
                        CharacteristicRole::FirmwareBattery,
                        read_timeout,
                        TimeoutScope::Entry,
                        "read firmware/battery",
                        token,
                    )
                    .await?;
                decode_firmware_battery(&bytes).map_err(Error::from)
            },
        )
        .await
        .map_err(|e| match e {
            Error::Decode { source, .. } => Error::AuthenticationFailed(source.to_string()),
            Error::Timeout { .. } => Error::AuthenticationFailed(format!("handshake not answered: {e}")),
            other => other,
        })?;

        debug!(battery = info.battery, firmware = %info.firmware, "Handshake accepted");
        Ok(info)
    }

    /// Request a disconnect and wait briefly for the radio to confirm it.
    async fn close_link(&self) -> Result<()> {
        let request = {
            let mut inner = self.lock();
            match inner.peripheral.clone() {
                Some(peripheral) => {
                    inner.disconnect_requested = true;
                    let (tx, rx) = oneshot::channel();
                    inner.disconnect_waiter = Some(tx);
                    Some((peripheral, rx))
                }
                None => None,
            }
        };

        let mut outcome = Ok(());
        if let Some((peripheral, confirmed)) = request {
            match self.radio.disconnect(&peripheral).await {
                Ok(()) => {
                    if timeout(DISCONNECT_CONFIRM_TIMEOUT, confirmed).await.is_err() {
                        debug!(device_id = %self.device_id, "Disconnect not confirmed, finalizing");
                    }
                }
                Err(e) => {
                    warn!(device_id = %self.device_id, "Radio disconnect failed: {}", e);
                    outcome = Err(e);
                }
            }
            // no-op when the radio already confirmed
            let still_bound = self.lock().peripheral.is_some();
            if still_bound {
                self.lock().disconnect_requested = true;
                self.on_link_lost(None);
            }
        }
        self.set_state(SessionState::Disconnected);
        outcome
    }

    /// Read one live reading.
    #[tracing::instrument(level = "debug", skip(self), fields(device_id = %self.device_id))]
    pub async fn read_live(&self) -> Result<Reading> {
        let _op = self.op_lock.lock().await;
        self.require_authenticated("read live data")?;
        let token = self.operation_token();

        self.write_role(CharacteristicRole::Control, &MODE_CHANGE_COMMAND, &token)
            .await?;
        let bytes = self
            .request(
                CharacteristicRole::LiveData,
                self.config.read_timeout,
                TimeoutScope::Entry,
                "read live data",
                &token,
            )
            .await?;
        let reading = decode_live_reading(&bytes, OffsetDateTime::now_utc())?;

        self.lock().last_reading = Some(reading);
        self.emit(SessionEvent::LiveReading {
            device_id: self.device_id.clone(),
            reading,
        });
        Ok(reading)
    }

    /// Disconnect the current link, if any.
    #[tracing::instrument(level = "info", skip(self), fields(device_id = %self.device_id))]
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from device...");
        self.close_link().await
    }

    pub(crate) async fn lock_operations(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use SessionState::*;
        assert!(Disconnected.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Connected));
        assert!(Connected.can_transition_to(&Authenticated));

        assert!(!Disconnected.can_transition_to(&Connected));
        assert!(!Disconnected.can_transition_to(&Authenticated));
        assert!(!Connecting.can_transition_to(&Authenticated));
        assert!(!Authenticated.can_transition_to(&Connecting));
        assert!(!Error("x".into()).can_transition_to(&Connecting));
    }

    #[test]
    fn test_error_and_disconnected_reachable_from_anywhere() {
        use SessionState::*;
        for state in [
            Disconnected,
            Connecting,
            Connected,
            Authenticated,
            Error("x".into()),
        ] {
            assert!(state.can_transition_to(&Error("link lost".into())));
            assert!(state.can_transition_to(&Disconnected));
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
        assert_eq!(SessionState::Authenticated.to_string(), "authenticated");
        assert_eq!(
            SessionState::Error("timeout".into()).to_string(),
            "error (timeout)"
        );
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionState::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(
            serde_json::to_string(&SessionState::Error("gone".into())).unwrap(),
            r#"{"error":"gone"}"#
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(SessionState::Authenticated.is_connected());
        assert!(SessionState::Connected.is_connected());
        assert!(!SessionState::Connected.is_authenticated());
        assert!(!SessionState::Error("x".into()).is_connected());
    }
}
