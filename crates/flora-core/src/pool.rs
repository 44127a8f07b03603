//! The connection pool: sole owner of the radio.
//!
//! A [`ConnectionPool`] takes the radio's event stream on start and runs one
//! dispatch task that routes every callback to the session owning the
//! peripheral. It resolves device ids to peripherals (known identifier or
//! scan), hands out connection slots and keeps exactly one
//! [`DeviceSession`] per device id for its whole lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flora_types::uuid::ADVERTISED_SERVICE;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::radio::{PeripheralId, Radio, RadioEvent};
use crate::session::DeviceSession;
use crate::slots::{Priority, SlotQueue};

/// Address reported where the platform hides it.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// A sensor seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSensor {
    /// Identifier to pass to [`ConnectionPool::connect`].
    pub identifier: String,
    /// Bluetooth address, all zeros on macOS.
    pub address: String,
    /// Advertised name.
    pub name: Option<String>,
    /// Signal strength.
    pub rssi: Option<i16>,
}

impl DiscoveredSensor {
    fn matches(&self, device_id: &str) -> bool {
        self.identifier.eq_ignore_ascii_case(device_id)
            || (self.address != HIDDEN_ADDRESS && self.address.eq_ignore_ascii_case(device_id))
            || self
                .name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(device_id))
    }
}

#[derive(Default)]
struct PoolState {
    sessions: HashMap<String, Arc<DeviceSession>>,
    /// Peripheral → device id, the dispatch table.
    routes: HashMap<PeripheralId, String>,
    /// Device id → last peripheral it was reached through.
    known: HashMap<String, PeripheralId>,
    pending_scan: HashMap<String, Vec<oneshot::Sender<PeripheralId>>>,
    discovered: HashMap<PeripheralId, (DiscoveredSensor, Instant)>,
    foreground: HashSet<String>,
    scanning: bool,
    explicit_scans: usize,
}

impl PoolState {
    fn find_discovered(&self, device_id: &str) -> Option<PeripheralId> {
        self.discovered
            .iter()
            .find(|(_, (sensor, _))| sensor.matches(device_id))
            .map(|(peripheral, _)| peripheral.clone())
    }

    fn scan_pending(&self) -> bool {
        self.pending_scan
            .values()
            .flatten()
            .any(|waiter| !waiter.is_closed())
    }
}

/// Owner of the radio and of every session.
pub struct ConnectionPool {
    radio: Arc<dyn Radio>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    slots: SlotQueue,
    powered: AtomicBool,
    background: AtomicBool,
    scan_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Marks a background fetch as running on its pool until dropped.
#[derive(Debug)]
#[must_use = "the background run ends when the guard is dropped"]
pub struct BackgroundGuard<'a>(&'a AtomicBool);

impl Drop for BackgroundGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("sessions", &self.session_count())
            .field("powered", &self.is_powered())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Take ownership of `radio` and start dispatching its events.
    ///
    /// Fails if the radio's event stream has already been taken.
    pub async fn start(radio: Arc<dyn Radio>, config: PoolConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let mut events = radio
            .take_events()
            .ok_or_else(|| Error::invalid_config("radio event stream already taken"))?;
        let powered = radio.is_powered().await?;
        if !powered {
            warn!("Radio adapter is powered off");
        }

        let pool = Arc::new(Self {
            radio,
            slots: SlotQueue::new(config.max_sessions),
            config,
            state: Mutex::new(PoolState::default()),
            powered: AtomicBool::new(powered),
            background: AtomicBool::new(false),
            scan_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&pool);
        let shutdown = pool.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let Some(pool) = weak.upgrade() else {
                    break;
                };
                pool.dispatch(event).await;
            }
            debug!("Radio dispatch stopped");
        });

        Ok(pool)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether the radio adapter is powered on.
    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    fn ensure_powered(&self) -> Result<()> {
        if self.is_powered() {
            Ok(())
        } else {
            Err(Error::RadioUnavailable("adapter is powered off".to_string()))
        }
    }

    /// Return the session for `device_id`, creating it on first use.
    ///
    /// Repeated calls return the same instance.
    pub fn get_or_create_session(&self, device_id: &str) -> Arc<DeviceSession> {
        let mut state = self.lock();
        Arc::clone(state.sessions.entry(device_id.to_string()).or_insert_with(|| {
            debug!(device_id, "Creating session");
            Arc::new(DeviceSession::new(
                device_id,
                Arc::clone(&self.radio),
                &self.config,
            ))
        }))
    }

    /// The session for `device_id`, if one was created.
    pub fn session(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.lock().sessions.get(device_id).cloned()
    }

    /// Ids of all sessions.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of sessions.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Number of sessions currently authenticated.
    pub fn connected_count(&self) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|session| session.state().is_authenticated())
            .count()
    }

    /// Free connection slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available()
    }

    /// Mark a device as actively viewed. Its connects are served before
    /// background ones when slots are scarce.
    pub fn mark_active(&self, device_id: &str, active: bool) {
        let mut state = self.lock();
        if active {
            state.foreground.insert(device_id.to_string());
        } else {
            state.foreground.remove(device_id);
        }
    }

    /// Record the peripheral a device can be reached through, so the next
    /// connect skips the scan.
    pub fn remember(&self, device_id: &str, peripheral: PeripheralId) {
        self.lock().known.insert(device_id.to_string(), peripheral);
    }

    /// The peripheral known for `device_id`.
    pub fn known_peripheral(&self, device_id: &str) -> Option<PeripheralId> {
        self.lock().known.get(device_id).cloned()
    }

    fn forget(&self, device_id: &str, peripheral: &PeripheralId) {
        let mut state = self.lock();
        state.known.remove(device_id);
        state.discovered.remove(peripheral);
    }

    fn route(&self, device_id: &str, peripheral: &PeripheralId) {
        let mut state = self.lock();
        if let Some(previous) = state
            .known
            .insert(device_id.to_string(), peripheral.clone())
            && previous != *peripheral
        {
            state.routes.remove(&previous);
        }
        state
            .routes
            .insert(peripheral.clone(), device_id.to_string());
    }

    /// Connect `device_id` and bring its session to `authenticated`.
    ///
    /// A known peripheral is reconnected directly; otherwise the device is
    /// added to the pending-scan set and resolved by scanning. Waits for a
    /// connection slot when the session ceiling is reached.
    pub async fn connect(&self, device_id: &str) -> Result<Arc<DeviceSession>> {
        let priority = if self.lock().foreground.contains(device_id) {
            Priority::Foreground
        } else {
            Priority::Background
        };
        self.connect_with_priority(device_id, priority).await
    }

    /// [`connect`](Self::connect) with an explicit queue priority.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn connect_with_priority(
        &self,
        device_id: &str,
        priority: Priority,
    ) -> Result<Arc<DeviceSession>> {
        self.ensure_powered()?;
        let session = self.get_or_create_session(device_id);
        if session.state().is_authenticated() {
            return Ok(session);
        }

        let permit = self.slots.acquire(priority).await;
        self.ensure_powered()?;
        if session.state().is_authenticated() {
            return Ok(session);
        }

        let known = self.known_peripheral(device_id);
        match known {
            Some(peripheral) => {
                debug!(%peripheral, "Reconnecting via known identifier");
                match self.connect_through(&session, &peripheral).await {
                    Err(Error::DeviceNotFound(_)) => {
                        info!("Known identifier is gone, scanning");
                        self.forget(device_id, &peripheral);
                        let peripheral = self.scan_for(device_id).await?;
                        self.connect_through(&session, &peripheral).await?;
                    }
                    other => other?,
                }
            }
            None => {
                let peripheral = self.scan_for(device_id).await?;
                self.connect_through(&session, &peripheral).await?;
            }
        }

        session.attach_permit(permit);
        Ok(session)
    }

    async fn connect_through(&self, session: &DeviceSession, peripheral: &PeripheralId) -> Result<()> {
        self.route(session.device_id(), peripheral);
        session.connect_via(peripheral.clone()).await
    }

    /// Connect several devices concurrently, up to the session ceiling.
    pub async fn connect_many(&self, device_ids: &[String]) -> Vec<(String, Result<Arc<DeviceSession>>)> {
        let futures = device_ids.iter().map(|id| async move {
            let result = self.connect(id).await;
            (id.clone(), result)
        });
        join_all(futures).await
    }

    /// Disconnect `device_id`, if it has a session.
    pub async fn disconnect(&self, device_id: &str) -> Result<()> {
        match self.session(device_id) {
            Some(session) => session.disconnect().await,
            None => Ok(()),
        }
    }

    /// Disconnect every session.
    pub async fn disconnect_all(&self) -> Vec<(String, Result<()>)> {
        let sessions: Vec<_> = self.lock().sessions.values().cloned().collect();
        let futures = sessions.into_iter().map(|session| async move {
            let result = session.disconnect().await;
            (session.device_id().to_string(), result)
        });
        join_all(futures).await
    }

    /// Scan for `duration` and return every sensor seen.
    ///
    /// Sensors are sorted by signal strength, strongest first.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredSensor>> {
        self.ensure_powered()?;
        let since = Instant::now();

        self.lock().explicit_scans += 1;
        let started = self.ensure_scanning().await;
        if started.is_ok() {
            sleep(duration).await;
        }
        self.lock().explicit_scans -= 1;
        self.stop_scan_if_idle().await;
        started?;

        let mut sensors: Vec<_> = self
            .lock()
            .discovered
            .values()
            .filter(|(_, seen)| *seen >= since)
            .map(|(sensor, _)| sensor.clone())
            .collect();
        sensors.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        info!("Found {} sensor(s)", sensors.len());
        Ok(sensors)
    }

    async fn scan_for(&self, device_id: &str) -> Result<PeripheralId> {
        let waiter = {
            let mut state = self.lock();
            if let Some(peripheral) = state.find_discovered(device_id) {
                state.known.insert(device_id.to_string(), peripheral.clone());
                return Ok(peripheral);
            }
            let (tx, rx) = oneshot::channel();
            state
                .pending_scan
                .entry(device_id.to_string())
                .or_default()
                .push(tx);
            rx
        };

        info!("Scanning for device...");
        self.ensure_scanning().await?;
        let outcome = timeout(self.config.scan_timeout, waiter).await;
        match outcome {
            Ok(Ok(peripheral)) => Ok(peripheral),
            Ok(Err(_)) => Err(Error::RadioUnavailable(
                "radio went away during scan".to_string(),
            )),
            Err(_) => {
                self.stop_scan_if_idle().await;
                Err(Error::device_not_found(device_id))
            }
        }
    }

    async fn ensure_scanning(&self) -> Result<()> {
        let _guard = self.scan_lock.lock().await;
        if self.lock().scanning {
            return Ok(());
        }
        self.radio.start_scan(&[ADVERTISED_SERVICE]).await?;
        self.lock().scanning = true;
        debug!("Scan started");
        Ok(())
    }

    /// Stop scanning once no connect waits for a discovery and no explicit
    /// scan runs.
    pub(crate) async fn stop_scan_if_idle(&self) {
        let _guard = self.scan_lock.lock().await;
        let idle = {
            let mut state = self.lock();
            let idle = state.scanning && state.explicit_scans == 0 && !state.scan_pending();
            if idle {
                state.pending_scan.clear();
                state.scanning = false;
            }
            idle
        };
        if idle {
            match self.radio.stop_scan().await {
                Ok(()) => debug!("Scan stopped"),
                Err(e) => warn!("Failed to stop scan: {}", e),
            }
        }
    }

    /// Claim the pool's single background run. `None` while another one,
    /// from any fetcher, holds it.
    pub fn try_begin_background(&self) -> Option<BackgroundGuard<'_>> {
        self.background
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BackgroundGuard(&self.background))
    }

    /// Whether a background fetch is running on this pool.
    pub fn is_background_running(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    /// Whether the radio is currently scanning on behalf of the pool.
    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    async fn dispatch(&self, event: RadioEvent) {
        match event {
            RadioEvent::AdapterStateChanged { powered } => self.on_power_change(powered),
            RadioEvent::Discovered {
                peripheral,
                address,
                name,
                rssi,
            } => {
                let sensor = DiscoveredSensor {
                    identifier: peripheral.to_string(),
                    address,
                    name,
                    rssi,
                };
                self.on_discovered(peripheral, sensor).await;
            }
            event => {
                let Some(peripheral) = event.peripheral().cloned() else {
                    return;
                };
                let session = {
                    let state = self.lock();
                    state
                        .routes
                        .get(&peripheral)
                        .and_then(|device_id| state.sessions.get(device_id))
                        .cloned()
                };
                match session {
                    Some(session) => session.handle_radio_event(event),
                    None => warn!(%peripheral, "Dropping event for unknown peripheral"),
                }
            }
        }
    }

    fn on_power_change(&self, powered: bool) {
        let was = self.powered.swap(powered, Ordering::SeqCst);
        if was == powered {
            return;
        }
        if powered {
            info!("Radio adapter powered on");
            return;
        }

        warn!("Radio adapter powered off, dropping all links");
        let sessions: Vec<_> = {
            let mut state = self.lock();
            // dropped waiters surface as RadioUnavailable
            state.pending_scan.clear();
            state.scanning = false;
            state.sessions.values().cloned().collect()
        };
        for session in sessions {
            session.on_link_lost(Some("radio powered off".to_string()));
        }
    }

    async fn on_discovered(&self, peripheral: PeripheralId, sensor: DiscoveredSensor) {
        debug!(%peripheral, name = ?sensor.name, rssi = ?sensor.rssi, "Discovered sensor");
        let waiters = {
            let mut state = self.lock();
            let resolved: Vec<String> = state
                .pending_scan
                .keys()
                .chain(state.sessions.keys())
                .filter(|device_id| sensor.matches(device_id))
                .cloned()
                .collect();

            let mut waiters = Vec::new();
            for device_id in resolved {
                if let Some(pending) = state.pending_scan.remove(&device_id) {
                    waiters.extend(pending);
                }
                state.known.insert(device_id, peripheral.clone());
            }
            state
                .discovered
                .insert(peripheral.clone(), (sensor, Instant::now()));
            waiters
        };

        let resolved_any = !waiters.is_empty();
        for waiter in waiters {
            let _ = waiter.send(peripheral.clone());
        }
        if resolved_any {
            self.stop_scan_if_idle().await;
        }
    }

    /// Stop dispatching and disconnect every session.
    pub async fn shutdown(&self) {
        info!("Shutting down connection pool");
        self.disconnect_all().await;
        self.shutdown.cancel();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(identifier: &str, address: &str, name: Option<&str>) -> DiscoveredSensor {
        DiscoveredSensor {
            identifier: identifier.to_string(),
            address: address.to_string(),
            name: name.map(str::to_string),
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_discovered_matching() {
        let linux = sensor("C4:7C:8D:6A:3E:11", "C4:7C:8D:6A:3E:11", Some("Flower care"));
        assert!(linux.matches("c4:7c:8d:6a:3e:11"));
        assert!(linux.matches("Flower care"));
        assert!(!linux.matches("C4:7C:8D:6A:3E:12"));

        let macos = sensor(
            "6f1c3f0a-0c4e-4f5b-9a55-3b1d2b1e9c01",
            HIDDEN_ADDRESS,
            None,
        );
        assert!(macos.matches("6F1C3F0A-0C4E-4F5B-9A55-3B1D2B1E9C01"));
        assert!(!macos.matches(HIDDEN_ADDRESS));
    }

    #[test]
    fn test_scan_pending_ignores_closed_waiters() {
        let mut state = PoolState::default();
        let (tx, rx) = oneshot::channel();
        state.pending_scan.insert("a".to_string(), vec![tx]);
        assert!(state.scan_pending());
        drop(rx);
        assert!(!state.scan_pending());
    }
}
