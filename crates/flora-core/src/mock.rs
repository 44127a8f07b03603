//! Scripted radio for testing.
//!
//! [`MockRadio`] implements [`Radio`] on top of a set of simulated
//! [`MockSensor`]s. Each sensor speaks the real wire protocol (history mode,
//! address commands, firmware/battery handshake) and can be told to
//! misbehave: corrupt entries, silent entries, dropped links, refused
//! connections, rejected handshakes, missing characteristics.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use flora_core::mock::{MockRadio, MockSensor};
//! use flora_core::{ConnectionPool, PoolConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> flora_core::Result<()> {
//! let radio = Arc::new(MockRadio::new());
//! radio.add_sensor(MockSensor::new("C4:7C:8D:6A:3E:11").history_len(10));
//!
//! let pool = ConnectionPool::start(radio, PoolConfig::default()).await?;
//! let session = pool.connect("C4:7C:8D:6A:3E:11").await?;
//! let reading = session.read_live().await?;
//! assert!(reading.moisture <= 100);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::time::sleep;
use uuid::Uuid;

use flora_types::codec::{HISTORY_ADDRESS_OPCODE, HISTORY_MODE_COMMAND};
use flora_types::uuid::{
    CONTROL, DATA_SERVICE, DEVICE_TIME, FIRMWARE_BATTERY, HISTORY_CONTROL, HISTORY_DATA,
    HISTORY_SERVICE, LIVE_DATA,
};
use flora_types::{CharacteristicRole, DeviceInfo, HistoricalReading, Reading};

use crate::error::{Error, Result};
use crate::radio::{
    PeripheralId, Radio, RadioEvent, RadioEventReceiver, RadioEventSender, radio_channel,
};

/// Encode a live reading the way the sensor sends it.
pub fn encode_live_reading(reading: &Reading) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[0..2].copy_from_slice(&encode_temperature(reading.temperature));
    bytes[3..7].copy_from_slice(&reading.brightness.to_le_bytes());
    bytes[7] = reading.moisture;
    bytes[8..10].copy_from_slice(&reading.conductivity.to_le_bytes());
    bytes
}

/// Encode a history entry the way the sensor sends it.
pub fn encode_history_entry(entry: &HistoricalReading) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&entry.device_seconds.to_le_bytes());
    bytes[4..6].copy_from_slice(&encode_temperature(entry.temperature));
    bytes[7..11].copy_from_slice(&entry.brightness.to_le_bytes());
    bytes[11] = entry.moisture;
    bytes[12..14].copy_from_slice(&entry.conductivity.to_le_bytes());
    bytes
}

/// Encode the firmware/battery payload.
pub fn encode_firmware_battery(battery: u8, firmware: &str) -> [u8; 7] {
    let mut bytes = [0u8; 7];
    bytes[0] = battery;
    bytes[1] = 0x13;
    for (slot, byte) in bytes[2..].iter_mut().zip(firmware.bytes()) {
        *slot = byte;
    }
    bytes
}

fn encode_temperature(celsius: f32) -> [u8; 2] {
    ((celsius * 10.0).round() as i16).to_le_bytes()
}

/// Service a characteristic role lives in.
fn service_of(role: CharacteristicRole) -> Uuid {
    match role {
        CharacteristicRole::Control
        | CharacteristicRole::LiveData
        | CharacteristicRole::FirmwareBattery => DATA_SERVICE,
        CharacteristicRole::HistoryControl
        | CharacteristicRole::HistoryData
        | CharacteristicRole::DeviceTime => HISTORY_SERVICE,
    }
}

/// Description of a simulated sensor.
#[derive(Debug, Clone)]
pub struct MockSensor {
    id: PeripheralId,
    name: Option<String>,
    rssi: i16,
    info: DeviceInfo,
    live: Reading,
    history: Vec<HistoricalReading>,
    boot_offset: u32,
    raw_entry_count: Option<Vec<u8>>,
    corrupt_entries: HashMap<u16, u32>,
    silent_entries: HashMap<u16, u32>,
    disconnect_after: Option<usize>,
    connect_failures: u32,
    auth_failures: u32,
    missing: Option<CharacteristicRole>,
    unresponsive: bool,
    advertise: bool,
    response_delay: Duration,
}

impl MockSensor {
    /// A healthy sensor reachable as `id`, with an empty history log.
    pub fn new(id: &str) -> Self {
        Self {
            id: PeripheralId::new(id),
            name: Some("Flower care".to_string()),
            rssi: -60,
            info: DeviceInfo {
                battery: 95,
                firmware: "3.2.1".to_string(),
            },
            live: Reading {
                temperature: 21.5,
                brightness: 1200,
                moisture: 38,
                conductivity: 410,
                timestamp: OffsetDateTime::UNIX_EPOCH,
            },
            history: Vec::new(),
            boot_offset: 7 * 24 * 3600,
            raw_entry_count: None,
            corrupt_entries: HashMap::new(),
            silent_entries: HashMap::new(),
            disconnect_after: None,
            connect_failures: 0,
            auth_failures: 0,
            missing: None,
            unresponsive: false,
            advertise: true,
            response_delay: Duration::ZERO,
        }
    }

    /// Advertised name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Signal strength.
    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// Battery level reported in the handshake.
    #[must_use]
    pub fn battery(mut self, battery: u8) -> Self {
        self.info.battery = battery;
        self
    }

    /// Firmware version reported in the handshake.
    #[must_use]
    pub fn firmware(mut self, firmware: &str) -> Self {
        self.info.firmware = firmware.to_string();
        self
    }

    /// Live reading served on request.
    #[must_use]
    pub fn live(mut self, reading: Reading) -> Self {
        self.live = reading;
        self
    }

    /// History log served entry by entry.
    #[must_use]
    pub fn history(mut self, entries: Vec<HistoricalReading>) -> Self {
        self.history = entries;
        self
    }

    /// A generated history log of `len` hourly entries.
    #[must_use]
    pub fn history_len(mut self, len: u16) -> Self {
        self.history = (0..u32::from(len))
            .map(|i| HistoricalReading {
                device_seconds: i * 3600,
                temperature: 18.0 + (i % 10) as f32 * 0.5,
                brightness: 1000 + i,
                moisture: (30 + i % 50) as u8,
                conductivity: 300 + (i % 200) as u16,
            })
            .collect();
        self
    }

    /// Seconds since boot reported by the device clock.
    #[must_use]
    pub fn boot_offset(mut self, offset: Duration) -> Self {
        self.boot_offset = offset.as_secs().min(u64::from(u32::MAX)) as u32;
        self
    }

    /// Serve `bytes` instead of the real entry count.
    #[must_use]
    pub fn raw_entry_count(mut self, bytes: Vec<u8>) -> Self {
        self.raw_entry_count = Some(bytes);
        self
    }

    /// Serve a malformed payload for entry `index` the next `times` reads.
    #[must_use]
    pub fn corrupt_entry(mut self, index: u16, times: u32) -> Self {
        self.corrupt_entries.insert(index, times);
        self
    }

    /// Leave the next `times` reads of entry `index` unanswered.
    #[must_use]
    pub fn silent_entry(mut self, index: u16, times: u32) -> Self {
        self.silent_entries.insert(index, times);
        self
    }

    /// Drop the link once, when entry number `served + 1` is requested.
    #[must_use]
    pub fn disconnect_after(mut self, served: usize) -> Self {
        self.disconnect_after = Some(served);
        self
    }

    /// Refuse the next `count` connection attempts.
    #[must_use]
    pub fn connect_failures(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    /// Answer the next `count` handshakes with a malformed payload.
    #[must_use]
    pub fn auth_failures(mut self, count: u32) -> Self {
        self.auth_failures = count;
        self
    }

    /// Hide the characteristic for `role`.
    #[must_use]
    pub fn missing(mut self, role: CharacteristicRole) -> Self {
        self.missing = Some(role);
        self
    }

    /// Never answer connection requests.
    #[must_use]
    pub fn unresponsive(mut self) -> Self {
        self.unresponsive = true;
        self
    }

    /// Do not show up in scans.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.advertise = false;
        self
    }

    /// Delay every connect and read answer by `delay`.
    #[must_use]
    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Identifier the sensor is reachable as.
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    fn discovered_event(&self) -> RadioEvent {
        RadioEvent::Discovered {
            peripheral: self.id.clone(),
            address: self.id.to_string(),
            name: self.name.clone(),
            rssi: Some(self.rssi),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryMode {
    Idle,
    Count,
    Address(u16),
}

#[derive(Debug)]
struct SensorState {
    sensor: MockSensor,
    connected: bool,
    mode: HistoryMode,
    served_entries: usize,
}

/// Counters of radio calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// `start_scan` calls.
    pub scans_started: u32,
    /// `stop_scan` calls.
    pub scans_stopped: u32,
    /// `connect` calls.
    pub connects: u32,
    /// `disconnect` calls.
    pub disconnects: u32,
    /// `write` calls.
    pub writes: u32,
    /// `read` calls.
    pub reads: u32,
    /// History entry reads.
    pub entry_reads: u32,
}

#[derive(Debug)]
struct MockState {
    powered: bool,
    scanning: bool,
    sensors: HashMap<PeripheralId, SensorState>,
    stats: MockStats,
}

/// A [`Radio`] driving simulated sensors.
#[derive(Debug)]
pub struct MockRadio {
    tx: RadioEventSender,
    events: Mutex<Option<RadioEventReceiver>>,
    state: Mutex<MockState>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// A powered radio with no sensors in range.
    pub fn new() -> Self {
        let (tx, rx) = radio_channel();
        Self {
            tx,
            events: Mutex::new(Some(rx)),
            state: Mutex::new(MockState {
                powered: true,
                scanning: false,
                sensors: HashMap::new(),
                stats: MockStats::default(),
            }),
        }
    }

    /// A powered radio with `sensors` in range.
    pub fn with_sensors(sensors: impl IntoIterator<Item = MockSensor>) -> Self {
        let radio = Self::new();
        for sensor in sensors {
            radio.add_sensor(sensor);
        }
        radio
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RadioEvent) {
        let _ = self.tx.send(event);
    }

    /// Bring a sensor in range. It advertises at once if a scan is running.
    pub fn add_sensor(&self, sensor: MockSensor) {
        let announce = {
            let mut state = self.lock();
            let announce = (state.scanning && sensor.advertise).then(|| sensor.discovered_event());
            state.sensors.insert(
                sensor.id.clone(),
                SensorState {
                    sensor,
                    connected: false,
                    mode: HistoryMode::Idle,
                    served_entries: 0,
                },
            );
            announce
        };
        if let Some(event) = announce {
            self.emit(event);
        }
    }

    /// Deliver an arbitrary event, as if the platform had sent it.
    pub fn inject(&self, event: RadioEvent) {
        self.emit(event);
    }

    /// Power the adapter on or off. Powering off drops every link.
    pub fn set_powered(&self, powered: bool) {
        {
            let mut state = self.lock();
            state.powered = powered;
            if !powered {
                state.scanning = false;
                for sensor in state.sensors.values_mut() {
                    sensor.connected = false;
                }
            }
        }
        self.emit(RadioEvent::AdapterStateChanged { powered });
    }

    /// Drop the link to `id` as if the sensor went out of range.
    pub fn drop_link(&self, id: &str) {
        let peripheral = PeripheralId::new(id);
        let was_connected = self
            .lock()
            .sensors
            .get_mut(&peripheral)
            .map(|s| std::mem::replace(&mut s.connected, false))
            .unwrap_or(false);
        if was_connected {
            self.emit(RadioEvent::Disconnected {
                peripheral,
                reason: Some("connection lost".to_string()),
            });
        }
    }

    /// Call counters so far.
    pub fn stats(&self) -> MockStats {
        self.lock().stats
    }

    /// Whether the radio is scanning.
    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    /// Whether `id` has a link up.
    pub fn is_connected(&self, id: &str) -> bool {
        self.lock()
            .sensors
            .get(&PeripheralId::new(id))
            .is_some_and(|s| s.connected)
    }

    fn delay_of(&self, peripheral: &PeripheralId) -> Duration {
        self.lock()
            .sensors
            .get(peripheral)
            .map_or(Duration::ZERO, |s| s.sensor.response_delay)
    }

    fn with_connected<T>(
        &self,
        peripheral: &PeripheralId,
        f: impl FnOnce(&mut SensorState, &mut MockStats) -> T,
    ) -> Result<T> {
        let mut state = self.lock();
        let state = &mut *state;
        if !state.powered {
            return Err(Error::RadioUnavailable("adapter is powered off".to_string()));
        }
        let sensor = state
            .sensors
            .get_mut(peripheral)
            .ok_or_else(|| Error::device_not_found(peripheral.as_str()))?;
        if !sensor.connected {
            return Err(Error::Disconnected(format!("{peripheral} is not connected")));
        }
        Ok(f(sensor, &mut state.stats))
    }
}

/// What a read produces.
enum ReadAnswer {
    Value(Vec<u8>),
    Silent,
    LinkLost,
}

fn answer_read(sensor: &mut SensorState, characteristic: Uuid, stats: &mut MockStats) -> ReadAnswer {
    let config = &mut sensor.sensor;
    match characteristic {
        FIRMWARE_BATTERY => {
            if config.auth_failures > 0 {
                config.auth_failures -= 1;
                return ReadAnswer::Value(vec![0xFF, 0x00]);
            }
            ReadAnswer::Value(encode_firmware_battery(config.info.battery, &config.info.firmware).to_vec())
        }
        LIVE_DATA => ReadAnswer::Value(encode_live_reading(&config.live).to_vec()),
        DEVICE_TIME => ReadAnswer::Value(config.boot_offset.to_le_bytes().to_vec()),
        HISTORY_DATA => match sensor.mode {
            HistoryMode::Idle => ReadAnswer::Value(Vec::new()),
            HistoryMode::Count => {
                let count = config
                    .raw_entry_count
                    .clone()
                    .unwrap_or_else(|| (config.history.len() as u16).to_le_bytes().to_vec());
                ReadAnswer::Value(count)
            }
            HistoryMode::Address(index) => {
                stats.entry_reads += 1;
                if config
                    .disconnect_after
                    .is_some_and(|limit| sensor.served_entries >= limit)
                {
                    config.disconnect_after = None;
                    sensor.connected = false;
                    return ReadAnswer::LinkLost;
                }
                if let Some(times) = config.silent_entries.get_mut(&index)
                    && *times > 0
                {
                    *times -= 1;
                    return ReadAnswer::Silent;
                }
                if let Some(times) = config.corrupt_entries.get_mut(&index)
                    && *times > 0
                {
                    *times -= 1;
                    return ReadAnswer::Value(vec![0xDE, 0xAD]);
                }
                match config.history.get(usize::from(index)) {
                    Some(entry) => {
                        sensor.served_entries += 1;
                        ReadAnswer::Value(encode_history_entry(entry).to_vec())
                    }
                    None => ReadAnswer::Value(vec![0xFF; 3]),
                }
            }
        },
        _ => ReadAnswer::Value(Vec::new()),
    }
}

#[async_trait]
impl Radio for MockRadio {
    fn take_events(&self) -> Option<RadioEventReceiver> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn is_powered(&self) -> Result<bool> {
        Ok(self.lock().powered)
    }

    async fn start_scan(&self, _services: &[Uuid]) -> Result<()> {
        let announcements: Vec<_> = {
            let mut state = self.lock();
            if !state.powered {
                return Err(Error::RadioUnavailable("adapter is powered off".to_string()));
            }
            state.scanning = true;
            state.stats.scans_started += 1;
            state
                .sensors
                .values()
                .filter(|s| s.sensor.advertise && !s.connected)
                .map(|s| s.sensor.discovered_event())
                .collect()
        };
        for event in announcements {
            self.emit(event);
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut state = self.lock();
        state.scanning = false;
        state.stats.scans_stopped += 1;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        let delay = self.delay_of(peripheral);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let event = {
            let mut state = self.lock();
            let state = &mut *state;
            if !state.powered {
                return Err(Error::RadioUnavailable("adapter is powered off".to_string()));
            }
            state.stats.connects += 1;
            let sensor = state
                .sensors
                .get_mut(peripheral)
                .ok_or_else(|| Error::device_not_found(peripheral.as_str()))?;

            if sensor.sensor.unresponsive {
                None
            } else if sensor.sensor.connect_failures > 0 {
                sensor.sensor.connect_failures -= 1;
                Some(RadioEvent::ConnectFailed {
                    peripheral: peripheral.clone(),
                    reason: "connection refused".to_string(),
                })
            } else {
                sensor.connected = true;
                sensor.mode = HistoryMode::Idle;
                Some(RadioEvent::Connected {
                    peripheral: peripheral.clone(),
                })
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        {
            let mut state = self.lock();
            let state = &mut *state;
            state.stats.disconnects += 1;
            let sensor = state
                .sensors
                .get_mut(peripheral)
                .ok_or_else(|| Error::device_not_found(peripheral.as_str()))?;
            sensor.connected = false;
        }
        self.emit(RadioEvent::Disconnected {
            peripheral: peripheral.clone(),
            reason: None,
        });
        Ok(())
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<Uuid>> {
        self.with_connected(peripheral, |_, _| vec![DATA_SERVICE, HISTORY_SERVICE])
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Vec<Uuid>> {
        self.with_connected(peripheral, |sensor, _| {
            CharacteristicRole::ALL
                .into_iter()
                .filter(|role| service_of(*role) == service && sensor.sensor.missing != Some(*role))
                .map(|role| role.uuid())
                .collect()
        })
    }

    async fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.with_connected(peripheral, |sensor, stats| {
            stats.writes += 1;
            if characteristic == HISTORY_CONTROL {
                if value == HISTORY_MODE_COMMAND {
                    sensor.mode = HistoryMode::Count;
                } else if let [HISTORY_ADDRESS_OPCODE, lo, hi] = *value {
                    sensor.mode = HistoryMode::Address(u16::from_le_bytes([lo, hi]));
                }
            } else if characteristic == CONTROL {
                // mode change acknowledged
            }
        })
    }

    async fn read(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<()> {
        let delay = self.delay_of(peripheral);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let answer = self.with_connected(peripheral, |sensor, stats| {
            stats.reads += 1;
            answer_read(sensor, characteristic, stats)
        })?;
        match answer {
            ReadAnswer::Value(value) => self.emit(RadioEvent::ValueUpdated {
                peripheral: peripheral.clone(),
                characteristic,
                value,
            }),
            ReadAnswer::Silent => {}
            ReadAnswer::LinkLost => self.emit(RadioEvent::Disconnected {
                peripheral: peripheral.clone(),
                reason: Some("connection lost".to_string()),
            }),
        }
        Ok(())
    }
}
