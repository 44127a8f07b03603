//! [`Radio`] implementation backed by `btleplug`.
//!
//! btleplug exposes async request/response calls plus an adapter event
//! stream. This backend adapts both to the request-then-callback shape of
//! [`Radio`]: requests run inline and publish their outcome as a
//! [`RadioEvent`], while a background task translates adapter events
//! (discoveries, link loss, power changes).

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{self, Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flora_types::CharacteristicRole;

use crate::error::{Error, Result};
use crate::radio::{PeripheralId, Radio, RadioEvent, RadioEventReceiver, RadioEventSender, radio_channel};

/// Name prefixes of sensors that advertise without a service list.
const SENSOR_NAME_PREFIXES: [&str; 2] = ["Flower care", "Flower mate"];

/// Format a btleplug peripheral id as a string.
///
/// On macOS peripheral ids are UUIDs, elsewhere they wrap the address.
fn format_peripheral_id(id: &platform::PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// The address where the platform exposes one, the platform id otherwise.
fn create_identifier(address: &str, peripheral_id: &platform::PeripheralId) -> PeripheralId {
    if address == "00:00:00:00:00:00" {
        PeripheralId::new(format_peripheral_id(peripheral_id))
    } else {
        PeripheralId::new(address)
    }
}

#[derive(Default)]
struct Registry {
    peripherals: HashMap<PeripheralId, Peripheral>,
    ids: HashMap<platform::PeripheralId, PeripheralId>,
    /// Links we are closing ourselves; their platform event is suppressed.
    closing: HashSet<PeripheralId>,
    filter: Vec<Uuid>,
}

#[derive(Default)]
struct Shared {
    registry: Mutex<Registry>,
    scanning: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: PeripheralId, peripheral: Peripheral) {
        let mut registry = self.lock();
        registry.ids.insert(peripheral.id(), id.clone());
        registry.peripherals.insert(id, peripheral);
    }
}

/// Radio backed by the first Bluetooth adapter of the host.
pub struct BtleplugRadio {
    adapter: Adapter,
    shared: Arc<Shared>,
    tx: RadioEventSender,
    events: Mutex<Option<RadioEventReceiver>>,
    pump: JoinHandle<()>,
}

impl BtleplugRadio {
    /// Open the first adapter.
    ///
    /// Returns [`Error::RadioUnavailable`] when the host has no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::RadioUnavailable("no Bluetooth adapter found".to_string()))?;
        info!("Using adapter: {}", adapter.adapter_info().await.unwrap_or_default());

        let stream = adapter.events().await?;
        let (tx, rx) = radio_channel();
        let shared = Arc::new(Shared::default());
        let pump = tokio::spawn(pump_events(
            adapter.clone(),
            stream,
            Arc::clone(&shared),
            tx.clone(),
        ));

        Ok(Self {
            adapter,
            shared,
            tx,
            events: Mutex::new(Some(rx)),
            pump,
        })
    }

    fn emit(&self, event: RadioEvent) {
        let _ = self.tx.send(event);
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        if let Some(peripheral) = self.shared.lock().peripherals.get(id).cloned() {
            return Ok(peripheral);
        }
        for peripheral in self.adapter.peripherals().await? {
            let Some(identifier) = identify(&peripheral).await else {
                continue;
            };
            self.shared.register(identifier.clone(), peripheral.clone());
            if identifier == *id {
                return Ok(peripheral);
            }
        }
        Err(Error::device_not_found(id.as_str()))
    }

    async fn characteristic(&self, id: &PeripheralId, uuid: Uuid) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral(id).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| match CharacteristicRole::from_uuid(&uuid) {
                Some(role) => Error::characteristic_not_found(role),
                None => Error::invalid_config(format!("unknown characteristic {uuid}")),
            })?;
        Ok((peripheral, characteristic))
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn identify(peripheral: &Peripheral) -> Option<PeripheralId> {
    let properties = peripheral.properties().await.ok().flatten()?;
    Some(create_identifier(
        &properties.address.to_string(),
        &peripheral.id(),
    ))
}

async fn pump_events(
    adapter: Adapter,
    mut stream: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    shared: Arc<Shared>,
    tx: RadioEventSender,
) {
    while let Some(event) = stream.next().await {
        let translated = match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServiceDataAdvertisement { id, .. } => {
                if !shared.scanning.load(Ordering::SeqCst) {
                    continue;
                }
                discovered(&adapter, &shared, &id).await
            }
            CentralEvent::DeviceDisconnected(id) => {
                let mut registry = shared.lock();
                match registry.ids.get(&id).cloned() {
                    Some(peripheral) if !registry.closing.remove(&peripheral) => {
                        Some(RadioEvent::Disconnected {
                            peripheral,
                            reason: Some("peripheral disconnected".to_string()),
                        })
                    }
                    _ => None,
                }
            }
            CentralEvent::StateUpdate(state) => Some(RadioEvent::AdapterStateChanged {
                powered: !matches!(state, CentralState::PoweredOff),
            }),
            _ => None,
        };

        if let Some(event) = translated
            && tx.send(event).is_err()
        {
            break;
        }
    }
    debug!("Adapter event stream ended");
}

async fn discovered(
    adapter: &Adapter,
    shared: &Shared,
    id: &platform::PeripheralId,
) -> Option<RadioEvent> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok().flatten()?;

    let filter = shared.lock().filter.clone();
    let advertised = filter.is_empty()
        || filter.iter().any(|service| {
            properties.services.contains(service) || properties.service_data.contains_key(service)
        })
        || properties
            .local_name
            .as_deref()
            .is_some_and(|name| SENSOR_NAME_PREFIXES.iter().any(|p| name.starts_with(p)));
    if !advertised {
        return None;
    }

    let address = properties.address.to_string();
    let identifier = create_identifier(&address, id);
    shared.register(identifier.clone(), peripheral);
    Some(RadioEvent::Discovered {
        peripheral: identifier,
        address,
        name: properties.local_name,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl Radio for BtleplugRadio {
    fn take_events(&self) -> Option<RadioEventReceiver> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn is_powered(&self) -> Result<bool> {
        let state = self.adapter.adapter_state().await?;
        Ok(!matches!(state, CentralState::PoweredOff))
    }

    async fn start_scan(&self, services: &[Uuid]) -> Result<()> {
        self.shared.lock().filter = services.to_vec();
        self.shared.scanning.store(true, Ordering::SeqCst);
        // advertisements carry the service in service data, which the
        // platform filter does not match on every OS
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.shared.scanning.store(false, Ordering::SeqCst);
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        let handle = self.peripheral(peripheral).await?;
        self.shared.lock().closing.remove(peripheral);
        match handle.connect().await {
            Ok(()) => self.emit(RadioEvent::Connected {
                peripheral: peripheral.clone(),
            }),
            Err(e) => self.emit(RadioEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                reason: e.to_string(),
            }),
        }
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        let handle = self.peripheral(peripheral).await?;
        self.shared.lock().closing.insert(peripheral.clone());
        if let Err(e) = handle.disconnect().await {
            warn!(%peripheral, "Platform disconnect failed: {}", e);
        }
        self.emit(RadioEvent::Disconnected {
            peripheral: peripheral.clone(),
            reason: None,
        });
        Ok(())
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<Uuid>> {
        let handle = self.peripheral(peripheral).await?;
        handle.discover_services().await?;
        Ok(handle.services().into_iter().map(|s| s.uuid).collect())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Vec<Uuid>> {
        let handle = self.peripheral(peripheral).await?;
        Ok(handle
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.into_iter().map(|c| c.uuid))
            .collect())
    }

    async fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let (handle, characteristic) = self.characteristic(peripheral, characteristic).await?;
        handle
            .write(&characteristic, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<()> {
        let (handle, characteristic) = self.characteristic(peripheral, characteristic).await?;
        let value = handle.read(&characteristic).await?;
        self.emit(RadioEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            characteristic: characteristic.uuid,
            value,
        });
        Ok(())
    }
}
