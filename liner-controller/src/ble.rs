//! btleplug backed [`Transport`] (Mac/Linux/Windows)
//!
//! Each operation spawns a short task on the tokio runtime and reports its
//! outcome on the transport event channel. Peripherals are keyed by their
//! address, or by the platform identifier where the address is hidden
//! (CoreBluetooth). The adapter's power state is cached from btleplug's
//! state updates so [`Transport::adapter_state`] stays synchronous.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use log::*;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;
use crate::registry::DeviceIdentity;
use crate::transport::{AdapterState, CharacteristicHandle, Transport, TransportEvent};

struct Known {
    peripheral: Peripheral,
    name: Option<String>,
}

type Peripherals = Arc<Mutex<HashMap<String, Known>>>;
type SharedState = Arc<Mutex<AdapterState>>;

/// How long a freshly opened adapter may report an unknown state
const STATE_SETTLE: Duration = Duration::from_secs(3);

fn lock<T>(shared: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn from_central(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::Disabled,
        _ => AdapterState::Unavailable,
    }
}

/// CoreBluetooth starts out `Unknown` until its delegate settles
async fn initial_state(adapter: &Adapter) -> AdapterState {
    let deadline = tokio::time::Instant::now() + STATE_SETTLE;
    loop {
        match adapter.adapter_state().await {
            Ok(CentralState::Unknown) if tokio::time::Instant::now() < deadline => {
                trace!("adapter state unknown, waiting");
            }
            Ok(state) => return from_central(state),
            Err(e) => {
                warn!("failed to read adapter state: {e}");
                return AdapterState::Unavailable;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn transport_error(e: btleplug::Error) -> TransportError {
    match e {
        btleplug::Error::PermissionDenied => TransportError::PermissionDenied,
        other => TransportError::Failed(other.to_string()),
    }
}

/// Get the default Bluetooth adapter, if the machine has one
pub async fn get_adapter() -> Result<Option<Adapter>, TransportError> {
    let manager = Manager::new().await.map_err(transport_error)?;
    let adapters = manager.adapters().await.map_err(transport_error)?;
    Ok(adapters.into_iter().next())
}

fn peripheral_key(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        format!("{:?}", peripheral.id())
    } else {
        address.to_string()
    }
}

async fn remember(peripherals: &Peripherals, peripheral: Peripheral) -> DeviceIdentity {
    let name = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|props| props.local_name);
    let id = peripheral_key(&peripheral);
    lock(peripherals).insert(
        id.clone(),
        Known {
            peripheral,
            name: name.clone(),
        },
    );
    DeviceIdentity::new(id, name)
}

fn find_characteristic(
    peripheral: &Peripheral,
    handle: CharacteristicHandle,
) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service)
}

pub struct BtleplugTransport {
    adapter: Option<Adapter>,
    events: mpsc::UnboundedSender<TransportEvent>,
    peripherals: Peripherals,
    state: SharedState,
    runtime: Handle,
}

impl BtleplugTransport {
    /// Open the default adapter and start watching it. A machine without an
    /// adapter still gets a transport, one that reports `Unavailable`.
    ///
    /// Peripherals the platform already knows are resolvable for `connect`
    /// right away, without waiting for a scan to announce them again.
    pub async fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Result<Self, TransportError> {
        let adapter = get_adapter().await?;
        let peripherals = Peripherals::default();
        let state = SharedState::new(Mutex::new(AdapterState::Unavailable));

        match &adapter {
            Some(adapter) => {
                // Subscribe first so no state change slips in before the watch
                let central_events = adapter.events().await.map_err(transport_error)?;
                let initial = initial_state(adapter).await;
                info!("adapter state {initial:?}");
                *lock(&state) = initial;

                match adapter.peripherals().await {
                    Ok(cached) => {
                        for peripheral in cached {
                            remember(&peripherals, peripheral).await;
                        }
                        debug!("{} peripherals already known", lock(&peripherals).len());
                    }
                    Err(e) => warn!("failed to list known peripherals: {e}"),
                }

                tokio::spawn(watch_central(
                    adapter.clone(),
                    central_events,
                    peripherals.clone(),
                    state.clone(),
                    events.clone(),
                ));
            }
            None => warn!("no bluetooth adapter found"),
        }

        Ok(Self {
            adapter,
            events,
            peripherals,
            state,
            runtime: Handle::current(),
        })
    }

    fn adapter(&self) -> Result<Adapter, TransportError> {
        self.adapter
            .clone()
            .ok_or(TransportError::AdapterUnavailable)
    }

    fn peripheral(&self, id: &str) -> Result<Peripheral, TransportError> {
        lock(&self.peripherals)
            .get(id)
            .map(|known| known.peripheral.clone())
            .ok_or_else(|| TransportError::UnknownPeripheral(id.to_string()))
    }

    fn characteristic(
        &self,
        id: &str,
        handle: CharacteristicHandle,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral(id)?;
        let characteristic = find_characteristic(&peripheral, handle).ok_or_else(|| {
            TransportError::Failed(format!("characteristic {} not discovered", handle.uuid))
        })?;
        Ok((peripheral, characteristic))
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

impl Transport for BtleplugTransport {
    fn adapter_state(&self) -> AdapterState {
        *lock(&self.state)
    }

    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError> {
        let adapter = self.adapter()?;
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let filter = ScanFilter {
                services: vec![service],
            };
            if let Err(e) = adapter.start_scan(filter).await {
                let _ = events.send(TransportEvent::ScanFailed(e.to_string()));
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) {
        let Ok(adapter) = self.adapter() else {
            return;
        };
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("failed to stop scan: {e}");
            }
        });
    }

    fn resolve(&self, id: &str) -> Option<DeviceIdentity> {
        lock(&self.peripherals)
            .get(id)
            .map(|known| DeviceIdentity::new(id, known.name.clone()))
    }

    fn connect(&mut self, id: &str) -> Result<(), TransportError> {
        let peripheral = self.peripheral(id)?;
        let events = self.events.clone();
        let id = id.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.connect().await {
                let _ = events.send(TransportEvent::ConnectFailed {
                    id,
                    reason: e.to_string(),
                });
                return;
            }

            // Listen before anything is subscribed so no notification is missed
            match peripheral.notifications().await {
                Ok(stream) => {
                    tokio::spawn(pump_notifications(
                        id.clone(),
                        peripheral.clone(),
                        stream,
                        events.clone(),
                    ));
                }
                Err(e) => warn!("[{id}] no notification stream: {e}"),
            }
            let _ = events.send(TransportEvent::Connected { id });
        });
        Ok(())
    }

    fn disconnect(&mut self, id: &str) {
        let Ok(peripheral) = self.peripheral(id) else {
            return;
        };
        let id = id.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("[{id}] disconnect: {e}");
            }
        });
    }

    fn discover_services(&mut self, id: &str) -> Result<(), TransportError> {
        let peripheral = self.peripheral(id)?;
        let events = self.events.clone();
        let id = id.to_string();
        self.runtime.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral.services().iter().map(|s| s.uuid).collect()),
                Err(e) => Err(e.to_string()),
            };
            let _ = events.send(TransportEvent::ServicesDiscovered { id, result });
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        id: &str,
        service: Uuid,
    ) -> Result<(), TransportError> {
        // btleplug resolves characteristics together with services
        let peripheral = self.peripheral(id)?;
        let result = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .map(|s| s.characteristics.iter().map(|c| c.uuid).collect())
            .ok_or_else(|| format!("service {service} not discovered"));
        self.send(TransportEvent::CharacteristicsDiscovered {
            id: id.to_string(),
            service,
            result,
        });
        Ok(())
    }

    fn subscribe(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let (peripheral, target) = self.characteristic(id, characteristic)?;
        let events = self.events.clone();
        let id = id.to_string();
        self.runtime.spawn(async move {
            let result = peripheral.subscribe(&target).await.map_err(|e| e.to_string());
            let _ = events.send(TransportEvent::NotificationsEnabled {
                id,
                characteristic,
                result,
            });
        });
        Ok(())
    }

    fn read(&mut self, id: &str, characteristic: CharacteristicHandle) -> Result<(), TransportError> {
        let (peripheral, target) = self.characteristic(id, characteristic)?;
        let events = self.events.clone();
        let id = id.to_string();
        self.runtime.spawn(async move {
            let event = match peripheral.read(&target).await {
                Ok(value) => TransportEvent::ValueUpdated {
                    id,
                    characteristic,
                    value,
                },
                Err(e) => TransportEvent::ReadFailed {
                    id,
                    characteristic,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    fn write(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let (peripheral, target) = self.characteristic(id, characteristic)?;
        let events = self.events.clone();
        let id = id.to_string();
        let value = value.to_vec();
        self.runtime.spawn(async move {
            let result = peripheral
                .write(&target, &value, WriteType::WithResponse)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(TransportEvent::WriteCompleted {
                id,
                characteristic,
                result,
            });
        });
        Ok(())
    }

    fn mac_address(&self, id: &str) -> Option<String> {
        let address = self.peripheral(id).ok()?.address();
        (address != BDAddr::default()).then(|| address.to_string())
    }
}

async fn watch_central<S>(
    adapter: Adapter,
    mut central_events: S,
    peripherals: Peripherals,
    state: SharedState,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = central_events.next().await {
        match event {
            // Cached peripherals may only ever be announced as updates
            CentralEvent::DeviceDiscovered(peripheral_id)
            | CentralEvent::DeviceUpdated(peripheral_id) => {
                let Ok(peripheral) = adapter.peripheral(&peripheral_id).await else {
                    continue;
                };
                let identity = remember(&peripherals, peripheral).await;
                let _ = events.send(TransportEvent::DeviceDiscovered(identity));
            }
            CentralEvent::DeviceDisconnected(peripheral_id) => {
                if let Some(id) = key_for(&peripherals, &peripheral_id) {
                    let _ = events.send(TransportEvent::Disconnected { id });
                }
            }
            CentralEvent::StateUpdate(central_state) => {
                update_state(&state, &events, from_central(central_state));
            }
            _ => {}
        }
    }
    warn!("adapter event stream ended");
    update_state(&state, &events, AdapterState::Unavailable);
}

/// Cache `next` and forward it when it differs from what was reported last
fn update_state(
    state: &SharedState,
    events: &mpsc::UnboundedSender<TransportEvent>,
    next: AdapterState,
) {
    let previous = std::mem::replace(&mut *lock(state), next);
    if previous != next {
        info!("adapter state {previous:?} -> {next:?}");
        let _ = events.send(TransportEvent::AdapterStateChanged(next));
    }
}

fn key_for(peripherals: &Peripherals, peripheral_id: &PeripheralId) -> Option<String> {
    lock(peripherals)
        .iter()
        .find(|(_, known)| known.peripheral.id() == *peripheral_id)
        .map(|(id, _)| id.clone())
}

async fn pump_notifications<S>(
    id: String,
    peripheral: Peripheral,
    mut stream: S,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: Stream<Item = ValueNotification> + Unpin,
{
    while let Some(notification) = stream.next().await {
        let Some(service) = peripheral
            .characteristics()
            .iter()
            .find(|c| c.uuid == notification.uuid)
            .map(|c| c.service_uuid)
        else {
            continue;
        };
        let event = TransportEvent::ValueUpdated {
            id: id.clone(),
            characteristic: CharacteristicHandle::new(service, notification.uuid),
            value: notification.value,
        };
        if events.send(event).is_err() {
            break;
        }
    }
    debug!("[{id}] notification stream ended");
}
