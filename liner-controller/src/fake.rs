//! In-memory transport for tests
//!
//! Records every operation issued to it. In scripted mode (the default) the
//! test feeds completions to the controller itself, in any order it likes. A
//! simulated transport instead answers on its event channel the way a
//! healthy liner device would.

use std::collections::HashMap;

use liner_proto::ProtocolUuids;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;
use crate::registry::DeviceIdentity;
use crate::transport::{AdapterState, CharacteristicHandle, Transport, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan(Uuid),
    StopScan,
    Connect(String),
    Disconnect(String),
    DiscoverServices(String),
    DiscoverCharacteristics(String, Uuid),
    Subscribe(String, CharacteristicHandle),
    Read(String, CharacteristicHandle),
    Write(String, CharacteristicHandle, Vec<u8>),
}

struct Simulation {
    uuids: ProtocolUuids,
    events: mpsc::UnboundedSender<TransportEvent>,
    file_count: u8,
}

pub struct FakeTransport {
    state: AdapterState,
    known: HashMap<String, DeviceIdentity>,
    calls: Vec<Call>,
    scan_fails: bool,
    write_error: Option<TransportError>,
    subscribe_errors: HashMap<Uuid, TransportError>,
    simulation: Option<Simulation>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: AdapterState::PoweredOn,
            known: HashMap::new(),
            calls: Vec::new(),
            scan_fails: false,
            write_error: None,
            subscribe_errors: HashMap::new(),
            simulation: None,
        }
    }

    /// A transport that completes every operation successfully on `events`
    /// and reports `file_count` files when asked
    pub fn simulated(
        uuids: ProtocolUuids,
        events: mpsc::UnboundedSender<TransportEvent>,
        file_count: u8,
    ) -> Self {
        Self {
            simulation: Some(Simulation {
                uuids,
                events,
                file_count,
            }),
            ..Self::new()
        }
    }

    pub fn add_known(&mut self, identity: DeviceIdentity) {
        self.known.insert(identity.id.clone(), identity);
    }

    pub fn set_state(&mut self, state: AdapterState) {
        self.state = state;
    }

    pub fn fail_scan(&mut self, fail: bool) {
        self.scan_fails = fail;
    }

    pub fn fail_writes(&mut self, error: Option<TransportError>) {
        self.write_error = error;
    }

    pub fn fail_subscribe(&mut self, characteristic: Uuid, error: TransportError) {
        self.subscribe_errors.insert(characteristic, error);
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    fn reply(&self, event: impl FnOnce(&Simulation) -> TransportEvent) {
        if let Some(sim) = &self.simulation {
            let _ = sim.events.send(event(sim));
        }
    }
}

impl Transport for FakeTransport {
    fn adapter_state(&self) -> AdapterState {
        self.state
    }

    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError> {
        if self.scan_fails {
            return Err(TransportError::Failed("scan refused".to_string()));
        }
        self.calls.push(Call::StartScan(service));
        let mut known: Vec<_> = self.known.values().cloned().collect();
        known.sort_by(|a, b| a.id.cmp(&b.id));
        for identity in known {
            self.reply(|_| TransportEvent::DeviceDiscovered(identity));
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.calls.push(Call::StopScan);
    }

    fn resolve(&self, id: &str) -> Option<DeviceIdentity> {
        self.known.get(id).cloned()
    }

    fn connect(&mut self, id: &str) -> Result<(), TransportError> {
        if !self.known.contains_key(id) {
            return Err(TransportError::UnknownPeripheral(id.to_string()));
        }
        self.calls.push(Call::Connect(id.to_string()));
        self.reply(|_| TransportEvent::Connected { id: id.to_string() });
        Ok(())
    }

    fn disconnect(&mut self, id: &str) {
        self.calls.push(Call::Disconnect(id.to_string()));
    }

    fn discover_services(&mut self, id: &str) -> Result<(), TransportError> {
        self.calls.push(Call::DiscoverServices(id.to_string()));
        self.reply(|sim| TransportEvent::ServicesDiscovered {
            id: id.to_string(),
            result: Ok(vec![sim.uuids.service]),
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        id: &str,
        service: Uuid,
    ) -> Result<(), TransportError> {
        self.calls
            .push(Call::DiscoverCharacteristics(id.to_string(), service));
        self.reply(|sim| {
            let u = sim.uuids;
            TransportEvent::CharacteristicsDiscovered {
                id: id.to_string(),
                service,
                result: Ok(vec![u.command, u.data, u.mode, u.live_stream]),
            }
        });
        Ok(())
    }

    fn subscribe(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        if let Some(e) = self.subscribe_errors.get(&characteristic.uuid) {
            return Err(e.clone());
        }
        self.calls.push(Call::Subscribe(id.to_string(), characteristic));
        self.reply(|_| TransportEvent::NotificationsEnabled {
            id: id.to_string(),
            characteristic,
            result: Ok(()),
        });
        Ok(())
    }

    fn read(&mut self, id: &str, characteristic: CharacteristicHandle) -> Result<(), TransportError> {
        self.calls.push(Call::Read(id.to_string(), characteristic));
        self.reply(|_| TransportEvent::ValueUpdated {
            id: id.to_string(),
            characteristic,
            value: vec![0x01],
        });
        Ok(())
    }

    fn write(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        if let Some(e) = &self.write_error {
            return Err(e.clone());
        }
        self.calls
            .push(Call::Write(id.to_string(), characteristic, value.to_vec()));

        self.reply(|_| TransportEvent::WriteCompleted {
            id: id.to_string(),
            characteristic,
            result: Ok(()),
        });
        if value.first() == Some(&liner_proto::OP_FILE_COUNT) {
            self.reply(|sim| TransportEvent::ValueUpdated {
                id: id.to_string(),
                characteristic: CharacteristicHandle::new(sim.uuids.service, sim.uuids.data),
                value: vec![liner_proto::OP_FILE_COUNT, sim.file_count],
            });
        }
        Ok(())
    }
}
