//! The single-writer connection and protocol engine
//!
//! A [`Controller`] owns the scan registry and one [`DeviceSession`] per
//! connected device. Callers and the transport both go through `&mut self`,
//! so every state transition happens on one logical thread; the runtime task
//! in [`crate::runtime`] is that thread in production.
//!
//! Connect pipeline, driven by transport events:
//!
//! ```text
//! connect() -> Connecting -> DiscoveringServices -> ResolvingCharacteristics
//!           -> SubscribingNotifications -(barrier)-> Ready
//! ```
//!
//! Any failure along the way resolves the caller's connect with the specific
//! error before the session is torn down.

use std::collections::HashMap;

use data_encoding::HEXLOWER;
use liner_proto::ble::{DEVICE_INFORMATION_SERVICE_UUID, FIRMWARE_REVISION_UUID};
use liner_proto::{Command, ProtocolUuids, Response};
use log::*;
use uuid::Uuid;

use crate::barrier::BarrierOutcome;
use crate::completion::{Completion, Responder, completion};
use crate::error::LinerError;
use crate::event::{Event, EventSink, GENERAL};
use crate::registry::{DeviceIdentity, ScanRegistry};
use crate::session::{
    CharacteristicRole, ConnectionState, DeviceSession, ResolvedCharacteristics,
};
use crate::transport::{AdapterState, CharacteristicHandle, Transport, TransportEvent};

/// Which service a scan filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanTarget {
    #[default]
    Default,
    /// Devices sitting in firmware update mode
    AlternateTarget,
}

pub struct Controller<T: Transport> {
    transport: T,
    sink: EventSink,
    uuids: Option<ProtocolUuids>,
    registry: ScanRegistry,
    sessions: HashMap<String, DeviceSession>,
    /// Generation of the running scan window
    scan: Option<u64>,
    scan_generation: u64,
}

impl<T: Transport> Controller<T> {
    pub fn new(transport: T, sink: EventSink) -> Self {
        Self {
            transport,
            sink,
            uuids: None,
            registry: ScanRegistry::new(),
            sessions: HashMap::new(),
            scan: None,
            scan_generation: 0,
        }
    }

    /// Initialize from the positional UUID list
    /// `[service, command, data, mode, liveStream, alternateTarget?]`
    pub fn initialize<S: AsRef<str>>(&mut self, uuids: &[S]) -> Result<(), LinerError> {
        let uuids = ProtocolUuids::from_strings(uuids)
            .map_err(|e| LinerError::InvalidArgument(e.to_string()))?;
        self.initialize_with(uuids)
    }

    pub fn initialize_with(&mut self, uuids: ProtocolUuids) -> Result<(), LinerError> {
        if !self.sessions.is_empty() && self.uuids != Some(uuids) {
            return Err(LinerError::InvalidArgument(
                "cannot change UUIDs while devices are connected".to_string(),
            ));
        }

        let state = self.transport.adapter_state();
        self.sink.emit(Event::BluetoothStateUpdate(state.code()));
        state.check()?;

        info!("initialized, liner service {}", uuids.service);
        self.uuids = Some(uuids);
        Ok(())
    }

    fn initialized(&self) -> Result<ProtocolUuids, LinerError> {
        self.uuids.ok_or(LinerError::NotInitialized)
    }

    /// Open a discovery window. Returns `false` if one is already open.
    ///
    /// The window has no end of its own; the runtime arms a timer for the
    /// generation reported by [`Controller::current_scan`].
    pub fn scan(&mut self, target: ScanTarget) -> Result<bool, LinerError> {
        let uuids = self.initialized()?;
        if self.scan.is_some() {
            debug!("scan already running");
            return Ok(false);
        }

        let service = match target {
            ScanTarget::Default => uuids.service,
            ScanTarget::AlternateTarget => uuids.alternate_target.ok_or_else(|| {
                LinerError::InvalidArgument("no alternate target UUID configured".to_string())
            })?,
        };

        self.transport.adapter_state().check()?;
        self.transport.start_scan(service).map_err(|e| {
            e.classify(|reason| {
                warn!("cannot start scan: {reason}");
                LinerError::AdapterUnavailable
            })
        })?;

        self.registry.clear();
        self.emit_detected_devices();

        self.scan_generation += 1;
        self.scan = Some(self.scan_generation);
        info!("scanning for {service} (generation {})", self.scan_generation);
        Ok(true)
    }

    pub fn current_scan(&self) -> Option<u64> {
        self.scan
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    /// Stop discovery, keeping what was found. `false` if nothing was running.
    pub fn stop_scan(&mut self) -> bool {
        if self.scan.take().is_none() {
            return false;
        }
        self.transport.stop_scan();
        info!("scan stopped, {} devices found", self.registry.len());
        true
    }

    /// Auto-stop for the window opened as `generation`; later windows are left alone
    pub fn scan_expired(&mut self, generation: u64) -> bool {
        if self.scan == Some(generation) {
            self.stop_scan()
        } else {
            false
        }
    }

    pub fn detected_devices(&self) -> Vec<DeviceIdentity> {
        self.registry.snapshot()
    }

    pub fn connect(&mut self, id: &str) -> Completion<()> {
        let (responder, completion) = completion();
        self.begin_connect(id, responder);
        completion
    }

    pub(crate) fn begin_connect(&mut self, id: &str, responder: Responder<()>) {
        if let Err(e) = self.initialized() {
            return responder.resolve(Err(e));
        }
        if self.sessions.contains_key(id) {
            return responder.resolve(Err(LinerError::AlreadyConnected(id.to_string())));
        }
        if let Err(e) = self.transport.adapter_state().check() {
            return responder.resolve(Err(e));
        }

        let identity = match self
            .registry
            .get(id)
            .cloned()
            .or_else(|| self.transport.resolve(id))
        {
            Some(identity) => identity,
            None => return responder.resolve(Err(LinerError::DeviceNotFound(id.to_string()))),
        };

        if let Err(e) = self.transport.connect(id) {
            return responder.resolve(Err(e.classify(LinerError::ConnectionFailed)));
        }

        info!("connecting to {id}");
        self.sessions
            .insert(id.to_string(), DeviceSession::new(identity, responder));
    }

    /// Caller initiated disconnect; the session is gone when this returns
    pub fn disconnect(&mut self, id: &str) -> Result<(), LinerError> {
        if !self.sessions.contains_key(id) {
            return Err(LinerError::DeviceNotConnected(id.to_string()));
        }
        info!("disconnecting {id}");
        self.transport.disconnect(id);
        self.teardown(id);
        Ok(())
    }

    /// Read the mode characteristic; the value arrives as `updateDeviceState`
    pub fn check_mode(&mut self, id: &str) -> Result<(), LinerError> {
        let handle = self.ready_characteristics(id)?.mode;
        self.transport
            .read(id, handle)
            .map_err(|e| e.classify(LinerError::ConnectionFailed))
    }

    pub fn send_command(&mut self, id: &str, payload: &[u8]) -> Completion<()> {
        let (responder, completion) = completion();
        self.begin_command(id, payload, responder);
        completion
    }

    pub fn send(&mut self, id: &str, command: Command) -> Completion<()> {
        self.send_command(id, &command.to_bytes())
    }

    pub(crate) fn begin_command(&mut self, id: &str, payload: &[u8], responder: Responder<()>) {
        if payload.is_empty() {
            return responder.resolve(Err(LinerError::InvalidArgument(
                "empty command".to_string(),
            )));
        }

        let Some(session) = self.sessions.get_mut(id).filter(|s| s.is_ready()) else {
            return responder.resolve(Err(LinerError::DeviceNotConnected(id.to_string())));
        };
        if session.pending_command.is_some() {
            return responder.resolve(Err(LinerError::Busy(id.to_string())));
        }
        let Some(characteristics) = session.characteristics else {
            return responder.resolve(Err(LinerError::DeviceNotConnected(id.to_string())));
        };

        trace!("[{id}] write {}", HEXLOWER.encode(payload));
        match self.transport.write(id, characteristics.command, payload) {
            Ok(()) => session.pending_command = Some(responder),
            Err(e) => responder.resolve(Err(e.classify(LinerError::WriteFailed))),
        }
    }

    /// Hardware address of a connected device; platforms that hide it report the id
    pub fn mac_address(&self, id: &str) -> Option<String> {
        self.sessions.get(id)?;
        self.transport
            .mac_address(id)
            .or_else(|| Some(id.to_string()))
    }

    pub fn firmware_version(&self, id: &str) -> Option<String> {
        self.sessions.get(id)?.firmware_version.clone()
    }

    /// State of `id`; ids without a session are `Discovered` if the current
    /// scan saw them and `Disconnected` otherwise
    pub fn connection_state(&self, id: &str) -> ConnectionState {
        match self.sessions.get(id) {
            Some(session) => session.state,
            None if self.registry.contains(id) => ConnectionState::Discovered,
            None => ConnectionState::Disconnected,
        }
    }

    pub fn connected_devices(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drop every link, failing whatever is pending
    pub fn shutdown(&mut self) {
        self.stop_scan();
        for id in self.connected_devices() {
            self.transport.disconnect(&id);
            self.teardown(&id);
        }
    }

    fn ready_characteristics(&self, id: &str) -> Result<ResolvedCharacteristics, LinerError> {
        self.sessions
            .get(id)
            .filter(|s| s.is_ready())
            .and_then(|s| s.characteristics)
            .ok_or_else(|| LinerError::DeviceNotConnected(id.to_string()))
    }

    fn emit_detected_devices(&self) {
        self.sink
            .emit(Event::UpdateDetectedDevices(self.registry.snapshot()));
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            TransportEvent::DeviceDiscovered(identity) => self.on_discovered(identity),
            TransportEvent::ScanFailed(reason) => {
                warn!("scan failed: {reason}");
                self.scan = None;
                self.sink.diagnostic(GENERAL, format!("Scan failed: {reason}"));
            }
            TransportEvent::Connected { id } => self.on_connected(&id),
            TransportEvent::ConnectFailed { id, reason } => {
                if session_in(&mut self.sessions, &id, ConnectionState::Connecting).is_some() {
                    self.fail_connection(&id, LinerError::ConnectionFailed(reason));
                }
            }
            TransportEvent::Disconnected { id } => match self.sessions.get(&id) {
                // A link that never came up fails through ConnectFailed, so
                // this belongs to a link torn down before the reconnect
                Some(session) if session.state == ConnectionState::Connecting => {
                    debug!("[{id}] stale disconnect while connecting, ignored");
                }
                Some(_) => {
                    info!("[{id}] link lost");
                    self.teardown(&id);
                }
                None => debug!("[{id}] disconnect for unknown device"),
            },
            TransportEvent::ServicesDiscovered { id, result } => {
                self.on_services_discovered(&id, result)
            }
            TransportEvent::CharacteristicsDiscovered {
                id,
                service,
                result,
            } => self.on_characteristics_discovered(&id, service, result),
            TransportEvent::NotificationsEnabled {
                id,
                characteristic,
                result,
            } => self.on_notifications_enabled(&id, characteristic, result),
            TransportEvent::WriteCompleted {
                id,
                characteristic,
                result,
            } => self.on_write_completed(&id, characteristic, result),
            TransportEvent::ValueUpdated {
                id,
                characteristic,
                value,
            } => self.on_value(&id, characteristic, value),
            TransportEvent::ReadFailed {
                id,
                characteristic,
                reason,
            } => {
                if self.sessions.contains_key(&id) {
                    self.sink.diagnostic(
                        &id,
                        format!("Failed to read {}: {reason}", characteristic.uuid),
                    );
                }
            }
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        self.sink.emit(Event::BluetoothStateUpdate(state.code()));
        if state == AdapterState::PoweredOn {
            info!("adapter powered on");
            return;
        }

        warn!("adapter went {state:?}, dropping {} sessions", self.sessions.len());
        self.scan = None;
        for id in self.connected_devices() {
            self.teardown(&id);
        }
        self.registry.clear();
        self.emit_detected_devices();
    }

    fn on_discovered(&mut self, identity: DeviceIdentity) {
        if self.scan.is_none() {
            trace!("[{}] discovered outside a scan window", identity.id);
            return;
        }
        debug!("discovered {} {:?}", identity.id, identity.name);
        if self.registry.insert(identity) {
            self.emit_detected_devices();
        }
    }

    fn on_connected(&mut self, id: &str) {
        let Some(session) = session_in(&mut self.sessions, id, ConnectionState::Connecting) else {
            return;
        };
        session.state = ConnectionState::DiscoveringServices;
        info!("[{id}] connected, discovering services");

        if let Err(e) = self.transport.discover_services(id) {
            self.fail_connection(id, e.classify(LinerError::ConnectionFailed));
        }
    }

    fn on_services_discovered(&mut self, id: &str, result: Result<Vec<Uuid>, String>) {
        let Ok(uuids) = self.initialized() else {
            return;
        };
        let Some(session) =
            session_in(&mut self.sessions, id, ConnectionState::DiscoveringServices)
        else {
            return;
        };

        let services = match result {
            Ok(services) => services,
            Err(reason) => {
                return self.fail_connection(
                    id,
                    LinerError::ConnectionFailed(format!("service discovery failed: {reason}")),
                );
            }
        };
        if !services.contains(&uuids.service) {
            return self.fail_connection(id, LinerError::ServiceNotFound);
        }

        session.state = ConnectionState::ResolvingCharacteristics;
        if let Err(e) = self.transport.discover_characteristics(id, uuids.service) {
            return self.fail_connection(id, e.classify(LinerError::ConnectionFailed));
        }

        if services.contains(&DEVICE_INFORMATION_SERVICE_UUID)
            && let Err(e) = self
                .transport
                .discover_characteristics(id, DEVICE_INFORMATION_SERVICE_UUID)
        {
            debug!("[{id}] skipping device information: {e}");
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        id: &str,
        service: Uuid,
        result: Result<Vec<Uuid>, String>,
    ) {
        if service == DEVICE_INFORMATION_SERVICE_UUID {
            return self.on_device_information(id, result);
        }

        let Ok(uuids) = self.initialized() else {
            return;
        };
        if service != uuids.service {
            debug!("[{id}] characteristics for unrelated service {service}");
            return;
        }
        let Some(session) =
            session_in(&mut self.sessions, id, ConnectionState::ResolvingCharacteristics)
        else {
            return;
        };

        let resolved = match result
            .map_err(|reason| {
                LinerError::ConnectionFailed(format!("characteristic discovery failed: {reason}"))
            })
            .and_then(|found| ResolvedCharacteristics::resolve(&uuids, &found))
        {
            Ok(resolved) => resolved,
            Err(e) => return self.fail_connection(id, e),
        };

        session.characteristics = Some(resolved);
        session.state = ConnectionState::SubscribingNotifications;
        debug!("[{id}] characteristics resolved, enabling notifications");

        let mut failed = None;
        for role in CharacteristicRole::NOTIFYING {
            if let Err(e) = self.transport.subscribe(id, resolved.handle(role)) {
                warn!("[{id}] cannot subscribe to {role}: {e}");
                if let BarrierOutcome::Failed(role) = session.barrier.record(role, false) {
                    failed = Some(role);
                    break;
                }
            }
        }
        if let Some(role) = failed {
            self.fail_connection(id, LinerError::NotificationSetupFailed(role));
        }
    }

    /// Firmware revision lookup; never affects readiness
    fn on_device_information(&mut self, id: &str, result: Result<Vec<Uuid>, String>) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        match result {
            Ok(found) if found.contains(&FIRMWARE_REVISION_UUID) => {
                let handle = CharacteristicHandle::new(
                    DEVICE_INFORMATION_SERVICE_UUID,
                    FIRMWARE_REVISION_UUID,
                );
                session.firmware_revision = Some(handle);
                if let Err(e) = self.transport.read(id, handle) {
                    debug!("[{id}] cannot read firmware revision: {e}");
                }
            }
            Ok(_) => debug!("[{id}] no firmware revision characteristic"),
            Err(reason) => debug!("[{id}] device information discovery failed: {reason}"),
        }
    }

    fn on_notifications_enabled(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
        result: Result<(), String>,
    ) {
        let Some(session) =
            session_in(&mut self.sessions, id, ConnectionState::SubscribingNotifications)
        else {
            return;
        };
        let Some(role) = session.role_of(&characteristic) else {
            return;
        };
        if let Err(reason) = &result {
            warn!("[{id}] enabling {role} notifications failed: {reason}");
        }

        match session.barrier.record(role, result.is_ok()) {
            BarrierOutcome::Ready => {
                session.state = ConnectionState::Ready;
                if let Some(responder) = session.pending_connect.take() {
                    responder.resolve(Ok(()));
                }
                info!("[{id}] ready");
                self.sink.emit(Event::ConnectionComplete(id.to_string()));
            }
            BarrierOutcome::Failed(role) => {
                self.fail_connection(id, LinerError::NotificationSetupFailed(role))
            }
            BarrierOutcome::Waiting => debug!("[{id}] {role} notifications enabled"),
            BarrierOutcome::Ignored => {}
        }
    }

    fn on_write_completed(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
        result: Result<(), String>,
    ) {
        let Some(session) = self.sessions.get_mut(id) else {
            debug!("[{id}] write completion for unknown device");
            return;
        };
        if session.role_of(&characteristic) != Some(CharacteristicRole::Command) {
            return;
        }
        match session.pending_command.take() {
            Some(responder) => responder.resolve(result.map_err(LinerError::WriteFailed)),
            None => debug!("[{id}] write completion without a pending command"),
        }
    }

    fn on_value(&mut self, id: &str, characteristic: CharacteristicHandle, value: Vec<u8>) {
        let Some(session) = self.sessions.get_mut(id) else {
            trace!("[{id}] value for unknown device");
            return;
        };

        if session.firmware_revision == Some(characteristic) {
            let version = String::from_utf8_lossy(&value)
                .trim_end_matches('\0')
                .trim()
                .to_string();
            info!("[{id}] firmware {version}");
            session.firmware_version = Some(version.clone());
            self.sink.emit(Event::FirmwareVersionRead {
                id: id.to_string(),
                version,
            });
            return;
        }

        match session.role_of(&characteristic) {
            Some(CharacteristicRole::Data) => self.on_data_frame(id, &value),
            Some(CharacteristicRole::Mode) => match liner_proto::decode_device_state(&value) {
                Some(state) => self.sink.emit(Event::UpdateDeviceState {
                    id: id.to_string(),
                    state,
                }),
                None => self.sink.diagnostic(id, "Empty mode value"),
            },
            Some(CharacteristicRole::LiveStream) => self.sink.emit(Event::LiveStreamPacket {
                id: id.to_string(),
                packet: value,
            }),
            Some(CharacteristicRole::Command) | None => {
                trace!("[{id}] value on {}", characteristic.uuid)
            }
        }
    }

    fn on_data_frame(&mut self, id: &str, frame: &[u8]) {
        trace!("[{id}] data {}", HEXLOWER.encode(frame));
        match liner_proto::decode_response(frame) {
            Ok(response) => {
                let (event, summary) = response_event(id, response);
                self.sink.diagnostic(id, summary);
                self.sink.emit(event);
            }
            Err(reason) => match reason.diagnostic() {
                Some(message) => self.sink.diagnostic(id, message),
                None => trace!("[{id}] dropped frame: {reason:?}"),
            },
        }
    }

    /// Resolve the pending connect with `error`, cancel the link and tear down
    fn fail_connection(&mut self, id: &str, error: LinerError) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        warn!("[{id}] connection failed: {error}");
        if let Some(responder) = session.pending_connect.take() {
            responder.resolve(Err(error));
        }
        self.transport.disconnect(id);
        self.teardown(id);
    }

    /// Remove the session, fail what is still pending, then announce it.
    /// The announcement always comes after the responders are resolved.
    fn teardown(&mut self, id: &str) {
        let Some(mut session) = self.sessions.remove(id) else {
            return;
        };

        if let Some(responder) = session.pending_connect.take() {
            responder.resolve(Err(LinerError::ConnectionFailed(
                "disconnected during connection setup".to_string(),
            )));
        }
        if let Some(responder) = session.pending_command.take() {
            responder.resolve(Err(LinerError::DeviceNotConnected(id.to_string())));
        }

        self.sink.emit(Event::DeviceDisconnected(id.to_string()));
    }
}

/// Session for `id` if it is in `expected`; anything else is a stale callback
fn session_in<'a>(
    sessions: &'a mut HashMap<String, DeviceSession>,
    id: &str,
    expected: ConnectionState,
) -> Option<&'a mut DeviceSession> {
    match sessions.get_mut(id) {
        Some(session) if session.state == expected => Some(session),
        Some(session) => {
            debug!(
                "[{id}] ignoring event in state {:?}, expected {expected:?}",
                session.state
            );
            None
        }
        None => {
            debug!("[{id}] ignoring event for unknown device");
            None
        }
    }
}

/// Event for a decoded reply plus a one-line summary for the diagnostic stream
fn response_event(id: &str, response: Response) -> (Event, String) {
    let id = id.to_string();
    match response {
        Response::FileCount { count } => (
            Event::FileCountResponse { id, count },
            format!("Device has {count} files"),
        ),
        Response::FileDataChunk { chunk, is_complete } => {
            let summary = format!("Received file data chunk ({} bytes)", chunk.len());
            (
                Event::FileDataChunk {
                    id,
                    chunk,
                    is_complete,
                },
                summary,
            )
        }
        Response::SummaryFile { data } => {
            let summary = format!("Received summary file ({} bytes)", data.len());
            (Event::SummaryFileResponse { id, data }, summary)
        }
        Response::FileOperationComplete { operation, success } => (
            Event::FileOperationComplete {
                id,
                operation,
                success,
            },
            format!(
                "File operation {}: {}",
                operation.as_str(),
                if success { "success" } else { "failed" }
            ),
        ),
        Response::LoggingStatus {
            is_logging,
            data_types,
        } => (
            Event::LoggingStatusUpdate {
                id,
                is_logging,
                data_types,
            },
            format!(
                "Logging status update: {} with data types: {}",
                if is_logging { "started" } else { "stopped" },
                data_types.0
            ),
        ),
    }
}
