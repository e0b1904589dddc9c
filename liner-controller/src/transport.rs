//! Platform BLE transport seam
//!
//! Every operation is fire-and-forget: a `Transport` either refuses to issue
//! it (returning a [`TransportError`]) or issues it and later reports the
//! outcome as a [`TransportEvent`] on the channel the runtime drains. The
//! controller never blocks on the radio.

use uuid::Uuid;

use crate::error::{LinerError, TransportError};
use crate::registry::DeviceIdentity;

/// Power/authorization state of the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unavailable,
    Disabled,
    Unauthorized,
    PoweredOn,
}

impl AdapterState {
    /// Numeric code carried by `bluetoothStateUpdate`
    pub fn code(self) -> u8 {
        match self {
            AdapterState::Unavailable => 0,
            AdapterState::Disabled => 1,
            AdapterState::PoweredOn => 2,
            AdapterState::Unauthorized => 3,
        }
    }

    pub fn check(self) -> Result<(), LinerError> {
        match self {
            AdapterState::PoweredOn => Ok(()),
            AdapterState::Unavailable => Err(LinerError::AdapterUnavailable),
            AdapterState::Disabled => Err(LinerError::AdapterDisabled),
            AdapterState::Unauthorized => Err(LinerError::PermissionDenied),
        }
    }
}

/// A characteristic as addressed on the wire: its service plus its own UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
}

impl CharacteristicHandle {
    pub fn new(service: Uuid, uuid: Uuid) -> Self {
        Self { service, uuid }
    }
}

/// Completions and unsolicited notifications from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AdapterStateChanged(AdapterState),
    DeviceDiscovered(DeviceIdentity),
    ScanFailed(String),
    Connected {
        id: String,
    },
    ConnectFailed {
        id: String,
        reason: String,
    },
    Disconnected {
        id: String,
    },
    ServicesDiscovered {
        id: String,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        id: String,
        service: Uuid,
        result: Result<Vec<Uuid>, String>,
    },
    NotificationsEnabled {
        id: String,
        characteristic: CharacteristicHandle,
        result: Result<(), String>,
    },
    WriteCompleted {
        id: String,
        characteristic: CharacteristicHandle,
        result: Result<(), String>,
    },
    /// A notification or the answer to a read
    ValueUpdated {
        id: String,
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
    },
    ReadFailed {
        id: String,
        characteristic: CharacteristicHandle,
        reason: String,
    },
}

pub trait Transport {
    fn adapter_state(&self) -> AdapterState;

    /// Start an unbounded discovery window filtered by `service`
    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError>;

    fn stop_scan(&mut self);

    /// Look up a peripheral the platform already knows about, discovered or not
    fn resolve(&self, id: &str) -> Option<DeviceIdentity>;

    fn connect(&mut self, id: &str) -> Result<(), TransportError>;

    /// Cancel a pending or established connection. Safe to call on any id.
    fn disconnect(&mut self, id: &str);

    fn discover_services(&mut self, id: &str) -> Result<(), TransportError>;

    fn discover_characteristics(&mut self, id: &str, service: Uuid)
    -> Result<(), TransportError>;

    fn subscribe(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
    ) -> Result<(), TransportError>;

    fn read(&mut self, id: &str, characteristic: CharacteristicHandle)
    -> Result<(), TransportError>;

    /// Write with response
    fn write(
        &mut self,
        id: &str,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Hardware address, where the platform exposes one
    fn mac_address(&self, _id: &str) -> Option<String> {
        None
    }
}
