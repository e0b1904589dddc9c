//! Per-device connection state

use std::fmt;

use liner_proto::ProtocolUuids;
use uuid::Uuid;

use crate::barrier::SubscriptionBarrier;
use crate::completion::Responder;
use crate::error::LinerError;
use crate::registry::DeviceIdentity;
use crate::transport::CharacteristicHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    DiscoveringServices,
    ResolvingCharacteristics,
    SubscribingNotifications,
    Ready,
    Disconnected,
}

/// The four liner characteristics by what they are used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    Command,
    Data,
    Mode,
    LiveStream,
}

impl CharacteristicRole {
    /// Roles that must have notifications enabled before a session is ready
    pub const NOTIFYING: [CharacteristicRole; 3] = [
        CharacteristicRole::Data,
        CharacteristicRole::Mode,
        CharacteristicRole::LiveStream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CharacteristicRole::Command => "command",
            CharacteristicRole::Data => "data",
            CharacteristicRole::Mode => "mode",
            CharacteristicRole::LiveStream => "liveStream",
        }
    }
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handles for all four roles, only constructed once every one was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCharacteristics {
    pub command: CharacteristicHandle,
    pub data: CharacteristicHandle,
    pub mode: CharacteristicHandle,
    pub live_stream: CharacteristicHandle,
}

impl ResolvedCharacteristics {
    /// Match discovered characteristic UUIDs of the liner service against the
    /// configured set. The error names the first missing role in the order
    /// command, data, mode, liveStream.
    pub fn resolve(uuids: &ProtocolUuids, discovered: &[Uuid]) -> Result<Self, LinerError> {
        let find = |uuid: Uuid, role: CharacteristicRole| {
            discovered
                .iter()
                .find(|&&d| d == uuid)
                .map(|&d| CharacteristicHandle::new(uuids.service, d))
                .ok_or(LinerError::CharacteristicNotFound(role))
        };

        Ok(Self {
            command: find(uuids.command, CharacteristicRole::Command)?,
            data: find(uuids.data, CharacteristicRole::Data)?,
            mode: find(uuids.mode, CharacteristicRole::Mode)?,
            live_stream: find(uuids.live_stream, CharacteristicRole::LiveStream)?,
        })
    }

    pub fn handle(&self, role: CharacteristicRole) -> CharacteristicHandle {
        match role {
            CharacteristicRole::Command => self.command,
            CharacteristicRole::Data => self.data,
            CharacteristicRole::Mode => self.mode,
            CharacteristicRole::LiveStream => self.live_stream,
        }
    }

    pub fn role_of(&self, handle: &CharacteristicHandle) -> Option<CharacteristicRole> {
        [
            CharacteristicRole::Command,
            CharacteristicRole::Data,
            CharacteristicRole::Mode,
            CharacteristicRole::LiveStream,
        ]
        .into_iter()
        .find(|&role| self.handle(role) == *handle)
    }
}

/// Everything the controller tracks for one connected (or connecting) device
#[derive(Debug)]
pub struct DeviceSession {
    pub identity: DeviceIdentity,
    pub state: ConnectionState,
    pub characteristics: Option<ResolvedCharacteristics>,
    pub barrier: SubscriptionBarrier,
    pub pending_connect: Option<Responder<()>>,
    pub pending_command: Option<Responder<()>>,
    /// Device Information Service firmware revision, if the device has one
    pub firmware_revision: Option<CharacteristicHandle>,
    pub firmware_version: Option<String>,
}

impl DeviceSession {
    pub fn new(identity: DeviceIdentity, pending_connect: Responder<()>) -> Self {
        Self {
            identity,
            state: ConnectionState::Connecting,
            characteristics: None,
            barrier: SubscriptionBarrier::new(),
            pending_connect: Some(pending_connect),
            pending_command: None,
            firmware_revision: None,
            firmware_version: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Role of `handle`, if it is one of the resolved liner characteristics
    pub fn role_of(&self, handle: &CharacteristicHandle) -> Option<CharacteristicRole> {
        self.characteristics.as_ref()?.role_of(handle)
    }
}
