//! BLE GATT service layout for liner devices
//!
//! The liner service and its four characteristics are not fixed in firmware
//! builds, so the host supplies them once at initialization as a
//! [`ProtocolUuids`] set. The standard Device Information Service constants
//! used for the firmware revision read live here too.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device Information Service (0x180A)
pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);

/// Firmware Revision String characteristic (0x2A26)
pub const FIRMWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);

/// Highest device state the mode characteristic may legitimately report
pub const MAX_DEVICE_STATE: u8 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UuidError {
    #[error("expected at least 5 UUIDs (service, command, data, mode, liveStream), got {0}")]
    TooFew(usize),
    #[error("invalid UUID {value:?}: {reason}")]
    Invalid { value: String, reason: String },
}

/// The GATT layout a liner device exposes
///
/// Shared read-only by every device session once initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolUuids {
    pub service: Uuid,
    /// Write-with-response, carries outbound commands
    pub command: Uuid,
    /// Notify, carries opcode framed replies
    pub data: Uuid,
    /// Notify/read, single byte device state
    pub mode: Uuid,
    /// Notify, raw sensor packets
    pub live_stream: Uuid,
    /// Service advertised by devices in firmware update mode, used for scanning only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_target: Option<Uuid>,
}

impl ProtocolUuids {
    /// Parse the positional list `[service, command, data, mode, liveStream, alternateTarget?]`
    pub fn from_strings<S: AsRef<str>>(uuids: &[S]) -> Result<Self, UuidError> {
        if uuids.len() < 5 {
            return Err(UuidError::TooFew(uuids.len()));
        }

        let parsed = uuids
            .iter()
            .map(|s| parse_uuid(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            service: parsed[0],
            command: parsed[1],
            data: parsed[2],
            mode: parsed[3],
            live_stream: parsed[4],
            alternate_target: parsed.get(5).copied(),
        })
    }
}

/// Parse a UUID in either 128-bit or 16-bit SIG short form ("180A")
pub fn parse_uuid(s: &str) -> Result<Uuid, UuidError> {
    let s = s.trim();
    if s.len() == 4 {
        let short = u16::from_str_radix(s, 16).map_err(|e| UuidError::Invalid {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(Uuid::from_u128(
            ((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb,
        ));
    }

    Uuid::parse_str(s).map_err(|e| UuidError::Invalid {
        value: s.to_string(),
        reason: e.to_string(),
    })
}
