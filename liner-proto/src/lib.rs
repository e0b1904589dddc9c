//! Liner wire protocol - data channel framing, device state and commands
//!
//! Every notification on the `data` characteristic is one frame: byte 0 is the
//! opcode, the rest is opcode specific. Frames carry no length prefix or checksum;
//! the frame boundary is the notification boundary.
//!
//! The data channel is shared with the high rate sensor stream, so decoding is
//! deliberately suspicious: frames that look like misrouted sensor data are
//! dropped with a [`DropReason`] rather than surfaced as responses.

pub mod ble;

use serde::Serialize;

pub use ble::{ProtocolUuids, UuidError};

// Reply opcodes
pub const OP_START_LOGGING: u8 = 0x01;
pub const OP_STOP_LOGGING: u8 = 0x02;
pub const OP_SUMMARY_FILE: u8 = 0x10;
pub const OP_FILE_COUNT: u8 = 0x20;
pub const OP_FILE_DATA: u8 = 0x21;
pub const OP_ERASE_FILE: u8 = 0x22;
pub const OP_ERASE_ALL_FILES: u8 = 0x29;

// Sensor stream packets that sometimes show up on the data channel
pub const OP_SENSOR_D0: u8 = 0xD0;
pub const OP_SENSOR_D5: u8 = 0xD5;
pub const OP_SENSOR_E0: u8 = 0xE0;

/// Acknowledgement status byte meaning success
pub const STATUS_OK: u8 = 0x01;

/// Genuine start/stop logging acks are never longer than this
pub const MAX_LOGGING_FRAME_LEN: usize = 3;

/// Unknown frames longer than this are assumed to be sensor data and not reported
pub const MAX_REPORTED_UNKNOWN_LEN: usize = 4;

/// Logging data type mask: bit0 Step, bit1 IMU, bit2 FSR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DataTypes(pub u8);

impl DataTypes {
    pub const NONE: DataTypes = DataTypes(0);
    pub const STEP: DataTypes = DataTypes(0b001);
    pub const IMU: DataTypes = DataTypes(0b010);
    pub const FSR: DataTypes = DataTypes(0b100);
    pub const ALL: DataTypes = DataTypes(0b111);

    pub fn is_valid(self) -> bool {
        self.0 <= Self::ALL.0
    }

    pub fn contains(self, other: DataTypes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for DataTypes {
    type Output = DataTypes;

    fn bitor(self, rhs: DataTypes) -> DataTypes {
        DataTypes(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileOperation {
    EraseFile,
    EraseAllFiles,
}

impl FileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOperation::EraseFile => "eraseFile",
            FileOperation::EraseAllFiles => "eraseAllFiles",
        }
    }
}

/// A decoded reply from the data characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    FileCount {
        count: u8,
    },
    /// The protocol has no end-of-file marker; `is_complete` is always false
    /// and completion has to be inferred by the caller.
    FileDataChunk {
        chunk: Vec<u8>,
        is_complete: bool,
    },
    SummaryFile {
        data: Vec<u8>,
    },
    FileOperationComplete {
        operation: FileOperation,
        success: bool,
    },
    LoggingStatus {
        is_logging: bool,
        data_types: DataTypes,
    },
}

/// Why a data frame produced no response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Empty,
    /// 0x20 without a count byte
    InvalidFileCount,
    /// 0x21 or 0x10 with nothing after the opcode
    EmptyPayload { opcode: u8 },
    /// Start logging ack with a mask outside 0..=7
    InvalidDataTypes { data_types: u8 },
    /// Logging ack longer than any genuine ack
    LoggingFrameTooLong { len: usize },
    SensorData { opcode: u8 },
    Unknown { opcode: u8, len: usize },
}

impl DropReason {
    /// Human readable diagnostic, or `None` when the drop should stay quiet
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            DropReason::Empty | DropReason::EmptyPayload { .. } => None,
            DropReason::InvalidFileCount => Some("Invalid file count response format".to_string()),
            DropReason::InvalidDataTypes { data_types } => Some(format!(
                "Invalid data type flags: {data_types} - ignoring spurious logging command"
            )),
            DropReason::LoggingFrameTooLong { len } => Some(format!(
                "Logging response too long ({len} bytes) - likely sensor data, ignoring"
            )),
            DropReason::SensorData { opcode } => {
                Some(format!("Ignoring sensor data packet: 0x{opcode:02x}"))
            }
            DropReason::Unknown { opcode, len } if *len <= MAX_REPORTED_UNKNOWN_LEN => Some(
                format!("Unknown command response: 0x{opcode:02x} ({len} bytes)"),
            ),
            DropReason::Unknown { .. } => None,
        }
    }
}

/// Decode one notification from the data characteristic
pub fn decode_response(frame: &[u8]) -> Result<Response, DropReason> {
    let Some(&opcode) = frame.first() else {
        return Err(DropReason::Empty);
    };

    match opcode {
        OP_FILE_COUNT => match frame.get(1) {
            Some(&count) => Ok(Response::FileCount { count }),
            None => Err(DropReason::InvalidFileCount),
        },
        OP_FILE_DATA => {
            if frame.len() > 1 {
                Ok(Response::FileDataChunk {
                    chunk: frame[1..].to_vec(),
                    is_complete: false,
                })
            } else {
                Err(DropReason::EmptyPayload { opcode })
            }
        }
        OP_SUMMARY_FILE => {
            if frame.len() > 1 {
                Ok(Response::SummaryFile {
                    data: frame[1..].to_vec(),
                })
            } else {
                Err(DropReason::EmptyPayload { opcode })
            }
        }
        OP_ERASE_FILE | OP_ERASE_ALL_FILES => {
            // A bare ack counts as success
            let success = frame.get(1).is_none_or(|&status| status == STATUS_OK);
            let operation = if opcode == OP_ERASE_FILE {
                FileOperation::EraseFile
            } else {
                FileOperation::EraseAllFiles
            };
            Ok(Response::FileOperationComplete { operation, success })
        }
        OP_START_LOGGING | OP_STOP_LOGGING => {
            let is_logging = opcode == OP_START_LOGGING;
            let data_types = DataTypes(frame.get(1).copied().unwrap_or(0));

            // Range check first, then the length check.
            if is_logging && !data_types.is_valid() {
                return Err(DropReason::InvalidDataTypes {
                    data_types: data_types.0,
                });
            }
            if frame.len() > MAX_LOGGING_FRAME_LEN {
                return Err(DropReason::LoggingFrameTooLong { len: frame.len() });
            }

            Ok(Response::LoggingStatus {
                is_logging,
                data_types,
            })
        }
        OP_SENSOR_D5 | OP_SENSOR_E0 | OP_SENSOR_D0 => Err(DropReason::SensorData { opcode }),
        _ => Err(DropReason::Unknown {
            opcode,
            len: frame.len(),
        }),
    }
}

/// Decode a mode characteristic value into the 1-based state reported to callers
///
/// Values above [`ble::MAX_DEVICE_STATE`] show up right after a firmware
/// update and are treated as state 0.
pub fn decode_device_state(value: &[u8]) -> Option<u8> {
    let raw = *value.first()?;
    let state = if raw > ble::MAX_DEVICE_STATE { 0 } else { raw };
    Some(state + 1)
}

/// Outbound requests written to the command characteristic
///
/// Request opcodes mirror the reply opcodes they trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetFileCount,
    GetFile { index: u8 },
    GetSummaryFile,
    EraseFile { index: u8 },
    EraseAllFiles,
    StartLogging { data_types: DataTypes },
    StopLogging,
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::GetFileCount => vec![OP_FILE_COUNT],
            Command::GetFile { index } => vec![OP_FILE_DATA, index],
            Command::GetSummaryFile => vec![OP_SUMMARY_FILE],
            Command::EraseFile { index } => vec![OP_ERASE_FILE, index],
            Command::EraseAllFiles => vec![OP_ERASE_ALL_FILES],
            Command::StartLogging { data_types } => vec![OP_START_LOGGING, data_types.0],
            Command::StopLogging => vec![OP_STOP_LOGGING],
        }
    }
}
