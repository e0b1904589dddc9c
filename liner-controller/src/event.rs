//! Events pushed to the host
//!
//! Serialized as `{"method": "...", "arguments": ...}` so a bridge can forward
//! them unchanged.

use liner_proto::{DataTypes, FileOperation};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::registry::DeviceIdentity;

/// Device id used for diagnostics that are not about a particular device
pub const GENERAL: &str = "general";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "method",
    content = "arguments",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    UpdateDetectedDevices(Vec<DeviceIdentity>),
    BluetoothStateUpdate(u8),
    DeviceDisconnected(String),
    ConnectionComplete(String),
    UpdateDeviceState {
        id: String,
        state: u8,
    },
    LiveStreamPacket {
        id: String,
        packet: Vec<u8>,
    },
    FileCountResponse {
        id: String,
        count: u8,
    },
    FileDataChunk {
        id: String,
        chunk: Vec<u8>,
        is_complete: bool,
    },
    SummaryFileResponse {
        id: String,
        data: Vec<u8>,
    },
    FileOperationComplete {
        id: String,
        operation: FileOperation,
        success: bool,
    },
    LoggingStatusUpdate {
        id: String,
        is_logging: bool,
        data_types: DataTypes,
    },
    FirmwareVersionRead {
        id: String,
        version: String,
    },
    #[serde(rename = "flutterMessage")]
    Diagnostic {
        id: String,
        message: String,
    },
}

impl Event {
    /// Device the event is about, if any
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Event::UpdateDetectedDevices(_) | Event::BluetoothStateUpdate(_) => None,
            Event::DeviceDisconnected(id) | Event::ConnectionComplete(id) => Some(id),
            Event::UpdateDeviceState { id, .. }
            | Event::LiveStreamPacket { id, .. }
            | Event::FileCountResponse { id, .. }
            | Event::FileDataChunk { id, .. }
            | Event::SummaryFileResponse { id, .. }
            | Event::FileOperationComplete { id, .. }
            | Event::LoggingStatusUpdate { id, .. }
            | Event::FirmwareVersionRead { id, .. }
            | Event::Diagnostic { id, .. } => Some(id),
        }
    }
}

/// Sending half of the event stream
///
/// Emission never fails from the controller's point of view: once the host
/// drops its receiver, events are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            log::trace!("event receiver dropped");
        }
    }

    pub fn diagnostic(&self, id: &str, message: impl Into<String>) {
        let message = message.into();
        log::debug!("[{id}] {message}");
        self.emit(Event::Diagnostic {
            id: id.to_string(),
            message,
        });
    }
}
