//! Liner BLE Controller
//!
//! BLE central engine for discovering, connecting to and commanding liner
//! devices. The engine ([`Controller`]) is transport agnostic; enable the
//! `btleplug` feature for a real radio.
//!
//! # Example
//!
//! ```ignore
//! use liner_controller::{ble::BtleplugTransport, runtime, Controller, EventSink, ScanTarget};
//! use liner_proto::Command;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport_tx, transport_rx) = mpsc::unbounded_channel();
//!     let transport = BtleplugTransport::new(transport_tx).await?;
//!     let (sink, mut events) = EventSink::new();
//!     let (handle, _task) = runtime::spawn(Controller::new(transport, sink), transport_rx);
//!
//!     handle.initialize(uuids).await?;
//!     handle.scan(ScanTarget::Default, std::time::Duration::from_secs(10)).await?;
//!
//!     // Connect resolves once notifications are enabled
//!     handle.connect("AA:BB:CC:DD:EE:FF").await?;
//!     handle.send("AA:BB:CC:DD:EE:FF", Command::GetFileCount).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

mod barrier;
mod completion;
pub mod config;
mod controller;
mod error;
mod event;
mod registry;
pub mod runtime;
mod session;
pub mod transport;

#[cfg(feature = "btleplug")]
pub mod ble;

#[cfg(test)]
mod fake;

pub use barrier::{BarrierOutcome, SubscriptionBarrier};
pub use completion::{Completion, Responder};
pub use config::{ConfigError, LinerConfig};
pub use controller::{Controller, ScanTarget};
pub use error::{LinerError, TransportError};
pub use event::{Event, EventSink, GENERAL};
pub use registry::{DeviceIdentity, ScanRegistry};
pub use session::{CharacteristicRole, ConnectionState, DeviceSession, ResolvedCharacteristics};
pub use transport::{AdapterState, CharacteristicHandle, Transport, TransportEvent};
