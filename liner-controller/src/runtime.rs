//! Runs a [`Controller`] inside one tokio task
//!
//! Caller requests and transport completions are both messages into that
//! task, so the controller keeps a single writer while callers get
//! a cheap cloneable async [`Handle`].

use std::time::Duration;

use liner_proto::{Command, ProtocolUuids};
use log::*;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::completion::{Responder, completion};
use crate::controller::{Controller, ScanTarget};
use crate::error::LinerError;
use crate::registry::DeviceIdentity;
use crate::transport::{Transport, TransportEvent};

enum Request {
    Initialize {
        uuids: ProtocolUuids,
        reply: oneshot::Sender<Result<(), LinerError>>,
    },
    Scan {
        target: ScanTarget,
        duration: Duration,
        reply: oneshot::Sender<Result<bool, LinerError>>,
    },
    StopScan {
        reply: oneshot::Sender<bool>,
    },
    DetectedDevices {
        reply: oneshot::Sender<Vec<DeviceIdentity>>,
    },
    Connect {
        id: String,
        responder: Responder<()>,
    },
    Disconnect {
        id: String,
        reply: oneshot::Sender<Result<(), LinerError>>,
    },
    CheckMode {
        id: String,
        reply: oneshot::Sender<Result<(), LinerError>>,
    },
    SendCommand {
        id: String,
        payload: Vec<u8>,
        responder: Responder<()>,
    },
    MacAddress {
        id: String,
        reply: oneshot::Sender<Option<String>>,
    },
    FirmwareVersion {
        id: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Async front of a running controller
#[derive(Debug, Clone)]
pub struct Handle {
    tx: mpsc::UnboundedSender<Request>,
}

fn stopped() -> LinerError {
    LinerError::ConnectionFailed("controller task stopped".to_string())
}

impl Handle {
    async fn call<R>(
        &self,
        request: impl FnOnce(oneshot::Sender<R>) -> Request,
    ) -> Result<R, LinerError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(request(tx)).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn initialize(&self, uuids: ProtocolUuids) -> Result<(), LinerError> {
        self.call(|reply| Request::Initialize { uuids, reply }).await?
    }

    /// Scan for `duration`, after which the window closes on its own
    pub async fn scan(&self, target: ScanTarget, duration: Duration) -> Result<bool, LinerError> {
        self.call(|reply| Request::Scan {
            target,
            duration,
            reply,
        })
        .await?
    }

    pub async fn stop_scan(&self) -> Result<bool, LinerError> {
        self.call(|reply| Request::StopScan { reply }).await
    }

    pub async fn detected_devices(&self) -> Result<Vec<DeviceIdentity>, LinerError> {
        self.call(|reply| Request::DetectedDevices { reply }).await
    }

    /// Resolves once the device is ready for commands
    pub async fn connect(&self, id: &str) -> Result<(), LinerError> {
        let (responder, completion) = completion();
        self.tx
            .send(Request::Connect {
                id: id.to_string(),
                responder,
            })
            .map_err(|_| stopped())?;
        completion.await
    }

    pub async fn disconnect(&self, id: &str) -> Result<(), LinerError> {
        let id = id.to_string();
        self.call(|reply| Request::Disconnect { id, reply }).await?
    }

    pub async fn check_mode(&self, id: &str) -> Result<(), LinerError> {
        let id = id.to_string();
        self.call(|reply| Request::CheckMode { id, reply }).await?
    }

    /// Resolves when the device confirms the write
    pub async fn send_command(&self, id: &str, payload: Vec<u8>) -> Result<(), LinerError> {
        let (responder, completion) = completion();
        self.tx
            .send(Request::SendCommand {
                id: id.to_string(),
                payload,
                responder,
            })
            .map_err(|_| stopped())?;
        completion.await
    }

    pub async fn send(&self, id: &str, command: Command) -> Result<(), LinerError> {
        self.send_command(id, command.to_bytes()).await
    }

    pub async fn mac_address(&self, id: &str) -> Option<String> {
        let id = id.to_string();
        self.call(|reply| Request::MacAddress { id, reply })
            .await
            .ok()
            .flatten()
    }

    pub async fn firmware_version(&self, id: &str) -> Option<String> {
        let id = id.to_string();
        self.call(|reply| Request::FirmwareVersion { id, reply })
            .await
            .ok()
            .flatten()
    }
}

/// Move `controller` into a task fed by `transport_events`
///
/// The task ends, disconnecting every device, once all handles are dropped.
pub fn spawn<T>(
    controller: Controller<T>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (Handle, JoinHandle<()>)
where
    T: Transport + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(controller, rx, transport_events));
    (Handle { tx }, task)
}

async fn run<T: Transport>(
    mut controller: Controller<T>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let (expired_tx, mut expired_rx) = mpsc::unbounded_channel::<u64>();

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => handle_request(&mut controller, request, &expired_tx),
                None => break,
            },

            Some(event) = transport_events.recv() => controller.handle_event(event),

            Some(generation) = expired_rx.recv() => {
                if controller.scan_expired(generation) {
                    debug!("scan window {generation} elapsed");
                }
            }
        }
    }

    debug!("all handles dropped, shutting down");
    controller.shutdown();
}

fn handle_request<T: Transport>(
    controller: &mut Controller<T>,
    request: Request,
    expired: &mpsc::UnboundedSender<u64>,
) {
    // Replies fail only when the caller stopped waiting
    match request {
        Request::Initialize { uuids, reply } => {
            let _ = reply.send(controller.initialize_with(uuids));
        }
        Request::Scan {
            target,
            duration,
            reply,
        } => {
            let result = controller.scan(target);
            if let (Ok(true), Some(generation)) = (&result, controller.current_scan()) {
                let expired = expired.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = expired.send(generation);
                });
            }
            let _ = reply.send(result);
        }
        Request::StopScan { reply } => {
            let _ = reply.send(controller.stop_scan());
        }
        Request::DetectedDevices { reply } => {
            let _ = reply.send(controller.detected_devices());
        }
        Request::Connect { id, responder } => controller.begin_connect(&id, responder),
        Request::Disconnect { id, reply } => {
            let _ = reply.send(controller.disconnect(&id));
        }
        Request::CheckMode { id, reply } => {
            let _ = reply.send(controller.check_mode(&id));
        }
        Request::SendCommand {
            id,
            payload,
            responder,
        } => controller.begin_command(&id, &payload, responder),
        Request::MacAddress { id, reply } => {
            let _ = reply.send(controller.mac_address(&id));
        }
        Request::FirmwareVersion { id, reply } => {
            let _ = reply.send(controller.firmware_version(&id));
        }
    }
}
