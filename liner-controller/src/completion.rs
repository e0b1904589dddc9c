//! One-shot result correlation between the controller and its callers

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::LinerError;

/// Resolving half; consumed by `resolve` so a result is delivered at most once
#[derive(Debug)]
pub struct Responder<T> {
    tx: oneshot::Sender<Result<T, LinerError>>,
}

/// Waiting half handed to the caller
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, LinerError>>,
}

pub fn completion<T>() -> (Responder<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Responder { tx }, Completion { rx })
}

impl<T> Responder<T> {
    pub fn resolve(self, result: Result<T, LinerError>) {
        // The caller may have stopped waiting
        let _ = self.tx.send(result);
    }
}

impl<T> Completion<T> {
    /// An already resolved completion, for requests rejected up front
    pub fn ready(result: Result<T, LinerError>) -> Self {
        let (responder, completion) = completion();
        responder.resolve(result);
        completion
    }

    /// Non-blocking poll; `None` while the controller has not answered yet
    pub fn try_result(&mut self) -> Option<Result<T, LinerError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, LinerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(dropped())))
    }
}

fn dropped() -> LinerError {
    LinerError::ConnectionFailed("request dropped".to_string())
}
