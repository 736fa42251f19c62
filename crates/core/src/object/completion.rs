//! Single-shot completion handles

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Continuation resolved exactly once with the outcome of an async operation
///
/// Resolving consumes the handle, so resolving twice does not type-check.
/// Dropping an unresolved handle is allowed; an [`Augment`] waiting on it
/// then reports an operation failure.
pub struct Completion {
    callback: Box<dyn FnOnce(Result<()>)>,
}

impl Completion {
    pub fn new(callback: impl FnOnce(Result<()>) + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A completion paired with a future resolving to its outcome
    pub fn channel() -> (Completion, Augment) {
        let (tx, rx) = oneshot::channel();
        let completion = Completion::new(move |result| {
            let _ = tx.send(result);
        });
        (completion, Augment { rx })
    }

    pub fn resolve(self, result: Result<()>) {
        (self.callback)(result)
    }

    pub fn succeed(self) {
        self.resolve(Ok(()))
    }

    pub fn fail(self, error: Error) {
        self.resolve(Err(error))
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Completion")
    }
}

/// Future side of a feature request
#[derive(Debug)]
pub struct Augment {
    rx: oneshot::Receiver<Result<()>>,
}

impl Augment {
    /// Non-blocking check: `None` while the request is still pending
    pub fn try_result(&mut self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

fn dropped() -> Error {
    Error::operation_failed("object dropped before the request finished")
}

impl Future for Augment {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(dropped())))
    }
}
