//! Completion Adapter
//!
//! Turns a callback-style driver call into an awaitable value.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::driver::Completion;
use crate::error::DriverError;

// == Pending ==
/// The in-flight result of a driver call.
///
/// The driver call is issued when the `Pending` is created; awaiting only
/// waits for its completion. Resolves exactly once.
#[must_use = "the driver call is already issued; await it to observe the outcome"]
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, DriverError>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T, DriverError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DriverError::Disconnected)))
    }
}

/// Issues `call` with a fresh completion callback and returns the matching [`Pending`].
///
/// A driver that drops the callback without invoking it resolves the
/// `Pending` with [`DriverError::Disconnected`].
pub fn deliver<T, F>(call: F) -> Pending<T>
where
    T: Send + 'static,
    F: FnOnce(Completion<T>),
{
    let (tx, rx) = oneshot::channel();
    call(Box::new(move |result| {
        // Receiver gone means the caller stopped waiting
        let _ = tx.send(result);
    }));
    Pending { rx }
}
