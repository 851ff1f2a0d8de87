//! Single-slot completion cell.
//!
//! Host callbacks resolve a [`Resolver`]; the caller awaits the matching
//! [`Pending`]. Resolving consumes the resolver, so a second write cannot
//! be expressed. Awaiting consumes the pending side, so the value is read
//! once.

use crate::error::{CoreError, CoreResult};
use futures_channel::oneshot;
use idbkit_host::{Callback, HostResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Creates a connected resolver and pending pair.
pub fn completion<T>() -> (Resolver<T>, Pending<T>) {
    let (sender, receiver) = oneshot::channel();
    (Resolver { sender }, Pending { receiver })
}

/// Write side of a completion.
#[derive(Debug)]
pub struct Resolver<T> {
    sender: oneshot::Sender<T>,
}

impl<T> Resolver<T> {
    /// Delivers the value. Dropped silently if nobody waits any more.
    pub fn resolve(self, value: T) {
        if self.sender.send(value).is_err() {
            tracing::debug!("completion resolved after its waiter went away");
        }
    }

    /// Returns true if the waiting side has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_canceled()
    }
}

impl<T: 'static> Resolver<HostResult<T>> {
    /// Adapts the resolver to a host completion callback.
    pub fn into_callback(self) -> Callback<T> {
        Box::new(move |result| self.resolve(result))
    }
}

/// Read side of a completion.
///
/// Resolves to [`CoreError::CompletionDropped`] if the resolver is dropped
/// without a value.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Future for Pending<T> {
    type Output = CoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| CoreError::CompletionDropped))
    }
}
