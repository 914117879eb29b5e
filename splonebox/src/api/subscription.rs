//! Event subscriptions.
//!
//! A subscription is a named unbounded FIFO. The core enqueues the body of
//! every matching `broadcast` notification; nothing is dropped and nothing
//! blocks the receive worker. Unsubscribing (or losing the session) closes
//! the channel, which readers observe as end-of-stream.

use rmpv::Value;

/// A live subscription to a broadcast event
#[derive(Debug)]
pub struct Subscription {
    name: String,
    rx: flume::Receiver<Vec<Value>>,
}

impl Subscription {
    pub(crate) fn new(name: String, rx: flume::Receiver<Vec<Value>>) -> Self {
        Self { name, rx }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next event. `None` means the subscription is gone
    /// (unsubscribed or disconnected).
    pub async fn next(&self) -> Option<Vec<Value>> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking poll for a buffered event.
    #[must_use]
    pub fn try_next(&self) -> Option<Vec<Value>> {
        self.rx.try_recv().ok()
    }

    /// Number of buffered, unread events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
