//! Awaitable call slots.
//!
//! Sending a request creates a slot the caller can poll or await. A
//! `PendingResponse` settles in one step (Completed or Failed); a
//! `RunResult` goes through the acknowledgement phase first:
//!
//! ```text
//! Pending ──ack──▶ Acknowledged ──result──▶ Completed
//!    │                  │
//!    └──────error───────┴──────────────────▶ Failed
//! ```
//!
//! Terminal transitions wake every waiter exactly once; later transitions
//! are ignored. On disconnect the core fails every live slot so no caller
//! blocks forever.

use std::sync::Arc;

use parking_lot::Mutex;
use rmpv::Value;

use crate::api::error::RemoteError;

/// Observable state of a call slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Sent, nothing heard back yet
    Pending,
    /// The core acknowledged a run call and assigned a call id
    Acknowledged,
    Completed,
    Failed,
}

/// One-shot completion latch with multi-waiter wake-up.
///
/// Each waiter parks on its own one-shot channel; tripping the latch
/// drains and signals them all. Tripping twice is a no-op.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    state: Mutex<LatchState>,
}

#[derive(Debug, Default)]
struct LatchState {
    tripped: bool,
    waiters: Vec<flume::Sender<()>>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.state.lock().tripped
    }

    pub(crate) fn trip(&self) {
        let waiters = {
            let mut state = self.state.lock();
            if state.tripped {
                return;
            }
            state.tripped = true;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    pub(crate) async fn wait(&self) {
        let rx = {
            let mut state = self.state.lock();
            if state.tripped {
                return;
            }
            let (tx, rx) = flume::bounded(1);
            state.waiters.push(tx);
            rx
        };
        let _ = rx.recv_async().await;
    }
}

/// Slot for calls whose response is just success-or-error
/// (register, subscribe, unsubscribe, broadcast-as-request)
#[derive(Debug, Clone, Default)]
pub struct PendingResponse {
    inner: Arc<ResponseInner>,
}

#[derive(Debug, Default)]
struct ResponseInner {
    error: Mutex<Option<RemoteError>>,
    done: Latch,
}

impl PendingResponse {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> CallStatus {
        if self.inner.error.lock().is_some() {
            CallStatus::Failed
        } else if self.inner.done.is_tripped() {
            CallStatus::Completed
        } else {
            CallStatus::Pending
        }
    }

    /// Block until the response arrives; a remote error surfaces here.
    pub async fn wait(&self) -> Result<(), RemoteError> {
        self.inner.done.wait().await;
        match self.inner.error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub(crate) fn complete(&self) {
        if self.inner.done.is_tripped() {
            return;
        }
        self.inner.done.trip();
    }

    pub(crate) fn fail(&self, error: RemoteError) {
        if self.inner.done.is_tripped() {
            return;
        }
        *self.inner.error.lock() = Some(error);
        self.inner.done.trip();
    }
}

/// Slot for a `run` call: acknowledged with a call id, later completed by
/// a separate `result` request
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    inner: Arc<RunInner>,
}

#[derive(Debug, Default)]
struct RunInner {
    state: Mutex<RunState>,
    done: Latch,
}

#[derive(Debug, Default)]
struct RunState {
    call_id: Option<u64>,
    value: Option<Value>,
    error: Option<RemoteError>,
}

impl RunResult {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> CallStatus {
        let state = self.inner.state.lock();
        if state.error.is_some() {
            CallStatus::Failed
        } else if state.value.is_some() {
            CallStatus::Completed
        } else if state.call_id.is_some() {
            CallStatus::Acknowledged
        } else {
            CallStatus::Pending
        }
    }

    /// The server-assigned call id, available once acknowledged.
    #[must_use]
    pub fn call_id(&self) -> Option<u64> {
        self.inner.state.lock().call_id
    }

    /// True once the call has reached a terminal state.
    #[must_use]
    pub fn has_result(&self) -> bool {
        self.inner.done.is_tripped()
    }

    /// Block until the result arrives.
    pub async fn wait(&self) -> Result<Value, RemoteError> {
        self.inner.done.wait().await;
        let state = self.inner.state.lock();
        match (&state.error, &state.value) {
            (Some(error), _) => Err(error.clone()),
            (None, Some(value)) => Ok(value.clone()),
            // done tripped with neither set cannot happen; treat as lost
            (None, None) => Err(RemoteError::Disconnected),
        }
    }

    /// Pending → Acknowledged. Only the first acknowledgement counts.
    pub(crate) fn acknowledge(&self, call_id: u64) {
        let mut state = self.inner.state.lock();
        if state.call_id.is_none() && state.error.is_none() {
            state.call_id = Some(call_id);
        }
    }

    /// Acknowledged → Completed.
    pub(crate) fn complete(&self, value: Value) {
        {
            let mut state = self.inner.state.lock();
            if state.error.is_some() || state.value.is_some() {
                return;
            }
            state.value = Some(value);
        }
        self.inner.done.trip();
    }

    pub(crate) fn fail(&self, error: RemoteError) {
        {
            let mut state = self.inner.state.lock();
            if state.error.is_some() || state.value.is_some() {
                return;
            }
            state.error = Some(error);
        }
        self.inner.done.trip();
    }
}
