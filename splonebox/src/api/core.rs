//! The client↔core application protocol.
//!
//! `Core` owns the RPC endpoint plus the two pending tables:
//!
//! - `responses_pending: msgid → slot` — one entry per in-flight request,
//!   inserted before the request hits the wire and removed when its
//!   response dispatches
//! - `results_pending: call_id → RunResult` — run calls that have been
//!   acknowledged and now wait for their `result` request
//!
//! Inbound traffic drives the tables from the receive worker: responses
//! settle or acknowledge slots, `result` requests complete them, and
//! `broadcast` notifications fan out to subscriptions. When the session
//! tears down — either direction — every live slot fails with a transport
//! error and subscriptions close, so nothing blocks forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rmpv::Value;
use tracing::{debug, info, warn};

use splonebox_proto::rpc::{HandlerError, HandlerResult, RequestHandler, ResponseCallback};
use splonebox_proto::{CryptoSession, Message, MsgpackRpc, Notify, Request, Response};

use crate::api::call::{
    ApiBroadcast, ApiRegister, ApiResult, ApiRun, ApiSubscribe, ApiUnsubscribe, IncomingResult,
};
use crate::api::error::{ApiError, RemoteError};
use crate::api::result::{Latch, PendingResponse, RunResult};
use crate::api::subscription::Subscription;

/// Handle to the core connection. Cheap to clone; all clones share one
/// session and one set of pending tables.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct CoreInner {
    rpc: MsgpackRpc,
    responses_pending: Mutex<HashMap<u32, PendingEntry>>,
    results_pending: Mutex<HashMap<u64, RunResult>>,
    subscriptions: Mutex<HashMap<String, flume::Sender<Vec<Value>>>>,
    closed: Latch,
    connected: AtomicBool,
}

enum PendingEntry {
    Response(PendingResponse),
    Run(RunResult),
}

impl Default for CoreInner {
    fn default() -> Self {
        Self {
            rpc: MsgpackRpc::new(),
            responses_pending: Mutex::new(HashMap::new()),
            results_pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            closed: Latch::new(),
            connected: AtomicBool::new(false),
        }
    }
}

impl Core {
    /// Create a core handle with the `result` handler and the broadcast
    /// router installed.
    #[must_use]
    pub fn new() -> Self {
        let inner = Arc::new(CoreInner::default());

        // Fresh dispatcher, fresh names: neither registration can collide.
        let weak = Arc::downgrade(&inner);
        let _ = inner.rpc.register_function(
            Box::new(move |req| match weak.upgrade() {
                Some(core) => core.handle_result_request(req),
                None => Err(HandlerError::Failed("core has been dropped".into())),
            }),
            "result",
        );

        let weak = Arc::downgrade(&inner);
        inner.rpc.set_notify_handler(Box::new(move |notify| {
            if let Some(core) = weak.upgrade() {
                core.handle_broadcast(notify);
            }
        }));

        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<CoreInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<CoreInner>) -> Self {
        Self { inner }
    }

    /// Connect to the splonebox core.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        crypto: CryptoSession,
    ) -> Result<(), ApiError> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.rpc.set_close_handler(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.on_session_closed();
            }
        }));

        self.inner.rpc.connect(host, port, crypto).await?;
        self.inner.connected.store(true, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire) && self.inner.rpc.is_connected()
    }

    /// Block until the session is closed (by either side).
    pub async fn listen(&self) {
        self.inner.closed.wait().await;
    }

    /// Disconnect from the core, failing every pending call.
    pub async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::Release);
        self.inner.rpc.disconnect().await;
    }

    /// Install the handler servicing inbound `run` requests. Used by
    /// `Plugin`; exposed for custom dispatchers.
    pub fn set_run_handler(&self, handler: RequestHandler) -> Result<(), ApiError> {
        self.inner.rpc.register_function(handler, "run")?;
        Ok(())
    }

    /// Send a register call; the returned slot settles on the response.
    pub async fn send_register(&self, call: ApiRegister) -> Result<PendingResponse, ApiError> {
        let response = PendingResponse::new();
        self.send_tracked(call.msg, PendingEntry::Response(response.clone()))
            .await?;
        Ok(response)
    }

    /// Send a run call. The slot acknowledges when the core assigns a call
    /// id and completes when the matching `result` request arrives.
    pub async fn send_run(&self, call: ApiRun) -> Result<RunResult, ApiError> {
        let result = RunResult::new();
        self.send_tracked(call.msg, PendingEntry::Run(result.clone()))
            .await?;
        Ok(result)
    }

    /// Deliver the outcome of a locally executed run call. The response is
    /// informational only.
    pub async fn send_result(&self, call: ApiResult) -> Result<(), ApiError> {
        if !self.is_connected() {
            return Err(ApiError::NotConnected);
        }
        self.inner
            .rpc
            .send(
                Message::Request(call.msg),
                Some(Box::new(|resp: Response| match &resp.error {
                    Some(error) => warn!("result request failed: {:?}", error),
                    None => info!("result request successful"),
                })),
            )
            .await?;
        Ok(())
    }

    /// Publish an event. As a notification this returns `None`; as a
    /// request it returns the awaitable response slot.
    pub async fn broadcast(
        &self,
        event: &str,
        arguments: Vec<Value>,
        as_notification: bool,
    ) -> Result<Option<PendingResponse>, ApiError> {
        if !self.is_connected() {
            return Err(ApiError::NotConnected);
        }
        let call = ApiBroadcast::new(event, arguments, as_notification)?;
        match call.msg {
            Message::Request(req) => {
                let response = PendingResponse::new();
                self.send_tracked(req, PendingEntry::Response(response.clone()))
                    .await?;
                Ok(Some(response))
            }
            msg => {
                self.inner.rpc.send(msg, None).await?;
                Ok(None)
            }
        }
    }

    /// Subscribe to a broadcast event. Blocks until the core confirms;
    /// a rejection removes the subscription again and surfaces here.
    pub async fn subscribe(&self, event: &str) -> Result<Subscription, ApiError> {
        let rx = {
            let mut subs = self.inner.subscriptions.lock();
            if subs.contains_key(event) {
                return Err(ApiError::DuplicateSubscription(event.to_string()));
            }
            let (tx, rx) = flume::unbounded();
            subs.insert(event.to_string(), tx);
            rx
        };

        let response = PendingResponse::new();
        let sent = self
            .send_tracked(
                ApiSubscribe::new(event).msg,
                PendingEntry::Response(response.clone()),
            )
            .await;
        if let Err(e) = sent {
            self.inner.subscriptions.lock().remove(event);
            return Err(e);
        }

        if let Err(e) = response.wait().await {
            self.inner.subscriptions.lock().remove(event);
            return Err(e.into());
        }
        Ok(Subscription::new(event.to_string(), rx))
    }

    /// Drop a subscription and tell the core. The returned slot settles on
    /// the confirmation.
    pub async fn unsubscribe(&self, event: &str) -> Result<PendingResponse, ApiError> {
        if self.inner.subscriptions.lock().remove(event).is_none() {
            return Err(ApiError::NotSubscribed(event.to_string()));
        }

        let response = PendingResponse::new();
        self.send_tracked(
            ApiUnsubscribe::new(event).msg,
            PendingEntry::Response(response.clone()),
        )
        .await?;
        Ok(response)
    }

    /// Track a request in `responses_pending` (regenerating the msgid until
    /// unique among in-flight requests) and send it.
    async fn send_tracked(&self, req: Request, entry: PendingEntry) -> Result<(), ApiError> {
        if !self.is_connected() {
            return Err(ApiError::NotConnected);
        }
        let req = {
            let mut pending = self.inner.responses_pending.lock();
            let mut req = req;
            while pending.contains_key(&req.msgid) {
                req.regenerate_id();
            }
            pending.insert(req.msgid, entry);
            req
        };
        let msgid = req.msgid;

        let weak = Arc::downgrade(&self.inner);
        let callback: ResponseCallback = Box::new(move |resp| {
            if let Some(core) = weak.upgrade() {
                core.handle_response(resp);
            }
        });

        if let Err(e) = self.inner.rpc.send(Message::Request(req), Some(callback)).await {
            self.inner.responses_pending.lock().remove(&msgid);
            return Err(e.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("connected", &self.inner.connected)
            .finish_non_exhaustive()
    }
}

impl CoreInner {
    /// Resolve an in-flight request with its response.
    fn handle_response(&self, resp: Response) {
        let entry = self.responses_pending.lock().remove(&resp.msgid);
        let Some(entry) = entry else {
            warn!("response {} does not match any pending request", resp.msgid);
            return;
        };

        match entry {
            PendingEntry::Response(slot) => {
                if let Some(error) = &resp.error {
                    slot.fail(remote_error(error));
                } else if matches!(resp.result.as_deref(), Some([])) {
                    slot.complete();
                } else {
                    slot.fail(RemoteError::remote(400, "Received invalid Response"));
                }
            }
            PendingEntry::Run(slot) => {
                if let Some(error) = &resp.error {
                    slot.fail(remote_error(error));
                    return;
                }
                // The acknowledgement body is exactly one element: the call id.
                let call_id = resp
                    .result
                    .as_deref()
                    .filter(|body| body.len() == 1)
                    .and_then(|body| body[0].as_u64());
                match call_id {
                    Some(call_id) => {
                        slot.acknowledge(call_id);
                        self.results_pending.lock().insert(call_id, slot);
                    }
                    None => slot.fail(RemoteError::remote(400, "Received invalid Response")),
                }
            }
        }
    }

    /// Service an inbound `result` request.
    fn handle_result_request(&self, req: &Request) -> HandlerResult {
        let Ok(result) = IncomingResult::from_request(req) else {
            return Ok((
                Some(vec![
                    Value::from(400),
                    Value::from("Message is not a valid result call"),
                ]),
                None,
            ));
        };

        let slot = self.results_pending.lock().remove(&result.call_id);
        match slot {
            Some(slot) => {
                debug!("run call {} completed", result.call_id);
                slot.complete(result.value);
                Ok((None, Some(vec![Value::from(result.call_id)])))
            }
            None => Ok((
                Some(vec![
                    Value::from(404),
                    Value::from("Call id does not match any call"),
                ]),
                None,
            )),
        }
    }

    /// Fan a broadcast notification out to its subscription.
    fn handle_broadcast(&self, notify: &Notify) {
        if notify.function != "broadcast" {
            warn!("unexpected notification {:?}", notify.function);
            return;
        }
        let Some(event) = notify.arguments.first().and_then(text_of) else {
            warn!("broadcast notification without an event name");
            return;
        };

        let subs = self.subscriptions.lock();
        match subs.get(&event) {
            Some(tx) => {
                info!("received event: {}", event);
                let _ = tx.send(notify.arguments.clone());
            }
            None => warn!("received an event that we haven't subscribed to"),
        }
    }

    /// The session is gone: fail every pending slot, close subscriptions.
    fn on_session_closed(&self) {
        self.connected.store(false, Ordering::Release);

        let responses: Vec<PendingEntry> =
            self.responses_pending.lock().drain().map(|(_, e)| e).collect();
        for entry in responses {
            match entry {
                PendingEntry::Response(slot) => slot.fail(RemoteError::Disconnected),
                PendingEntry::Run(slot) => slot.fail(RemoteError::Disconnected),
            }
        }

        let results: Vec<RunResult> =
            self.results_pending.lock().drain().map(|(_, r)| r).collect();
        for slot in results {
            slot.fail(RemoteError::Disconnected);
        }

        self.subscriptions.lock().clear();
        self.closed.trip();
    }
}

fn remote_error(error: &[Value]) -> RemoteError {
    let code = error.first().and_then(Value::as_i64).unwrap_or(0);
    let message = error.get(1).and_then(text_of).unwrap_or_default();
    RemoteError::Remote { code, message }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.as_str().map(str::to_owned),
        Value::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}
