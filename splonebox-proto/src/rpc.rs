//! MessagePack-RPC dispatcher.
//!
//! Routes decoded messages three ways:
//!
//! - requests go to the handler registered under their function name;
//!   an unknown name is answered with `{404, "Function does not exist!"}`
//! - responses resolve the callback registered when the request was sent;
//!   an unmatched response is logged and dropped
//! - notifications go to the notify handler (the event bus)
//!
//! Error-response policy, mirrored from the wire protocol: a frame that
//! fails to decode is answered with `{400, "Invalid Message Format"}` under
//! the dummy id 0; a handler that rejects the request shape produces
//! `{400, "Could not handle request! <detail>"}`; any other handler failure
//! produces `{418, "Unexpected exception occurred!"}`. The receive worker
//! never propagates application errors — they all become response frames.

use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use rmpv::Value;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionEvent, FrameHandler};
use crate::crypto::CryptoSession;
use crate::error::{RpcError, TransportError};
use crate::message::{Message, MessageDecoder, Notify, Request, Response};

/// Outcome of a request handler: `(error, result)` for the response frame,
/// or a handler-level failure mapped by the dispatcher.
pub type HandlerResult =
    Result<(Option<Vec<Value>>, Option<Vec<Value>>), HandlerError>;

/// Failure modes a request handler can report
#[derive(Debug)]
pub enum HandlerError {
    /// The request did not have the shape the handler expects (→ 400)
    Malformed(String),
    /// The handler itself failed unexpectedly (→ 418)
    Failed(String),
}

/// Handler for inbound requests, registered under a function name.
///
/// Handlers run on the receive worker of a thread-per-core runtime; they
/// must not block, and no `Send` bound is required.
pub type RequestHandler = Box<dyn FnMut(&Request) -> HandlerResult>;
/// Handler for inbound notifications
pub type NotifyHandler = Box<dyn FnMut(&Notify)>;
/// One-shot callback resolving an in-flight request
pub type ResponseCallback = Box<dyn FnOnce(Response)>;
/// One-shot hook fired when the session closes
pub type CloseHandler = Box<dyn FnOnce()>;

struct RpcShared {
    dispatcher: Mutex<HashMap<String, RequestHandler>>,
    callbacks: Mutex<HashMap<u32, ResponseCallback>>,
    notify_handler: Mutex<Option<NotifyHandler>>,
    close_handler: Mutex<Option<CloseHandler>>,
    decoder: Mutex<MessageDecoder>,
}

impl RpcShared {
    /// Feed decrypted bytes; returns packed reply frames to transmit.
    fn on_frame(&self, data: &[u8]) -> Vec<Bytes> {
        let mut replies = Vec::new();
        self.decoder.lock().feed(data);

        loop {
            let message = match self.decoder.lock().next() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!("{}", e);
                    push_reply(
                        &mut replies,
                        Response::error(0, 400, "Invalid Message Format"),
                    );
                    continue;
                }
            };

            match message {
                Message::Request(req) => {
                    debug!("received request: {} (id {})", req.function, req.msgid);
                    if let Some(response) = self.route_request(&req) {
                        push_reply(&mut replies, response);
                    }
                }
                Message::Response(resp) => self.route_response(resp),
                Message::Notify(notify) => self.route_notify(&notify),
            }
        }

        replies
    }

    fn route_request(&self, req: &Request) -> Option<Response> {
        let mut dispatcher = self.dispatcher.lock();
        let Some(handler) = dispatcher.get_mut(&req.function) else {
            return Some(Response::error(req.msgid, 404, "Function does not exist!"));
        };

        match handler(req) {
            Ok((None, None)) => None,
            Ok((error, result)) => Some(Response {
                msgid: req.msgid,
                error,
                result,
            }),
            Err(HandlerError::Malformed(detail)) => {
                info!("unable to handle message: {}", detail);
                Some(Response::error(
                    req.msgid,
                    400,
                    &format!("Could not handle request! {detail}"),
                ))
            }
            Err(HandlerError::Failed(detail)) => {
                warn!("unexpected exception occurred: {}", detail);
                Some(Response::error(req.msgid, 418, "Unexpected exception occurred!"))
            }
        }
    }

    fn route_response(&self, resp: Response) {
        let callback = self.callbacks.lock().remove(&resp.msgid);
        match callback {
            Some(callback) => callback(resp),
            None => {
                if let Some(error) = &resp.error {
                    warn!("received error unrelated to any message: {:?}", error);
                } else {
                    warn!("the msgid in given response does not match any request");
                }
            }
        }
    }

    fn route_notify(&self, notify: &Notify) {
        let mut handler = self.notify_handler.lock();
        match handler.as_mut() {
            Some(handler) => handler(notify),
            None => debug!("dropping notification for {:?}", notify.function),
        }
    }

    /// Fire the close hook once and drop every pending callback.
    fn fire_closed(&self) {
        self.callbacks.lock().clear();
        let handler = self.close_handler.lock().take();
        if let Some(handler) = handler {
            handler();
        }
    }
}

fn push_reply(replies: &mut Vec<Bytes>, response: Response) {
    match Message::Response(response).pack() {
        Ok(bytes) => replies.push(bytes),
        Err(e) => warn!("failed to encode reply: {}", e),
    }
}

/// The RPC endpoint: a connection plus dispatch state
pub struct MsgpackRpc {
    shared: Arc<RpcShared>,
    conn: Mutex<Option<Arc<Connection>>>,
}

impl Default for MsgpackRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgpackRpc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RpcShared {
                dispatcher: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(HashMap::new()),
                notify_handler: Mutex::new(None),
                close_handler: Mutex::new(None),
                decoder: Mutex::new(MessageDecoder::new()),
            }),
            conn: Mutex::new(None),
        }
    }

    /// Connect to the core and start dispatching inbound messages.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        crypto: CryptoSession,
    ) -> Result<(), RpcError> {
        let shared = self.shared.clone();
        let handler: FrameHandler = Box::new(move |event| match event {
            ConnectionEvent::Frame(data) => shared.on_frame(&data),
            ConnectionEvent::Closed => {
                shared.fire_closed();
                Vec::new()
            }
        });

        let conn = Connection::connect(host, port, crypto, handler, true).await?;
        *self.conn.lock() = Some(Arc::new(conn));
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .is_some_and(|conn| !conn.is_disconnected())
    }

    /// Send a message. For requests, an optional response callback is
    /// registered under the message id before any bytes hit the wire.
    pub async fn send(
        &self,
        msg: Message,
        callback: Option<ResponseCallback>,
    ) -> Result<(), RpcError> {
        let conn = self
            .conn
            .lock()
            .clone()
            .ok_or(RpcError::Transport(TransportError::BrokenPipe))?;

        let data = msg.pack()?;

        let registered = match (&msg, callback) {
            (Message::Request(req), Some(callback)) => {
                let mut callbacks = self.shared.callbacks.lock();
                if callbacks.contains_key(&req.msgid) {
                    return Err(RpcError::MsgidCollision(req.msgid));
                }
                callbacks.insert(req.msgid, callback);
                Some(req.msgid)
            }
            _ => None,
        };

        if let Err(e) = conn.send(&data).await {
            if let Some(msgid) = registered {
                self.shared.callbacks.lock().remove(&msgid);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Register a request handler under a function name.
    pub fn register_function(
        &self,
        handler: RequestHandler,
        name: &str,
    ) -> Result<(), RpcError> {
        let mut dispatcher = self.shared.dispatcher.lock();
        if dispatcher.contains_key(name) {
            return Err(RpcError::DuplicateHandler(name.to_string()));
        }
        dispatcher.insert(name.to_string(), handler);
        Ok(())
    }

    /// Install the handler for inbound notifications.
    pub fn set_notify_handler(&self, handler: NotifyHandler) {
        *self.shared.notify_handler.lock() = Some(handler);
    }

    /// Install the one-shot hook fired when the session closes.
    pub fn set_close_handler(&self, handler: CloseHandler) {
        *self.shared.close_handler.lock() = Some(handler);
    }

    /// Disconnect from the core and fire the close hook.
    pub async fn disconnect(&self) {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.disconnect().await;
        }
        self.shared.fire_closed();
    }
}
