//! Connection: socket ownership, handshake, reassembly, serialized sends.
//!
//! One `Connection` is one encrypted session with the core. The handshake
//! runs to completion inside `connect` *before* the receive worker is
//! spawned, so there is no window where application data races the
//! handshake. Afterwards:
//!
//! - sends may come from any task; the crypto nonce draw and the socket
//!   write happen under one async mutex so wire order equals nonce order
//! - all reads happen on the receive worker, which reassembles the byte
//!   stream into whole crypto packets and hands plaintext frames to the
//!   callback
//!
//! Two reassembly behaviors are deliberate: a short read stalls without
//! consuming bytes, and an authentication failure discards the entire
//! buffer — packet boundaries are only knowable after the length box
//! opens, so there is nothing to resynchronize on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use compio::net::TcpStream;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::RecvBuffer;
use crate::crypto::{CryptoSession, COOKIE_PACKET_SIZE};
use crate::error::{CryptoError, TransportError};
use crate::tcp;

/// Upper bound on a single socket read
const RECV_CHUNK_SIZE: usize = 1024 * 1024;

/// Events delivered to the connection callback
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A decrypted application frame
    Frame(Bytes),
    /// The session is gone; emitted exactly once, after the last frame
    Closed,
}

/// Callback invoked by the receive worker. Returned buffers are plaintext
/// frames the connection encrypts and sends back (e.g. RPC error replies).
///
/// Runs on the receive worker of a thread-per-core runtime, so no `Send`
/// bound is required.
pub type FrameHandler = Box<dyn FnMut(ConnectionEvent) -> Vec<Bytes> + 'static>;

struct Shared {
    stream: TcpStream,
    crypto: Mutex<CryptoSession>,
    write_lock: async_lock::Mutex<()>,
    disconnected: AtomicBool,
}

impl Shared {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(TransportError::BrokenPipe);
        }

        let _guard = self.write_lock.lock().await;
        // Nonce draw and write stay under the guard: concurrent senders
        // must not interleave packets out of nonce order.
        let packet = self.crypto.lock().write(payload)?;

        let mut stream = &self.stream;
        let BufResult(res, _) = stream.write_all(packet.to_vec()).await;
        res.map_err(|e| {
            if self.disconnected.load(Ordering::Acquire) {
                TransportError::BrokenPipe
            } else {
                TransportError::Io(e)
            }
        })?;
        Ok(())
    }
}

/// An established encrypted session with the core
pub struct Connection {
    shared: Arc<Shared>,
    listener: Mutex<Option<compio::runtime::Task<()>>>,
}

impl Connection {
    /// Resolve and connect to `host:port`, run the crypto handshake and,
    /// if `listen` is set, start the receive worker.
    ///
    /// The callback observes every decrypted frame plus a final `Closed`
    /// event when the session ends from either side.
    pub async fn connect(
        host: &str,
        port: u16,
        crypto: CryptoSession,
        handler: FrameHandler,
        listen: bool,
    ) -> Result<Self, TransportError> {
        let mut crypto = crypto;
        if host.is_empty() {
            return Err(TransportError::BadAddress("empty host name".into()));
        }

        debug!("connecting to host: {}:{}", host, port);
        let stream = TcpStream::connect(format!("{host}:{port}"))
            .await
            .map_err(|e| classify_connect_error(e, host, port))?;
        debug!("connected to {}:{}", host, port);

        if let Err(e) = tcp::set_nodelay(&stream) {
            debug!("could not set TCP_NODELAY: {}", e);
        }

        debug!("preparing encryption");
        Self::handshake(&stream, &mut crypto).await?;
        debug!("encryption initialized");

        let shared = Arc::new(Shared {
            stream,
            crypto: Mutex::new(crypto),
            write_lock: async_lock::Mutex::new(()),
            disconnected: AtomicBool::new(false),
        });

        let listener = if listen {
            Some(compio::runtime::spawn(recv_loop(shared.clone(), handler)))
        } else {
            None
        };

        Ok(Self {
            shared,
            listener: Mutex::new(listener),
        })
    }

    /// Hello → Cookie → Initiate, sequentially on the caller's task.
    async fn handshake(
        stream: &TcpStream,
        crypto: &mut CryptoSession,
    ) -> Result<(), TransportError> {
        let mut stream = stream;

        debug!("sending hello packet");
        let hello = crypto.hello()?;
        let BufResult(res, _) = stream.write_all(hello.to_vec()).await;
        res?;

        debug!("receiving cookie packet");
        let cookie = [0u8; COOKIE_PACKET_SIZE];
        let BufResult(res, cookie) = stream.read_exact(cookie).await;
        res?;

        debug!("sending initiate packet");
        let initiate = crypto.initiate(&cookie)?;
        let BufResult(res, _) = stream.write_all(initiate.to_vec()).await;
        res?;

        Ok(())
    }

    /// Encrypt and write one application frame.
    ///
    /// Fails with `BrokenPipe` once the session has been torn down.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.shared.send(payload).await
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::Acquire)
    }

    /// Tear the session down: latch the disconnect flag, shut the socket
    /// down in both directions (unblocking the receive worker) and join
    /// the worker.
    pub async fn disconnect(&self) {
        self.shared.disconnected.store(true, Ordering::Release);
        if let Err(e) = tcp::shutdown_both(&self.shared.stream) {
            debug!("socket shutdown failed: {}", e);
        }
        let task = self.listener.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

fn classify_connect_error(e: std::io::Error, host: &str, port: u16) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            TransportError::ConnectionRefused(format!("{host}:{port}"))
        }
        std::io::ErrorKind::InvalidInput => TransportError::BadAddress(format!("{host}:{port}")),
        // Name resolution failures surface without a dedicated ErrorKind
        std::io::ErrorKind::Other => TransportError::HostUnknown(host.to_string()),
        _ => TransportError::Io(e),
    }
}

/// The receive worker: read chunks, reassemble packets, deliver frames.
async fn recv_loop(shared: Arc<Shared>, mut handler: FrameHandler) {
    let mut buf = RecvBuffer::new();

    'recv: while !shared.disconnected.load(Ordering::Acquire) {
        let chunk = Vec::with_capacity(RECV_CHUNK_SIZE);
        let mut stream = &shared.stream;
        let BufResult(res, chunk) = stream.read(chunk).await;

        match res {
            Ok(0) => {
                if !shared.disconnected.swap(true, Ordering::AcqRel) {
                    warn!("connection was closed by the server");
                }
                break;
            }
            Ok(n) => debug!("received {} bytes", n),
            Err(e) => {
                // An error after an intentional disconnect is expected noise.
                if !shared.disconnected.swap(true, Ordering::AcqRel) {
                    warn!("socket error on receive loop: {}", e);
                }
                break;
            }
        }

        buf.push(&chunk);

        loop {
            let length = match shared.crypto.lock().verify_length(buf.as_slice()) {
                Ok(length) => length,
                Err(CryptoError::PacketTooShort) => break,
                Err(e) => {
                    warn!("{}; dropping reassembly buffer", e);
                    buf.clear();
                    break;
                }
            };

            if buf.len() < length {
                break;
            }

            let plain = match shared.crypto.lock().read(&buf.as_slice()[..length]) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!("{}; dropping reassembly buffer", e);
                    buf.clear();
                    break;
                }
            };
            buf.consume(length);

            for reply in handler(ConnectionEvent::Frame(plain)) {
                if shared.send(&reply).await.is_err() {
                    break 'recv;
                }
            }
        }
    }

    shared.disconnected.store(true, Ordering::Release);
    let _ = handler(ConnectionEvent::Closed);
}
