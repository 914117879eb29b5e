/// Error types for the splonebox wire protocol.
///
/// `PacketTooShort` deserves a note: it is not a failure. The stream
/// reassembly loop uses it as the "wait for more bytes" signal, while every
/// other `CryptoError` poisons the reassembly buffer (packet boundaries are
/// only knowable after a successful length-box decrypt, so there is nothing
/// to resynchronize on).
use std::io;
use thiserror::Error;

/// Errors produced by the crypto session and key handling
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Identifier mismatch, failed box authentication or bad nonce.
    /// Fatal for the packet; the reassembly buffer is discarded.
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    /// Not enough bytes to even verify the length prefix. Benign.
    #[error("packet too short")]
    PacketTooShort,

    /// Message packet produced or consumed before the handshake finished
    #[error("crypto session not established")]
    NotEstablished,

    /// Authenticated encryption failed while producing a packet
    #[error("box encryption failed")]
    EncryptFailed,

    /// Key material on disk is missing or malformed
    #[error("key file {path}: {reason}")]
    Key { path: String, reason: String },

    /// The persistent vouch-nonce store failed
    #[error("nonce store: {0}")]
    NonceStore(#[source] io::Error),
}

/// Transport-level errors surfaced by `Connection`
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("host unknown: {0}")]
    HostUnknown(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("bad connection arguments: {0}")]
    BadAddress(String),

    /// The session has been torn down; no further sends are possible
    #[error("broken pipe: connection has been closed")]
    BrokenPipe,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors produced by the MessagePack-RPC layer
#[derive(Debug, Error)]
pub enum RpcError {
    /// A message failed shape validation or could not be encoded
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A second in-flight request drew an already-used message id.
    /// The later call fails instead of silently stealing the callback slot.
    #[error("message id {0} collides with an in-flight request")]
    MsgidCollision(u32),

    /// A handler name was registered twice
    #[error("handler for {0:?} is already registered")]
    DuplicateHandler(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RpcError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;
