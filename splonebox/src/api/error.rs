use splonebox_proto::RpcError;
use thiserror::Error;

/// Errors surfaced by the API layer before or while talking to the core
#[derive(Debug, Error)]
pub enum ApiError {
    /// A call was constructed with invalid contents. Raised at the
    /// call-building site, before any I/O.
    #[error("invalid call: {0}")]
    InvalidCall(String),

    #[error("not connected to the core")]
    NotConnected,

    #[error("function {0:?} is already registered")]
    DuplicateFunction(String),

    #[error("already subscribed to {0:?}")]
    DuplicateSubscription(String),

    #[error("no subscription for {0:?}")]
    NotSubscribed(String),

    /// The core rejected the call
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ApiError {
    pub fn invalid_call(msg: impl Into<String>) -> Self {
        Self::InvalidCall(msg.into())
    }
}

/// Terminal failure of a pending call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// An error reported by the core in the `[code, text]` convention
    #[error("error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The session went away while the call was in flight
    #[error("connection to the core was lost")]
    Disconnected,
}

impl RemoteError {
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }
}
