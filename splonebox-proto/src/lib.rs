//! # splonebox-proto
//!
//! **Internal wire protocol crate for the splonebox client.**
//!
//! ⚠️ **This is an internal implementation detail. Use the `splonebox` crate for the public API.**
//!
//! This crate implements the encrypted transport and RPC plumbing the client
//! speaks to a splonebox core:
//!
//! - CurveCP-style mutual authentication (Hello → Cookie → Initiate) with
//!   short-term session keys vouched for by the long-term keys (`crypto`)
//! - Nonce-ordered, length-prefixed message packets with replay protection
//! - A persistent vouch-nonce counter that stays monotonic across process
//!   restarts (`nonce`)
//! - Stream reassembly over a single long-lived TCP connection (`connection`)
//! - MessagePack-RPC framing and dispatch (`message`, `rpc`)
//!
//! The layering is strict: `connection` owns the socket and hands decrypted
//! frames to `rpc`, which correlates responses and routes requests to named
//! handlers registered by the API layer above.

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod boxes;
pub mod buffer;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod message;
pub mod nonce;
pub mod rpc;
pub mod tcp;

pub use connection::{Connection, ConnectionEvent};
pub use crypto::CryptoSession;
pub use error::{CryptoError, RpcError, TransportError};
pub use keys::{KeyPair, Keyring, PublicKey, SecretKey};
pub use message::{Message, Notify, Request, Response};
pub use nonce::NonceStore;
pub use rpc::MsgpackRpc;

/// Prelude module for convenient imports
///
/// ```rust
/// use splonebox_proto::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Connection, ConnectionEvent, CryptoError, CryptoSession, KeyPair, Keyring, Message,
        MsgpackRpc, NonceStore, Notify, PublicKey, Request, Response, RpcError, SecretKey,
        TransportError,
    };
    pub use bytes::Bytes;
    pub use rmpv::Value;
}
