//! # splonebox
//!
//! Client library for the splonebox plugin host. A process connects to the
//! core over one long-lived encrypted TCP session, registers itself as a
//! plugin exposing named functions, invokes functions hosted by other
//! plugins, and participates in the publish/subscribe event bus.
//!
//! ## Quick tour
//!
//! ```rust,no_run
//! use splonebox::{Core, CryptoSession, Plugin, RemoteFunction, ArgKind, Value};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = Core::new();
//! core.connect("localhost", 8080, CryptoSession::from_dir(".keys")?).await?;
//!
//! let plugin = Plugin::new("sampleplugin", "adds up", "bob", "MIT", &core)?;
//! plugin.add_function(RemoteFunction::new(
//!     "add",
//!     "adds two numbers",
//!     vec![ArgKind::I64, ArgKind::I64],
//!     Arc::new(|args| {
//!         let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
//!         Ok(Some(Value::from(a + b)))
//!     }),
//! ))?;
//!
//! plugin.register().await?.wait().await?;
//! core.listen().await;
//! # Ok(())
//! # }
//! ```
//!
//! Everything inbound is driven by a dedicated receive worker; incoming
//! `run` requests execute on per-call tasks so one slow function never
//! stalls acknowledgements.

// Allow some pedantic lints
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod api;
pub mod dev_tracing;

pub use api::call::{
    ApiBroadcast, ApiRegister, ApiResult, ApiRun, ApiSubscribe, ApiUnsubscribe, IncomingResult,
    IncomingRun, PluginMeta,
};
pub use api::core::Core;
pub use api::error::{ApiError, RemoteError};
pub use api::function::{ArgKind, FunctionError, FunctionHandler, RemoteFunction};
pub use api::plugin::Plugin;
pub use api::remote_plugin::RemotePlugin;
pub use api::result::{CallStatus, PendingResponse, RunResult};
pub use api::subscription::Subscription;

// The transport building blocks a client needs to hold keys and connect
pub use splonebox_proto::{CryptoSession, Keyring, NonceStore};

pub use rmpv::Value;

/// Prelude module for convenient imports
///
/// ```rust
/// use splonebox::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        ApiError, ArgKind, CallStatus, Core, CryptoSession, Plugin, RemoteError, RemoteFunction,
        RemotePlugin, RunResult, Subscription, Value,
    };
}
