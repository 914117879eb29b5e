//! Remote-function descriptors.
//!
//! Each function a plugin exposes is described to the core as
//! `[name, docstring, [argument defaults...]]`. Argument types are a fixed
//! enumeration; on the wire each kind is represented by a canonical default
//! value — the values are picked so no two kinds pack to the same
//! MessagePack shape.

use std::sync::Arc;

use rmpv::Value;
use thiserror::Error;

/// The parameter kinds a remote function may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Bytes,
    U64,
    I64,
    F64,
    Str,
    Long,
}

impl ArgKind {
    /// The canonical wire value announcing this kind in a register call.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::Bool => Value::Boolean(false),
            Self::Bytes => Value::Binary(Vec::new()),
            Self::U64 => Value::from(3u64),
            Self::I64 | Self::Long => Value::from(-1i64),
            Self::F64 => Value::F64(2.0),
            Self::Str => Value::from(""),
        }
    }
}

/// Failure modes of a user-defined function
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("wrong number of arguments")]
    BadArguments,

    #[error("function execution failed: {0}")]
    Failed(String),
}

/// A user-defined function body. Returning `Ok(Some(value))` sends a
/// `result` call back to the core; `Ok(None)` produces no result.
pub type FunctionHandler =
    Arc<dyn Fn(Vec<Value>) -> Result<Option<Value>, FunctionError> + Send + Sync>;

/// A named function a plugin exposes to the core
#[derive(Clone)]
pub struct RemoteFunction {
    pub name: String,
    pub doc: String,
    pub args: Vec<ArgKind>,
    pub handler: FunctionHandler,
}

impl RemoteFunction {
    pub fn new(
        name: impl Into<String>,
        doc: impl Into<String>,
        args: Vec<ArgKind>,
        handler: FunctionHandler,
    ) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            args,
            handler,
        }
    }

    /// The `[name, doc, [defaults]]` triple sent in a register call.
    #[must_use]
    pub fn describe(&self) -> Value {
        Value::Array(vec![
            Value::from(self.name.as_str()),
            Value::from(self.doc.as_str()),
            Value::Array(self.args.iter().map(|a| a.default_value()).collect()),
        ])
    }
}

impl std::fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("name", &self.name)
            .field("doc", &self.doc)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}
