//! Validated builders for the application calls.
//!
//! Every call the client can place (`register`, `run`, `result`,
//! `broadcast`, `subscribe`, `unsubscribe`) is constructed through one of
//! these types. All content validation happens here, before any I/O, so a
//! malformed call never reaches the wire. The inbound directions of `run`
//! and `result` parse with the same strictness.

use rmpv::Value;
use splonebox_proto::{Message, Notify, Request};

use crate::api::error::ApiError;

/// Plugin metadata: `[name, description, author, license]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMeta {
    pub name: String,
    pub desc: String,
    pub author: String,
    pub license: String,
}

impl PluginMeta {
    pub fn new(
        name: impl Into<String>,
        desc: impl Into<String>,
        author: impl Into<String>,
        license: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            author: author.into(),
            license: license.into(),
        }
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.name.as_str()),
            Value::from(self.desc.as_str()),
            Value::from(self.author.as_str()),
            Value::from(self.license.as_str()),
        ])
    }
}

/// Argument values a `run` call may carry: booleans, integers, floats,
/// strings and byte strings. Anything else is rejected at encode time.
fn is_valid_argument(value: &Value) -> bool {
    matches!(
        value,
        Value::Boolean(_)
            | Value::Integer(_)
            | Value::F32(_)
            | Value::F64(_)
            | Value::String(_)
            | Value::Binary(_)
    )
}

/// The set of argument-type defaults accepted inside a register call
fn is_valid_type_default(value: &Value) -> bool {
    *value == Value::from("")
        || *value == Value::from(3u64)
        || *value == Value::from(-1i64)
        || *value == Value::Boolean(false)
        || *value == Value::F64(2.0)
        || *value == Value::Binary(Vec::new())
}

/// `register` call: announce the plugin and its functions
#[derive(Debug)]
pub struct ApiRegister {
    pub(crate) msg: Request,
}

impl ApiRegister {
    /// Build a register call from plugin metadata and function description
    /// triples (`[name, doc, [type defaults...]]`).
    pub fn new(metadata: &PluginMeta, functions: &[Value]) -> Result<Self, ApiError> {
        for function in functions {
            let Value::Array(triple) = function else {
                return Err(ApiError::invalid_call("malformed functions parameter"));
            };
            if triple.len() != 3 {
                return Err(ApiError::invalid_call("malformed functions parameter"));
            }
            if !matches!(triple[0], Value::String(_)) {
                return Err(ApiError::invalid_call("function name has to be a string"));
            }
            if !matches!(triple[1], Value::String(_)) {
                return Err(ApiError::invalid_call(
                    "function description has to be a string",
                ));
            }
            let Value::Array(args) = &triple[2] else {
                return Err(ApiError::invalid_call("function arguments have to be a list"));
            };
            if args.iter().any(|arg| !is_valid_type_default(arg)) {
                return Err(ApiError::invalid_call(
                    "invalid type identifier in argument list",
                ));
            }
        }

        Ok(Self {
            msg: Request::new(
                "register",
                vec![metadata.to_value(), Value::Array(functions.to_vec())],
            ),
        })
    }
}

/// Outgoing `run` call: invoke a function on a remote plugin
#[derive(Debug)]
pub struct ApiRun {
    pub(crate) msg: Request,
}

impl ApiRun {
    pub fn new(plugin_id: &str, function: &str, arguments: Vec<Value>) -> Result<Self, ApiError> {
        if arguments.iter().any(|arg| !is_valid_argument(arg)) {
            return Err(ApiError::invalid_call("invalid argument type"));
        }

        Ok(Self {
            msg: Request::new(
                "run",
                vec![
                    Value::Array(vec![Value::from(plugin_id), Value::Nil]),
                    Value::from(function),
                    Value::Array(arguments),
                ],
            ),
        })
    }
}

/// A `run` request received from the core, parsed and validated
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRun {
    pub call_id: u64,
    pub function: String,
    pub arguments: Vec<Value>,
}

impl IncomingRun {
    pub fn from_request(req: &Request) -> Result<Self, ApiError> {
        if req.function != "run" {
            return Err(ApiError::invalid_call("specified method is not run"));
        }
        if req.arguments.len() != 3 {
            return Err(ApiError::invalid_call("message body is faulty"));
        }

        let Value::Array(target) = &req.arguments[0] else {
            return Err(ApiError::invalid_call("first element of body has to be a list"));
        };
        if target.len() != 2 {
            return Err(ApiError::invalid_call("first element of body has to be a list"));
        }
        if target[0] != Value::Nil {
            return Err(ApiError::invalid_call("plugin identifier set on incoming msg"));
        }
        let call_id = target[1]
            .as_u64()
            .ok_or_else(|| ApiError::invalid_call("call id is invalid"))?;

        let function = method_name(&req.arguments[1])
            .ok_or_else(|| ApiError::invalid_call("function name is not a string"))?;

        let Value::Array(arguments) = &req.arguments[2] else {
            return Err(ApiError::invalid_call("third element of body has to be a list"));
        };
        if arguments.iter().any(|arg| !is_valid_argument(arg)) {
            return Err(ApiError::invalid_call("invalid argument type"));
        }

        Ok(Self {
            call_id,
            function,
            arguments: arguments.clone(),
        })
    }
}

/// `result` call: deliver the outcome of a previously acknowledged run
#[derive(Debug)]
pub struct ApiResult {
    pub(crate) msg: Request,
}

impl ApiResult {
    pub fn new(call_id: u64, result: Value) -> Result<Self, ApiError> {
        if result == Value::Nil {
            return Err(ApiError::invalid_call("result can not be nil"));
        }

        Ok(Self {
            msg: Request::new(
                "result",
                vec![
                    Value::Array(vec![Value::from(call_id)]),
                    Value::Array(vec![result]),
                ],
            ),
        })
    }
}

/// A `result` request received from the core, parsed and validated
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingResult {
    pub call_id: u64,
    pub value: Value,
}

impl IncomingResult {
    pub fn from_request(req: &Request) -> Result<Self, ApiError> {
        if req.function != "result" {
            return Err(ApiError::invalid_call("specified method is not result"));
        }
        if req.arguments.len() != 2 {
            return Err(ApiError::invalid_call("arguments length has to be 2"));
        }

        let Value::Array(id_part) = &req.arguments[0] else {
            return Err(ApiError::invalid_call("call id is not in a list"));
        };
        let [call_id] = id_part.as_slice() else {
            return Err(ApiError::invalid_call("call id is not in a list"));
        };
        let call_id = call_id
            .as_u64()
            .ok_or_else(|| ApiError::invalid_call("call id is invalid"))?;

        let Value::Array(value_part) = &req.arguments[1] else {
            return Err(ApiError::invalid_call("result is not in a list"));
        };
        let [value] = value_part.as_slice() else {
            return Err(ApiError::invalid_call("result is not in a list"));
        };

        Ok(Self {
            call_id,
            value: value.clone(),
        })
    }
}

/// `broadcast` call: publish an event, by default as a notification
#[derive(Debug)]
pub struct ApiBroadcast {
    pub(crate) msg: Message,
}

impl ApiBroadcast {
    pub fn new(event: &str, arguments: Vec<Value>, as_notification: bool) -> Result<Self, ApiError> {
        if arguments.iter().any(|arg| !is_valid_argument(arg)) {
            return Err(ApiError::invalid_call("invalid argument type"));
        }

        let body = vec![Value::from(event), Value::Array(arguments)];
        let msg = if as_notification {
            Message::Notify(Notify {
                function: "broadcast".into(),
                arguments: body,
            })
        } else {
            Message::Request(Request::new("broadcast", body))
        };
        Ok(Self { msg })
    }
}

/// `subscribe` call
#[derive(Debug)]
pub struct ApiSubscribe {
    pub(crate) msg: Request,
}

impl ApiSubscribe {
    #[must_use]
    pub fn new(event: &str) -> Self {
        Self {
            msg: Request::new("subscribe", vec![Value::from(event)]),
        }
    }
}

/// `unsubscribe` call
#[derive(Debug)]
pub struct ApiUnsubscribe {
    pub(crate) msg: Request,
}

impl ApiUnsubscribe {
    #[must_use]
    pub fn new(event: &str) -> Self {
        Self {
            msg: Request::new("unsubscribe", vec![Value::from(event)]),
        }
    }
}

fn method_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.as_str().map(str::to_owned),
        Value::Binary(b) => std::str::from_utf8(b).ok().map(str::to_owned),
        _ => None,
    }
}
