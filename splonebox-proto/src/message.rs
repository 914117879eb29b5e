//! MessagePack-RPC message types and codec.
//!
//! The wire format follows the MessagePack-RPC spec: requests are
//! `[0, msgid, method, params]`, responses `[1, msgid, error, result]`,
//! notifications `[2, method, params]`. Message ids are unsigned and
//! strictly below 2^32. Method names are ASCII; peers may encode them as
//! either str or bin, both are accepted on decode.
//!
//! `MessageDecoder` is the streaming half: feed it decrypted payload bytes
//! and pull complete messages out, with truncated input ("need more bytes")
//! kept distinct from corrupt input.

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};
use rmpv::Value;

use crate::error::RpcError;

/// Message ids live in [0, 2^32)
pub const MAX_MESSAGE_ID: u64 = u32::MAX as u64;

const TYPE_REQUEST: u64 = 0;
const TYPE_RESPONSE: u64 = 1;
const TYPE_NOTIFY: u64 = 2;

/// A decoded RPC message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notify(Notify),
}

/// `[0, msgid, method, params]`
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub msgid: u32,
    pub function: String,
    pub arguments: Vec<Value>,
}

impl Request {
    /// Build a request with a freshly drawn random message id.
    pub fn new(function: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            msgid: rand::random::<u32>(),
            function: function.into(),
            arguments,
        }
    }

    /// Draw a new message id (collision avoidance).
    pub fn regenerate_id(&mut self) {
        self.msgid = rand::random::<u32>();
    }
}

/// `[1, msgid, error, result]` — exactly one of error/result is set
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub msgid: u32,
    pub error: Option<Vec<Value>>,
    pub result: Option<Vec<Value>>,
}

impl Response {
    /// Successful response carrying a result body.
    #[must_use]
    pub const fn result(msgid: u32, result: Vec<Value>) -> Self {
        Self {
            msgid,
            error: None,
            result: Some(result),
        }
    }

    /// Error response in the `[code, text]` convention.
    #[must_use]
    pub fn error(msgid: u32, code: i64, text: &str) -> Self {
        Self {
            msgid,
            error: Some(vec![Value::from(code), Value::from(text)]),
            result: None,
        }
    }
}

/// `[2, method, params]`
#[derive(Debug, Clone, PartialEq)]
pub struct Notify {
    pub function: String,
    pub arguments: Vec<Value>,
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn pack(&self) -> Result<Bytes, RpcError> {
        let value = match self {
            Self::Request(req) => Value::Array(vec![
                Value::from(TYPE_REQUEST),
                Value::from(req.msgid),
                Value::from(req.function.as_str()),
                Value::Array(req.arguments.clone()),
            ]),
            Self::Response(resp) => {
                if resp.error.is_some() == resp.result.is_some() {
                    return Err(RpcError::invalid(
                        "response must carry exactly one of error and result",
                    ));
                }
                let wrap = |v: &Option<Vec<Value>>| match v {
                    Some(items) => Value::Array(items.clone()),
                    None => Value::Nil,
                };
                Value::Array(vec![
                    Value::from(TYPE_RESPONSE),
                    Value::from(resp.msgid),
                    wrap(&resp.error),
                    wrap(&resp.result),
                ])
            }
            Self::Notify(notify) => Value::Array(vec![
                Value::from(TYPE_NOTIFY),
                Value::from(notify.function.as_str()),
                Value::Array(notify.arguments.clone()),
            ]),
        };

        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value)
            .map_err(|e| RpcError::invalid(format!("failed to encode message: {e}")))?;
        Ok(Bytes::from(buf))
    }

    /// Validate a decoded MessagePack value against the RPC shape rules.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Array(items) = value else {
            return Err(RpcError::invalid("invalid form"));
        };

        let kind = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::invalid("invalid type"))?;

        match kind {
            TYPE_REQUEST => {
                if items.len() != 4 {
                    return Err(RpcError::invalid("invalid form"));
                }
                let msgid = as_msgid(&items[1])?;
                let function = as_method(&items[2])?;
                let arguments = as_array(&items[3], "invalid body")?;
                Ok(Self::Request(Request {
                    msgid,
                    function,
                    arguments,
                }))
            }
            TYPE_RESPONSE => {
                if items.len() != 4 {
                    return Err(RpcError::invalid("invalid form"));
                }
                let msgid = as_msgid(&items[1])?;
                let error = as_optional_array(&items[2], "invalid error")?;
                let result = as_optional_array(&items[3], "invalid result")?;
                if error.is_some() == result.is_some() {
                    return Err(RpcError::invalid(
                        "response must carry exactly one of error and result",
                    ));
                }
                Ok(Self::Response(Response {
                    msgid,
                    error,
                    result,
                }))
            }
            TYPE_NOTIFY => {
                if items.len() != 3 {
                    return Err(RpcError::invalid("invalid form"));
                }
                let function = as_method(&items[1])?;
                let arguments = as_array(&items[2], "notification body is invalid")?;
                Ok(Self::Notify(Notify {
                    function,
                    arguments,
                }))
            }
            _ => Err(RpcError::invalid("invalid type")),
        }
    }
}

fn as_msgid(value: &Value) -> Result<u32, RpcError> {
    value
        .as_u64()
        .filter(|id| *id <= MAX_MESSAGE_ID)
        .map(|id| id as u32)
        .ok_or_else(|| RpcError::invalid("invalid message id"))
}

fn as_method(value: &Value) -> Result<String, RpcError> {
    let name = match value {
        Value::String(s) => s.as_str().map(str::to_owned),
        Value::Binary(b) => std::str::from_utf8(b).ok().map(str::to_owned),
        _ => None,
    };
    name.filter(|n| n.is_ascii())
        .ok_or_else(|| RpcError::invalid("invalid method"))
}

fn as_array(value: &Value, reason: &'static str) -> Result<Vec<Value>, RpcError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(RpcError::invalid(reason)),
    }
}

fn as_optional_array(value: &Value, reason: &'static str) -> Result<Option<Vec<Value>>, RpcError> {
    match value {
        Value::Nil => Ok(None),
        Value::Array(items) => Ok(Some(items.clone())),
        _ => Err(RpcError::invalid(reason)),
    }
}

/// Streaming MessagePack decoder.
///
/// Frames may arrive split or concatenated arbitrarily; `next` yields
/// complete messages and leaves partial input buffered. Corrupt input
/// clears the buffer entirely — there is no marker to resynchronize on in
/// a MessagePack stream.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decode the next complete message.
    ///
    /// Returns:
    /// - `Ok(Some(message))` → a full frame decoded and validated
    /// - `Ok(None)` → need more bytes
    /// - `Err` → corrupt stream or invalid message shape
    pub fn next(&mut self) -> Result<Option<Message>, RpcError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buf[..]);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buf.advance(consumed);
                Message::from_value(value).map(Some)
            }
            Err(ref e) if is_truncated(e) => Ok(None),
            Err(e) => {
                self.buf.clear();
                Err(RpcError::invalid(format!("malformed msgpack stream: {e}")))
            }
        }
    }
}

fn is_truncated(e: &rmpv::decode::Error) -> bool {
    use rmpv::decode::Error;
    match e {
        Error::InvalidMarkerRead(io) | Error::InvalidDataRead(io) => {
            io.kind() == std::io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}
