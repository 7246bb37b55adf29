//! Call context handed to action handlers.
//!
//! Call parameters and results are [`Param`]s: either an inline JSON value or
//! a live [`ByteStream`]. Whether a value crosses the wire inline or as a
//! sequence of stream packets is decided by matching on the variant.

use serde_json::Value;
use std::fmt;

use crate::core::ids::{CallId, NodeId};
use crate::core::packet::Meta;
use crate::error::{BridgeError, Result};
use crate::stream::ByteStream;

/// A call parameter or result.
pub enum Param {
    Inline(Value),
    Streamed(ByteStream),
}

impl Param {
    pub fn is_stream(&self) -> bool {
        matches!(self, Param::Streamed(_))
    }

    pub fn as_inline(&self) -> Option<&Value> {
        match self {
            Param::Inline(value) => Some(value),
            Param::Streamed(_) => None,
        }
    }

    pub fn into_inline(self) -> Option<Value> {
        match self {
            Param::Inline(value) => Some(value),
            Param::Streamed(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ByteStream> {
        match self {
            Param::Streamed(stream) => Some(stream),
            Param::Inline(_) => None,
        }
    }
}

impl Default for Param {
    fn default() -> Self {
        Param::Inline(Value::Null)
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Inline(value)
    }
}

impl From<ByteStream> for Param {
    fn from(stream: ByteStream) -> Self {
        Param::Streamed(stream)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Inline(value) => f.debug_tuple("Inline").field(value).finish(),
            Param::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}

/// Everything a handler knows about the call it serves.
#[derive(Debug)]
pub struct Context {
    pub call_id: CallId,
    pub action: String,
    pub meta: Meta,
    pub params: Param,
    /// Node running the handler
    pub node_id: NodeId,
    /// Node that made the call
    pub caller: NodeId,
}

impl Context {
    /// Move the params out, leaving `null` behind.
    pub fn take_params(&mut self) -> Param {
        std::mem::take(&mut self.params)
    }

    /// Move out a streamed param; inline params are an error.
    pub fn take_stream(&mut self) -> Result<ByteStream> {
        match self.take_params() {
            Param::Streamed(stream) => Ok(stream),
            Param::Inline(_) => Err(BridgeError::Handler(format!(
                "action '{}' expects a stream parameter",
                self.action
            ))),
        }
    }

    pub fn is_local(&self) -> bool {
        self.node_id == self.caller
    }
}
