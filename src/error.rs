//! # Error Types
//!
//! Error handling for the stream bridge.
//!
//! This module defines every error variant that can surface while moving
//! calls and live byte streams between nodes, from malformed wire packets to
//! producer-side stream failures relayed across the transporter.
//!
//! ## Error Categories
//! - **Packet Errors**: malformed or oversized payloads (dropped and logged, never
//!   delivered to application code)
//! - **Stream Errors**: producer failures relayed through `STREAM_ERROR`
//! - **Call Errors**: unknown actions, remote handler failures, timeouts
//! - **Transport Errors**: unreachable nodes, closed connections
//! - **Configuration Errors**: invalid settings
//!
//! ## Example Usage
//! ```rust
//! use stream_bridge::error::{BridgeError, Result};
//!
//! fn require_action(name: &str) -> Result<&str> {
//!     if name.contains('.') {
//!         Ok(name)
//!     } else {
//!         Err(BridgeError::ActionNotFound(name.to_string()))
//!     }
//! }
//!
//! assert!(require_action("file.save").is_ok());
//! assert!(require_action("save").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::stream::Direction;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Packet validation errors
    pub const ERR_UNKNOWN_PACKET_TYPE: &str = "Unknown packet type tag";
    pub const ERR_MISSING_ACTION: &str = "REQUEST packet without action";
    pub const ERR_MISSING_PAYLOAD: &str = "STREAM_DATA packet without payload";
    pub const ERR_MISSING_ERROR: &str = "STREAM_ERROR packet without error descriptor";
    pub const ERR_MISSING_DIRECTION: &str = "Stream packet without direction";
    pub const ERR_EMPTY_PAYLOAD: &str = "Empty payload";

    /// Stream lifecycle errors
    pub const ERR_NODE_UNREACHABLE: &str = "Node unreachable";
    pub const ERR_CALL_TIMEOUT: &str = "Call timed out";
    pub const ERR_BROKER_STOPPED: &str = "Broker stopped";
    pub const ERR_CONSUMER_GONE: &str = "Stream consumer is gone";
    pub const ERR_STREAM_CLOSED: &str = "Stream closed";
}

/// A producer-side stream failure.
///
/// When the failure was relayed from another node, `node_id` names the node
/// where it originated and the rendered message carries that identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamError {
    message: String,
    node_id: Option<String>,
}

impl StreamError {
    /// A local failure with no origin annotation.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: None,
        }
    }

    /// A failure that originated on `node_id`.
    pub fn remote(message: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: Some(node_id.into()),
        }
    }

    /// The bare message, without origin annotation.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The node the failure originated on, if it was relayed.
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "{} (NodeID: {})", self.message, node),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::new(err.to_string())
    }
}

// BridgeError is the primary error type for all bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Duplicate stream proxy for call {call_id} ({direction})")]
    DuplicateProxy {
        call_id: String,
        direction: Direction,
    },

    #[error("Remote stream error: {0}")]
    RemoteStream(StreamError),

    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("{message} (NodeID: {node_id})")]
    ActionFailed { message: String, node_id: String },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Service already registered: {0}")]
    ServiceExists(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame header")]
    InvalidHeader,

    #[error("Unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Broker not started")]
    NotStarted,

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BridgeError {
    /// The message a handler failure carries when it is relayed to the caller.
    pub fn relay_message(&self) -> String {
        match self {
            BridgeError::Handler(message) => message.clone(),
            BridgeError::ActionFailed { message, .. } => message.clone(),
            BridgeError::RemoteStream(err) => err.message().to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StreamError> for BridgeError {
    fn from(err: StreamError) -> Self {
        BridgeError::RemoteStream(err)
    }
}

/// Type alias for Results using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
