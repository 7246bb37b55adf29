//! # Stream Bridging
//!
//! Moves live byte streams across a message-oriented transporter.
//!
//! ## Components
//! - **ByteStream**: the consumable stream local code reads, plus `StreamWriter` for producing one
//! - **StreamProxy**: per-call, per-direction state machine (`OPEN` -> `ENDED` | `ERRORED`)
//! - **ProxyRegistry**: the node's table of live proxies, keyed by `(call id, direction)`
//! - **FlowControl**: pending-acknowledgement window for backpressure
//! - **Packetizer**: local stream -> ordered `STREAM_*` packets
//! - **Reconstructor**: ordered `STREAM_*` packets -> local stream
//!
//! ## Directions
//! Directions are named from the call's point of view and are identical on
//! both nodes: `upload` is the parameter stream (caller to callee) and
//! `download` is the result stream (callee to caller). Whether the local proxy
//! produces or consumes is its [`Side`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::ids::CallId;
use crate::error::StreamError;

pub mod byte_stream;
pub mod flow;
pub mod packetizer;
pub mod proxy;
pub mod reconstructor;
pub mod registry;

pub use byte_stream::{channel, ByteStream, StreamEvent, StreamListener, StreamWriter};
pub use flow::FlowControl;
pub use packetizer::Packetizer;
pub use proxy::StreamProxy;
pub use reconstructor::{Delivery, Reconstructor};
pub use registry::{ProxyRegistry, SharedRegistry};

/// Which of a call's two streams a proxy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Parameter stream, caller to callee
    Upload,
    /// Result stream, callee to caller
    Download,
}

impl Direction {
    pub fn tag(self) -> u8 {
        match self {
            Direction::Upload => 1,
            Direction::Download => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Direction::Upload),
            2 => Some(Direction::Download),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// Registry key: one proxy per call and direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyKey {
    pub call_id: CallId,
    pub direction: Direction,
}

impl ProxyKey {
    pub fn new(call_id: CallId, direction: Direction) -> Self {
        Self { call_id, direction }
    }
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.call_id, self.direction)
    }
}

/// Whether the local node produces or consumes the proxied stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sending,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    Open,
    Ended,
    Errored,
}

/// Terminal outcome of a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ended,
    Errored(StreamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_tags() {
        for dir in [Direction::Upload, Direction::Download] {
            assert_eq!(Direction::from_tag(dir.tag()), Some(dir));
        }
        assert_eq!(Direction::from_tag(0), None);
    }

    #[test]
    fn test_keys_differ_by_direction() {
        let id = CallId::from("node-1:1");
        let up = ProxyKey::new(id.clone(), Direction::Upload);
        let down = ProxyKey::new(id, Direction::Download);
        assert_ne!(up, down);
        assert_eq!(up.to_string(), "node-1:1/upload");
    }
}
