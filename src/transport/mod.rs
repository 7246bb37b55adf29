//! # Transport Layer
//!
//! Message-oriented delivery between nodes.
//!
//! A transporter moves opaque payloads to named channels on other nodes and
//! reports when a peer goes away. It knows nothing about packets; the
//! broker's codec turns packets into payloads before they get here.
//!
//! ## Channels
//! Every node subscribes to exactly one channel, `"<namespace>.<node id>"`
//! (just the node id when the namespace is empty). All packets for a node,
//! requests and stream chunks alike, arrive on that channel in send order.
//!
//! ## Implementations
//! - [`memory::MemoryTransporter`]: in-process bus, one handle per node
//! - [`framed::FramedTransporter`]: point-to-point link over any byte stream

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::core::ids::NodeId;
use crate::error::Result;

pub mod framed;
pub mod memory;
pub mod outbox;

pub use framed::FramedTransporter;
pub use memory::{MemoryBus, MemoryTransporter};
pub use outbox::{Outbox, Outgoing};

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(Bytes),
    /// The transporter lost contact with a peer.
    NodeDisconnected(NodeId),
}

pub trait Transporter: Send + Sync + 'static {
    /// Deliver `payload` to `channel` on `target`.
    ///
    /// Fails with `NodeUnreachable` when the target cannot be reached.
    fn send<'a>(&'a self, target: &'a NodeId, channel: &'a str, payload: Bytes) -> BoxFuture<'a, Result<()>>;

    /// Start receiving on `channel`.
    fn subscribe<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<mpsc::UnboundedReceiver<TransportEvent>>>;

    fn unsubscribe<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// The channel a node listens on.
pub fn channel_key(namespace: &str, node_id: &NodeId) -> String {
    if namespace.is_empty() {
        node_id.to_string()
    } else {
        format!("{}.{}", namespace, node_id)
    }
}
