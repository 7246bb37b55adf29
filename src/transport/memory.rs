//! In-process transporter.
//!
//! A [`MemoryBus`] connects any number of nodes living in the same process.
//! Each node gets its own [`MemoryTransporter`] handle. Delivery is FIFO per
//! channel. [`MemoryBus::disconnect`] simulates a crashed node: its channels
//! disappear and every other subscriber is told it is gone.

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::ids::NodeId;
use crate::error::{BridgeError, Result};
use crate::transport::{TransportEvent, Transporter};

#[derive(Debug)]
struct Subscriber {
    node: NodeId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Debug, Default)]
struct BusState {
    channels: HashMap<String, Subscriber>,
    down: HashSet<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transporter handle for `node`.
    pub fn transporter(&self, node: NodeId) -> MemoryTransporter {
        MemoryTransporter {
            node,
            bus: self.clone(),
        }
    }

    /// Drop `node` from the bus and notify the remaining subscribers.
    pub fn disconnect(&self, node: &NodeId) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| BridgeError::LockPoisoned)?;
        state.down.insert(node.clone());
        state.channels.retain(|_, sub| &sub.node != node);
        for sub in state.channels.values() {
            let _ = sub.tx.send(TransportEvent::NodeDisconnected(node.clone()));
        }
        info!(node = %node, "Node disconnected from memory bus");
        Ok(())
    }

    /// Let a disconnected node subscribe again.
    pub fn reconnect(&self, node: &NodeId) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| BridgeError::LockPoisoned)?;
        state.down.remove(node);
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().map(|s| s.channels.len()).unwrap_or(0)
    }

    fn deliver(&self, target: &NodeId, channel: &str, payload: Bytes) -> Result<()> {
        let state = self.state.lock().map_err(|_| BridgeError::LockPoisoned)?;
        if state.down.contains(target) {
            return Err(BridgeError::NodeUnreachable(target.to_string()));
        }
        match state.channels.get(channel) {
            Some(sub) => sub
                .tx
                .send(TransportEvent::Message(payload))
                .map_err(|_| BridgeError::NodeUnreachable(target.to_string())),
            None => Err(BridgeError::NodeUnreachable(target.to_string())),
        }
    }

    fn subscribe_as(&self, node: &NodeId, channel: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let mut state = self.state.lock().map_err(|_| BridgeError::LockPoisoned)?;
        if state.down.contains(node) {
            return Err(BridgeError::Transport(format!("node {} is disconnected", node)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.channels.insert(
            channel.to_string(),
            Subscriber {
                node: node.clone(),
                tx,
            },
        );
        debug!(node = %node, channel = channel, "Subscribed to memory bus channel");
        Ok(rx)
    }

    fn unsubscribe_channel(&self, channel: &str) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| BridgeError::LockPoisoned)?;
        state.channels.remove(channel);
        Ok(())
    }
}

/// One node's handle on a [`MemoryBus`].
#[derive(Debug, Clone)]
pub struct MemoryTransporter {
    node: NodeId,
    bus: MemoryBus,
}

impl MemoryTransporter {
    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }
}

impl Transporter for MemoryTransporter {
    fn send<'a>(&'a self, target: &'a NodeId, channel: &'a str, payload: Bytes) -> BoxFuture<'a, Result<()>> {
        future::ready(self.bus.deliver(target, channel, payload)).boxed()
    }

    fn subscribe<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<mpsc::UnboundedReceiver<TransportEvent>>> {
        future::ready(self.bus.subscribe_as(&self.node, channel)).boxed()
    }

    fn unsubscribe<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        future::ready(self.bus.unsubscribe_channel(channel)).boxed()
    }
}
