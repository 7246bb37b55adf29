//! Ordered outbound packet queue.
//!
//! Everything a node sends goes through one [`Outbox`] and is drained by a
//! single sender task, so packets for a peer leave in the order they were
//! queued no matter which task queued them. Packets are encoded when they are
//! queued, so an unencodable packet is refused to its caller instead of
//! vanishing later. The sender hands the bytes to the transporter and reports
//! peers it failed to reach.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::core::codec::PacketCodec;
use crate::core::ids::NodeId;
use crate::core::packet::Packet;
use crate::error::{BridgeError, Result};
use crate::transport::{channel_key, Transporter};
use crate::utils::metrics::global_metrics;

/// A packet waiting to be sent, with its encoded form.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub target: NodeId,
    pub packet: Packet,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
    codec: PacketCodec,
}

impl Outbox {
    pub fn new(codec: PacketCodec) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, codec }, rx)
    }

    /// Encode and queue `packet` for `target`.
    ///
    /// Fails with the codec error when the packet cannot be encoded (for
    /// example when it exceeds `max_payload_size`), and with
    /// `ConnectionClosed` once the sender task is gone.
    pub fn send(&self, target: &NodeId, packet: Packet) -> Result<()> {
        let payload = self.codec.encode(&packet)?;
        self.tx
            .send(Outgoing {
                target: target.clone(),
                packet,
                payload,
            })
            .map_err(|_| BridgeError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Drain `rx` into `transporter` until every [`Outbox`] handle is dropped.
///
/// Peers that cannot be reached are reported on `unreachable`.
pub fn spawn_sender(
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    transporter: Arc<dyn Transporter>,
    namespace: String,
    unreachable: mpsc::UnboundedSender<NodeId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Outgoing { target, packet, payload }) = rx.recv().await {
            let kind = packet.packet_type();
            let size = payload.len() as u64;
            let channel = channel_key(&namespace, &target);
            match transporter.send(&target, &channel, payload).await {
                Ok(()) => {
                    global_metrics().packet_sent(size);
                    trace!(packet_type = %kind, call_id = %packet.call_id, target = %target, bytes = size, "Packet sent");
                }
                Err(e) => {
                    warn!(error = %e, packet_type = %kind, target = %target, "Packet could not be delivered");
                    let _ = unreachable.send(target);
                }
            }
        }
        debug!("Outbox drained, sender stopping");
    })
}
