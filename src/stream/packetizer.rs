//! Local stream to ordered `STREAM_*` packets.
//!
//! A [`Packetizer`] owns one outbound stream. It registers a `Sending` proxy,
//! then pulls chunks from the source and queues one `STREAM_DATA` per chunk,
//! followed by exactly one `STREAM_END` or `STREAM_ERROR`. When the proxy is
//! settled from elsewhere (reset by the consumer, peer lost, call timed out)
//! the proxy's flow window closes and the packetizer stops without sending a
//! terminal packet.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::core::ids::NodeId;
use crate::core::packet::{ErrorDescriptor, Packet, PacketBody};
use crate::error::{BridgeError, Result, StreamError};
use crate::stream::byte_stream::ByteStream;
use crate::stream::flow::FlowControl;
use crate::stream::registry::{ProxyRegistry, SharedRegistry};
use crate::stream::{Outcome, ProxyKey, Side};
use crate::transport::Outbox;
use crate::utils::metrics::global_metrics;

pub struct Packetizer {
    key: ProxyKey,
    local: NodeId,
    target: NodeId,
    flow: Arc<FlowControl>,
    outbox: Outbox,
    registry: SharedRegistry,
}

impl Packetizer {
    /// Register the sending proxy for `key`.
    ///
    /// `ack_window` of `None` disables acknowledgement-based backpressure.
    pub fn open(
        key: ProxyKey,
        local: NodeId,
        target: NodeId,
        ack_window: Option<usize>,
        outbox: Outbox,
        registry: SharedRegistry,
    ) -> Result<Self> {
        let flow = Arc::new(match ack_window {
            Some(window) => FlowControl::new(window),
            None => FlowControl::unbounded(),
        });
        registry.with(|r| {
            r.register(key.clone(), Side::Sending, target.clone())
                .map(|proxy| proxy.set_flow(flow.clone()))
        })??;

        Ok(Self {
            key,
            local,
            target,
            flow,
            outbox,
            registry,
        })
    }

    pub fn key(&self) -> &ProxyKey {
        &self.key
    }

    /// Drive `source` to completion on a task.
    pub fn spawn(self, source: ByteStream) -> JoinHandle<()> {
        tokio::spawn(self.run(source))
    }

    pub async fn run(self, mut source: ByteStream) {
        let mut sent = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.flow.closed() => {
                    debug!(proxy = %self.key, chunks = sent, "Outbound stream cancelled");
                    return;
                }
                item = source.next() => item,
            };

            match next {
                Some(Ok(chunk)) => {
                    if !self.flow.wait_for_capacity().await {
                        debug!(proxy = %self.key, chunks = sent, "Outbound stream cancelled");
                        return;
                    }
                    self.flow.reserve();
                    trace!(proxy = %self.key, bytes = chunk.len(), "Stream chunk queued");
                    let body = PacketBody::StreamData {
                        direction: self.key.direction,
                        payload: chunk,
                    };
                    if !self.queue(body) {
                        return;
                    }
                    sent += 1;
                }
                Some(Err(err)) => {
                    // Relayed errors keep the node they came from.
                    let origin = err.node_id().unwrap_or(self.local.as_str()).to_string();
                    let body = PacketBody::StreamError {
                        direction: self.key.direction,
                        error: ErrorDescriptor::new(err.message(), origin),
                    };
                    if self.queue(body) {
                        self.settle(Outcome::Errored(err));
                    }
                    return;
                }
                None => {
                    let body = PacketBody::StreamEnd {
                        direction: self.key.direction,
                    };
                    if self.queue(body) {
                        debug!(proxy = %self.key, chunks = sent, "Outbound stream ended");
                        self.settle(Outcome::Ended);
                    }
                    return;
                }
            }
        }
    }

    /// Credit one `STREAM_ACK` to the sending proxy for `key`.
    pub fn acknowledge(registry: &ProxyRegistry, key: &ProxyKey) -> bool {
        let credited = registry
            .lookup(key)
            .filter(|proxy| proxy.side() == Side::Sending)
            .map(|proxy| proxy.acknowledge())
            .unwrap_or(false);
        if credited {
            global_metrics().ack_received();
        }
        credited
    }

    fn queue(&self, body: PacketBody) -> bool {
        let packet = Packet::new(self.key.call_id.clone(), self.local.clone(), body);
        match self.outbox.send(&self.target, packet) {
            Ok(()) => true,
            Err(BridgeError::ConnectionClosed) => {
                warn!(proxy = %self.key, "Outbound stream dropped, outbox closed");
                self.settle(Outcome::Errored(StreamError::new(
                    BridgeError::ConnectionClosed.to_string(),
                )));
                false
            }
            Err(e) => {
                // The packet never left; fail the stream on both ends.
                warn!(proxy = %self.key, error = %e, "Stream packet refused");
                let notice = Packet::new(
                    self.key.call_id.clone(),
                    self.local.clone(),
                    PacketBody::StreamError {
                        direction: self.key.direction,
                        error: ErrorDescriptor::new(e.to_string(), self.local.as_str()),
                    },
                );
                if let Err(e) = self.outbox.send(&self.target, notice) {
                    warn!(proxy = %self.key, error = %e, "Failed to queue stream error");
                }
                self.settle(Outcome::Errored(StreamError::new(e.to_string())));
                false
            }
        }
    }

    fn settle(&self, outcome: Outcome) {
        if let Err(e) = self.registry.settle(&self.key, &outcome) {
            warn!(proxy = %self.key, error = %e, "Failed to settle outbound stream");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::ids::CallId;
    use crate::stream::{channel, Direction};
    use crate::transport::Outgoing;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn open(window: Option<usize>) -> (Packetizer, mpsc::UnboundedReceiver<Outgoing>, SharedRegistry) {
        let (outbox, rx) = Outbox::new(crate::core::codec::PacketCodec::default());
        let registry = SharedRegistry::new();
        let packetizer = Packetizer::open(
            ProxyKey::new(CallId::from("node-1:1"), Direction::Upload),
            NodeId::from("node-1"),
            NodeId::from("node-2"),
            window,
            outbox,
            registry.clone(),
        )
        .unwrap();
        (packetizer, rx, registry)
    }

    #[tokio::test]
    async fn test_chunks_then_end() {
        let (packetizer, mut rx, registry) = open(None);
        packetizer
            .spawn(ByteStream::from_chunks(["first chunk", "second chunk"]))
            .await
            .unwrap();

        let bodies: Vec<PacketBody> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|out| out.packet.body)
            .collect();
        assert_eq!(
            bodies,
            vec![
                PacketBody::StreamData {
                    direction: Direction::Upload,
                    payload: Bytes::from_static(b"first chunk"),
                },
                PacketBody::StreamData {
                    direction: Direction::Upload,
                    payload: Bytes::from_static(b"second chunk"),
                },
                PacketBody::StreamEnd {
                    direction: Direction::Upload,
                },
            ]
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_local_error_annotated_with_local_node() {
        let (packetizer, mut rx, _registry) = open(None);
        let source = ByteStream::from_stream(futures::stream::iter(vec![Err(StreamError::new(
            "Something happened",
        ))]));
        packetizer.spawn(source).await.unwrap();

        let out = rx.try_recv().unwrap();
        assert_eq!(
            out.packet.body,
            PacketBody::StreamError {
                direction: Direction::Upload,
                error: ErrorDescriptor::new("Something happened", "node-1"),
            }
        );
    }

    #[tokio::test]
    async fn test_relayed_error_keeps_origin() {
        let (packetizer, mut rx, _registry) = open(None);
        let source = ByteStream::from_stream(futures::stream::iter(vec![Err(StreamError::remote(
            "Something happened",
            "node-3",
        ))]));
        packetizer.spawn(source).await.unwrap();

        match rx.try_recv().unwrap().packet.body {
            PacketBody::StreamError { error, .. } => assert_eq!(error.node_id, "node-3"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_window_pauses_until_acked() {
        let (packetizer, mut rx, registry) = open(Some(2));
        let key = packetizer.key().clone();
        let task = packetizer.spawn(ByteStream::from_chunks(["a", "b", "c", "d"]));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 2);

        registry
            .with(|r| {
                assert!(Packetizer::acknowledge(r, &key));
                assert!(Packetizer::acknowledge(r, &key));
            })
            .unwrap();
        task.await.unwrap();

        let mut rest = 0;
        while rx.try_recv().is_ok() {
            rest += 1;
        }
        // two data packets plus the end
        assert_eq!(rest, 3);
    }

    #[tokio::test]
    async fn test_settle_elsewhere_cancels() {
        let (packetizer, mut rx, registry) = open(Some(4));
        let key = packetizer.key().clone();
        let (writer, source) = channel(4);
        let task = packetizer.spawn(source);

        writer.write("first chunk").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry
            .settle(&key, &Outcome::Errored(StreamError::new("reset")))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap().packet.body,
            PacketBody::StreamData { .. }
        ));
        assert!(rx.try_recv().is_err());
        drop(writer);
    }

    #[tokio::test]
    async fn test_oversized_chunk_fails_the_stream() {
        let mut config = crate::config::TransportConfig::default();
        config.max_payload_size = 1024;
        let (outbox, mut rx) = Outbox::new(crate::core::codec::PacketCodec::from_config(&config));
        let registry = SharedRegistry::new();
        let packetizer = Packetizer::open(
            ProxyKey::new(CallId::from("node-1:1"), Direction::Upload),
            NodeId::from("node-1"),
            NodeId::from("node-2"),
            Some(4),
            outbox,
            registry.clone(),
        )
        .unwrap();

        let chunks = vec![vec![1u8; 10], vec![2u8; 4000], vec![3u8; 10]];
        packetizer.spawn(ByteStream::from_chunks(chunks)).await.unwrap();

        let bodies: Vec<PacketBody> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|out| out.packet.body)
            .collect();
        assert_eq!(bodies.len(), 2);
        assert!(matches!(bodies[0], PacketBody::StreamData { ref payload, .. } if payload.len() == 10));
        match &bodies[1] {
            PacketBody::StreamError { error, .. } => {
                assert!(error.message.contains("Packet too large"));
                assert_eq!(error.node_id, "node-1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.is_empty());
    }
}
