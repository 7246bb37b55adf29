//! Ordered `STREAM_*` packets to a local stream.
//!
//! [`Reconstructor::open`] registers a `Receiving` proxy and hands back the
//! [`ByteStream`] local code reads. Inbound packets are applied to the proxy
//! with [`Reconstructor::deliver`]; the proxy's listeners forward them into
//! the stream, so chunk order and the single terminal event carry over.
//!
//! When acknowledgements were negotiated, every chunk the consumer takes
//! queues a `STREAM_ACK` back to the producer. A consumer that drops its
//! stream early resets the producer with a `STREAM_ERROR`.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::core::ids::NodeId;
use crate::core::packet::{ErrorDescriptor, Packet, PacketBody};
use crate::error::{constants, Result, StreamError};
use crate::stream::byte_stream::{ByteStream, StreamEvent};
use crate::stream::registry::{ProxyRegistry, SharedRegistry};
use crate::stream::{Outcome, ProxyKey, Side};
use crate::transport::Outbox;
use crate::utils::metrics::global_metrics;

/// What happened to an inbound stream packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Chunk handed to the consumer.
    Delivered,
    /// Terminal packet applied; the proxy is gone.
    Settled,
    /// The consumer reset a stream this node was producing.
    Reset,
    /// No live proxy wanted it.
    Late,
}

#[derive(Debug, Clone)]
pub struct Reconstructor {
    local: NodeId,
    outbox: Outbox,
    registry: SharedRegistry,
}

impl Reconstructor {
    pub fn new(local: NodeId, outbox: Outbox, registry: SharedRegistry) -> Self {
        Self {
            local,
            outbox,
            registry,
        }
    }

    /// Register the receiving proxy for `key` and return its stream.
    pub fn open(&self, key: ProxyKey, peer: NodeId, acks: bool) -> Result<ByteStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.with(|registry| {
            let (data_tx, error_tx, end_tx) = (tx.clone(), tx.clone(), tx);
            registry
                .register(key.clone(), Side::Receiving, peer.clone())
                .map(|proxy| {
                    proxy
                        .on_data(move |chunk| {
                            let _ = data_tx.send(StreamEvent::Data(chunk));
                        })
                        .on_error(move |err| {
                            let _ = error_tx.send(StreamEvent::Error(err.clone()));
                        })
                        .on_end(move || {
                            let _ = end_tx.send(StreamEvent::End);
                        });
                })
        })??;

        let stream = ByteStream::from_stream(Inbound {
            rx,
            done: false,
            guard: ResetGuard {
                key: key.clone(),
                peer: peer.clone(),
                local: self.local.clone(),
                outbox: self.outbox.clone(),
                registry: self.registry.clone(),
            },
        });

        if !acks {
            return Ok(stream);
        }

        let outbox = self.outbox.clone();
        let local = self.local.clone();
        Ok(stream.with_consume_hook(Arc::new(move || {
            let ack = Packet::new(
                key.call_id.clone(),
                local.clone(),
                PacketBody::StreamAck {
                    direction: key.direction,
                },
            );
            if outbox.send(&peer, ack).is_ok() {
                global_metrics().ack_sent();
            }
        })))
    }

    /// Apply one inbound stream event to the proxy for `key`.
    pub fn deliver(registry: &mut ProxyRegistry, key: &ProxyKey, event: StreamEvent) -> Delivery {
        let side = match registry.lookup(key) {
            Some(proxy) => proxy.side(),
            None => {
                global_metrics().late_packet();
                trace!(proxy = %key, "Late stream packet ignored");
                return Delivery::Late;
            }
        };

        match (side, event) {
            (Side::Receiving, StreamEvent::Data(chunk)) => match registry.lookup_mut(key) {
                Some(proxy) => {
                    if proxy.emit_data(chunk) {
                        Delivery::Delivered
                    } else {
                        Delivery::Late
                    }
                }
                None => Delivery::Late,
            },
            (Side::Receiving, StreamEvent::Error(err)) => {
                registry.settle(key, &Outcome::Errored(err));
                Delivery::Settled
            }
            (Side::Receiving, StreamEvent::End) => {
                registry.settle(key, &Outcome::Ended);
                Delivery::Settled
            }
            (Side::Sending, StreamEvent::Error(err)) => {
                debug!(proxy = %key, error = %err, "Outbound stream reset by consumer");
                registry.settle(key, &Outcome::Errored(err));
                Delivery::Reset
            }
            (Side::Sending, _) => {
                global_metrics().late_packet();
                Delivery::Late
            }
        }
    }
}

/// Resets the producer if the consumer lets go before the stream settles.
struct ResetGuard {
    key: ProxyKey,
    peer: NodeId,
    local: NodeId,
    outbox: Outbox,
    registry: SharedRegistry,
}

impl Drop for ResetGuard {
    fn drop(&mut self) {
        let abandoned = StreamError::new(constants::ERR_CONSUMER_GONE);
        let settled = self
            .registry
            .settle(&self.key, &Outcome::Errored(abandoned))
            .unwrap_or(false);
        if !settled {
            return;
        }
        debug!(proxy = %self.key, peer = %self.peer, "Stream consumer dropped, resetting producer");
        let reset = Packet::new(
            self.key.call_id.clone(),
            self.local.clone(),
            PacketBody::StreamError {
                direction: self.key.direction,
                error: ErrorDescriptor::new(constants::ERR_CONSUMER_GONE, self.local.as_str()),
            },
        );
        let _ = self.outbox.send(&self.peer, reset);
    }
}

struct Inbound {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    done: bool,
    guard: ResetGuard,
}

impl Stream for Inbound {
    type Item = std::result::Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Data(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(StreamEvent::Error(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(Some(StreamEvent::End)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        trace!(proxy = %self.guard.key, finished = self.done, "Inbound stream released");
    }
}
