//! Inbound packet routing.
//!
//! Runs on the broker's receive loop, one payload at a time, in arrival
//! order. Nothing here awaits: stream packets are applied to the registry
//! synchronously and handlers run on their own tasks. A `REQUEST` with
//! streamed params therefore has its proxy registered before the first
//! `STREAM_DATA` behind it is looked at.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::Inner;
use crate::core::ids::{CallId, NodeId};
use crate::core::packet::{Body, ErrorDescriptor, Meta, Packet, PacketBody, ResponseBody};
use crate::error::{constants, BridgeError, Result, StreamError};
use crate::protocol::{Context, Param};
use crate::stream::{Delivery, Direction, Outcome, Packetizer, ProxyKey, Reconstructor, StreamEvent};
use crate::utils::metrics::global_metrics;

pub(super) fn handle_payload(inner: &Arc<Inner>, payload: Bytes) {
    global_metrics().packet_received(payload.len() as u64);

    let packet = match inner.codec.decode(&payload) {
        Ok(packet) => packet,
        Err(e) => {
            global_metrics().malformed_packet();
            warn!(node = %inner.node_id, error = %e, bytes = payload.len(), "Dropping malformed packet");
            return;
        }
    };
    trace!(
        node = %inner.node_id,
        packet_type = %packet.packet_type(),
        call_id = %packet.call_id,
        origin = %packet.origin,
        "Packet received"
    );

    let Packet { call_id, origin, body } = packet;
    match body {
        PacketBody::Request { action, meta, params } => {
            handle_request(inner, call_id, origin, action, meta, params)
        }
        PacketBody::Response(body) => handle_response(inner, call_id, origin, body),
        PacketBody::StreamData { direction, payload } => {
            let key = ProxyKey::new(call_id, direction);
            let delivery = deliver(inner, &key, StreamEvent::Data(payload));
            if delivery == Delivery::Late && inner.config.stream.reset_orphans {
                reset_orphan(inner, key, &origin);
            }
        }
        PacketBody::StreamEnd { direction } => {
            deliver(inner, &ProxyKey::new(call_id, direction), StreamEvent::End);
        }
        PacketBody::StreamError { direction, error } => {
            deliver(
                inner,
                &ProxyKey::new(call_id, direction),
                StreamEvent::Error(error.into()),
            );
        }
        PacketBody::StreamAck { direction } => {
            let key = ProxyKey::new(call_id, direction);
            match inner.registry.with(|r| Packetizer::acknowledge(r, &key)) {
                Ok(true) => {}
                Ok(false) => trace!(proxy = %key, "Late acknowledgement ignored"),
                Err(e) => warn!(error = %e, "Registry unavailable"),
            }
        }
    }
}

fn deliver(inner: &Inner, key: &ProxyKey, event: StreamEvent) -> Delivery {
    match inner.registry.with(|r| Reconstructor::deliver(r, key, event)) {
        Ok(delivery) => delivery,
        Err(e) => {
            warn!(error = %e, proxy = %key, "Registry unavailable");
            Delivery::Late
        }
    }
}

/// Tell the producer of an unknown stream to stop.
fn reset_orphan(inner: &Inner, key: ProxyKey, producer: &NodeId) {
    debug!(proxy = %key, producer = %producer, "Resetting orphaned stream");
    let reset = Packet::new(
        key.call_id,
        inner.node_id.clone(),
        PacketBody::StreamError {
            direction: key.direction,
            error: ErrorDescriptor::new(constants::ERR_CONSUMER_GONE, inner.node_id.as_str()),
        },
    );
    let _ = inner.outbox.send(producer, reset);
}

fn handle_request(
    inner: &Arc<Inner>,
    call_id: CallId,
    caller: NodeId,
    action: String,
    meta: Meta,
    params: Body,
) {
    let params = match params {
        Body::Inline(value) => Param::Inline(value),
        Body::Streamed { acks } => {
            let key = ProxyKey::new(call_id.clone(), Direction::Upload);
            match inner.reconstructor.open(key, caller.clone(), acks) {
                Ok(stream) => Param::Streamed(stream),
                Err(e) => {
                    respond(inner, &call_id, &caller, Err(e));
                    return;
                }
            }
        }
    };

    debug!(node = %inner.node_id, call_id = %call_id, action = %action, caller = %caller, "Request received");
    let ctx = Context {
        call_id,
        action,
        meta,
        params,
        node_id: inner.node_id.clone(),
        caller,
    };

    let inner = inner.clone();
    tokio::spawn(async move {
        let call_id = ctx.call_id.clone();
        let caller = ctx.caller.clone();
        let result = inner.dispatcher.dispatch(ctx).await;
        respond(&inner, &call_id, &caller, result);
    });
}

/// Send the `RESPONSE` for a handled request, packetizing a streamed result.
fn respond(inner: &Inner, call_id: &CallId, caller: &NodeId, result: Result<Param>) {
    let (body, download) = match result {
        Ok(Param::Inline(value)) => (ResponseBody::Ok(Body::Inline(value)), None),
        Ok(Param::Streamed(stream)) => {
            let opened = Packetizer::open(
                ProxyKey::new(call_id.clone(), Direction::Download),
                inner.node_id.clone(),
                caller.clone(),
                inner.ack_window(),
                inner.outbox.clone(),
                inner.registry.clone(),
            );
            match opened {
                Ok(packetizer) => (
                    ResponseBody::Ok(Body::Streamed {
                        acks: inner.config.stream.flow_control,
                    }),
                    Some((packetizer, stream)),
                ),
                Err(e) => (failure(inner, &e), None),
            }
        }
        Err(e) => {
            debug!(call_id = %call_id, error = %e, "Handler failed");
            (failure(inner, &e), None)
        }
    };

    let response = Packet::new(call_id.clone(), inner.node_id.clone(), PacketBody::Response(body));
    if let Err(e) = inner.outbox.send(caller, response) {
        warn!(call_id = %call_id, error = %e, "Failed to queue response");
        if let Some((packetizer, _)) = &download {
            let outcome = Outcome::Errored(StreamError::new(e.to_string()));
            let _ = inner.registry.settle(packetizer.key(), &outcome);
        }
        if !matches!(e, BridgeError::ConnectionClosed) {
            // An unencodable result still gets an answer.
            let fallback = Packet::new(
                call_id.clone(),
                inner.node_id.clone(),
                PacketBody::Response(failure(inner, &e)),
            );
            if let Err(e) = inner.outbox.send(caller, fallback) {
                warn!(call_id = %call_id, error = %e, "Failed to queue error response");
            }
        }
        return;
    }
    if let Some((packetizer, stream)) = download {
        packetizer.spawn(stream);
    }
}

fn failure(inner: &Inner, err: &BridgeError) -> ResponseBody {
    ResponseBody::Failed(ErrorDescriptor::new(err.relay_message(), inner.node_id.as_str()))
}

fn handle_response(inner: &Inner, call_id: CallId, callee: NodeId, body: ResponseBody) {
    let result = match body {
        ResponseBody::Ok(Body::Inline(value)) => Ok(Param::Inline(value)),
        ResponseBody::Ok(Body::Streamed { acks }) => {
            let key = ProxyKey::new(call_id.clone(), Direction::Download);
            inner
                .reconstructor
                .open(key, callee.clone(), acks)
                .map(Param::Streamed)
        }
        ResponseBody::Failed(desc) => Err(BridgeError::ActionFailed {
            message: desc.message,
            node_id: desc.node_id,
        }),
    };

    if !inner.resolve(&call_id, result) {
        // The caller gave up; a streamed result was reset when it was dropped.
        debug!(call_id = %call_id, callee = %callee, "Response for a call nobody awaits");
    }
}

