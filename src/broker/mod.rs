//! # Broker
//!
//! One node of the action-call mesh.
//!
//! A broker owns the node's action table, its stream proxy registry, and one
//! subscription on the transporter. [`Broker::call`] turns an invocation into
//! a `REQUEST` plus, when the params are a stream, a packetized upload; the
//! inbound side (see `inbound`) runs handlers and answers with a `RESPONSE`
//! plus, when the result is a stream, a packetized download.
//!
//! ## Lifecycle
//! ```text
//! new ──► start ──► call / create_service ... ──► stop
//! ```
//! Local actions can be called before `start`; remote calls need the
//! subscription and fail with `NotStarted` until then.
//!
//! ## Failure handling
//! - **Timeout**: pending call rejected with `Timeout`, the call's proxies are
//!   force-settled, and upload consumers are told `"Call timed out"`. The
//!   deadline covers the call up to its `RESPONSE`. A streamed result handed
//!   back before the deadline is not bounded by it; the consumer owns it from
//!   then on and drops it to cancel.
//! - **Refused packets**: a packet the codec cannot encode (over
//!   `max_payload_size`) is refused when queued. A `REQUEST` rejects the call,
//!   a `RESPONSE` falls back to an inline error, and a stream packet fails the
//!   stream on both ends.
//! - **Node lost**: every proxy shared with the node is force-settled with
//!   `"Node unreachable"` and pending calls to it are rejected.
//! - **Stop**: everything is force-settled and every pending call rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::BridgeConfig;
use crate::core::codec::PacketCodec;
use crate::core::ids::{CallId, CallIdGenerator, NodeId};
use crate::core::packet::{Body, ErrorDescriptor, Packet, PacketBody};
use crate::error::{constants, BridgeError, Result, StreamError};
use crate::protocol::{ActionDispatcher, Context, Param, Service};
use crate::stream::{channel, Direction, Outcome, Packetizer, ProxyKey, Reconstructor, SharedRegistry, Side};
use crate::stream::{ByteStream, StreamWriter};
use crate::transport::outbox::{spawn_sender, Outgoing};
use crate::transport::{channel_key, Outbox, TransportEvent, Transporter};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::with_deadline;

mod inbound;
pub mod options;

pub use options::CallOptions;

struct PendingCall {
    target: NodeId,
    reply: oneshot::Sender<Result<Param>>,
}

pub(crate) struct Inner {
    config: BridgeConfig,
    node_id: NodeId,
    transporter: Arc<dyn Transporter>,
    codec: PacketCodec,
    dispatcher: ActionDispatcher,
    registry: SharedRegistry,
    reconstructor: Reconstructor,
    outbox: Outbox,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Outgoing>>>,
    ids: CallIdGenerator,
    routes: RwLock<HashMap<String, NodeId>>,
    pending: Mutex<HashMap<CallId, PendingCall>>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cloneable handle to a node.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    /// Build a broker for `config.node.node_id` on top of `transporter`.
    pub fn new(config: BridgeConfig, transporter: Arc<dyn Transporter>) -> Result<Self> {
        config.validate_strict()?;

        let node_id = NodeId::new(config.node.node_id.clone());
        let registry = SharedRegistry::new();
        let codec = PacketCodec::from_config(&config.transport);
        let (outbox, outbox_rx) = Outbox::new(codec);
        let reconstructor = Reconstructor::new(node_id.clone(), outbox.clone(), registry.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                codec,
                ids: CallIdGenerator::new(node_id.clone()),
                config,
                node_id,
                transporter,
                dispatcher: ActionDispatcher::new(),
                registry,
                reconstructor,
                outbox,
                outbox_rx: Mutex::new(Some(outbox_rx)),
                routes: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Register a service's actions on this node.
    pub fn create_service(&self, service: Service) -> Result<()> {
        let names = self.inner.dispatcher.register_service(service)?;
        info!(node = %self.inner.node_id, actions = ?names, "Service created");
        Ok(())
    }

    /// Send calls for `action` to `node` unless the caller names a node.
    pub fn add_route(&self, action: impl Into<String>, node: impl Into<NodeId>) -> Result<()> {
        let mut routes = self.inner.routes.write().map_err(|_| BridgeError::LockPoisoned)?;
        routes.insert(action.into(), node.into());
        Ok(())
    }

    /// A local stream sized by `stream.write_buffer`.
    pub fn stream_channel(&self) -> (StreamWriter, ByteStream) {
        channel(self.inner.config.stream.write_buffer)
    }

    /// Live stream proxies on this node.
    pub fn active_streams(&self) -> usize {
        self.inner.registry.len()
    }

    /// Remote calls still waiting for a `RESPONSE`.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Subscribe to this node's channel and start the background tasks.
    #[instrument(skip(self), fields(node = %self.inner.node_id))]
    pub async fn start(&self) -> Result<()> {
        let outbox_rx = self
            .inner
            .outbox_rx
            .lock()
            .map_err(|_| BridgeError::LockPoisoned)?
            .take()
            .ok_or_else(|| BridgeError::Transport("broker already started".to_string()))?;

        let channel = self.channel();
        let events = self.inner.transporter.subscribe(&channel).await?;
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();

        let sender = spawn_sender(
            outbox_rx,
            self.inner.transporter.clone(),
            self.inner.config.node.namespace.clone(),
            lost_tx,
        );
        let receiver = tokio::spawn(receive_loop(Arc::downgrade(&self.inner), events, lost_rx));

        self.inner
            .tasks
            .lock()
            .map_err(|_| BridgeError::LockPoisoned)?
            .extend([sender, receiver]);
        self.inner.started.store(true, Ordering::Release);
        info!(channel = %channel, "Broker started");
        Ok(())
    }

    /// Force-settle every stream, reject pending calls, and leave the channel.
    #[instrument(skip(self), fields(node = %self.inner.node_id))]
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let stopped = StreamError::remote(constants::ERR_BROKER_STOPPED, self.inner.node_id.as_str());
        let settled = self
            .inner
            .registry
            .with(|r| r.settle_all(&Outcome::Errored(stopped)).len())?;
        let rejected = self.inner.reject_pending(|_| true, || {
            BridgeError::Transport(constants::ERR_BROKER_STOPPED.to_string())
        });

        if let Err(e) = self.inner.transporter.unsubscribe(&self.channel()).await {
            warn!(error = %e, "Failed to unsubscribe");
        }
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .map_err(|_| BridgeError::LockPoisoned)?
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        info!(streams = settled, rejected_calls = rejected, "Broker stopped");
        global_metrics().log_metrics();
        Ok(())
    }

    /// Call `action` with `params`, locally or on the node it is routed to.
    ///
    /// # Errors
    /// - `ActionNotFound` when no local handler or route exists
    /// - `ActionFailed` when a remote handler failed
    /// - `Timeout`, `NodeUnreachable` as described in the module docs
    #[instrument(skip(self, params, options), fields(node = %self.inner.node_id))]
    pub async fn call(&self, action: &str, params: Param, options: CallOptions) -> Result<Param> {
        let _timer = Timer::start("call");
        let target = self.resolve_target(action, options.node_id.as_ref())?;
        let deadline = options.timeout.or(self.inner.config.call.default_timeout);
        let remote = target != self.inner.node_id;
        global_metrics().call_started(remote);

        let result = if remote {
            self.call_remote(action, params, options, target, deadline).await
        } else {
            self.call_local(action, params, options, deadline).await
        };

        match &result {
            Err(BridgeError::Timeout) => global_metrics().call_timed_out(),
            Err(_) => global_metrics().call_failed(),
            Ok(_) => {}
        }
        result
    }

    fn channel(&self) -> String {
        channel_key(&self.inner.config.node.namespace, &self.inner.node_id)
    }

    fn resolve_target(&self, action: &str, requested: Option<&NodeId>) -> Result<NodeId> {
        if let Some(node) = requested {
            return Ok(node.clone());
        }
        if self.inner.dispatcher.has_action(action) {
            return Ok(self.inner.node_id.clone());
        }
        let routes = self.inner.routes.read().map_err(|_| BridgeError::LockPoisoned)?;
        routes
            .get(action)
            .cloned()
            .ok_or_else(|| BridgeError::ActionNotFound(action.to_string()))
    }

    async fn call_local(
        &self,
        action: &str,
        params: Param,
        options: CallOptions,
        deadline: Option<Duration>,
    ) -> Result<Param> {
        let ctx = Context {
            call_id: self.inner.ids.next(),
            action: action.to_string(),
            meta: options.meta,
            params,
            node_id: self.inner.node_id.clone(),
            caller: self.inner.node_id.clone(),
        };
        debug!(call_id = %ctx.call_id, action = action, "Local call");
        with_deadline(deadline, self.inner.dispatcher.dispatch(ctx)).await
    }

    async fn call_remote(
        &self,
        action: &str,
        params: Param,
        options: CallOptions,
        target: NodeId,
        deadline: Option<Duration>,
    ) -> Result<Param> {
        if !self.is_started() {
            return Err(BridgeError::NotStarted);
        }
        let inner = &self.inner;
        let call_id = inner.ids.next();

        let (body, upload) = match params {
            Param::Inline(value) => (Body::Inline(value), None),
            Param::Streamed(stream) => {
                let packetizer = Packetizer::open(
                    ProxyKey::new(call_id.clone(), Direction::Upload),
                    inner.node_id.clone(),
                    target.clone(),
                    inner.ack_window(),
                    inner.outbox.clone(),
                    inner.registry.clone(),
                )?;
                (
                    Body::Streamed {
                        acks: inner.config.stream.flow_control,
                    },
                    Some((packetizer, stream)),
                )
            }
        };

        let (reply, response) = oneshot::channel();
        inner
            .pending
            .lock()
            .map_err(|_| BridgeError::LockPoisoned)?
            .insert(
                call_id.clone(),
                PendingCall {
                    target: target.clone(),
                    reply,
                },
            );

        let request = Packet::new(
            call_id.clone(),
            inner.node_id.clone(),
            PacketBody::Request {
                action: action.to_string(),
                meta: options.meta,
                params: body,
            },
        );
        debug!(call_id = %call_id, action = action, target = %target, "Remote call");
        if let Err(e) = inner.outbox.send(&target, request) {
            inner.take_pending(&call_id);
            let closed = StreamError::new(e.to_string());
            inner.registry.with(|r| r.settle_call(&call_id, &Outcome::Errored(closed)))?;
            return Err(e);
        }

        // The upload starts only once its REQUEST is queued ahead of it.
        if let Some((packetizer, stream)) = upload {
            packetizer.spawn(stream);
        }

        let outcome = with_deadline(deadline, async {
            response
                .await
                .map_err(|_| BridgeError::Transport(constants::ERR_BROKER_STOPPED.to_string()))?
        })
        .await;

        if matches!(outcome, Err(BridgeError::Timeout)) {
            inner.call_timed_out(&call_id);
        }
        outcome
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("node_id", &self.inner.node_id)
            .field("started", &self.is_started())
            .field("active_streams", &self.active_streams())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

impl Inner {
    fn ack_window(&self) -> Option<usize> {
        self.config
            .stream
            .flow_control
            .then_some(self.config.stream.ack_window)
    }

    fn take_pending(&self, call_id: &CallId) -> Option<PendingCall> {
        self.pending.lock().ok().and_then(|mut p| p.remove(call_id))
    }

    /// Resolve the pending call `call_id`, if the caller is still waiting.
    fn resolve(&self, call_id: &CallId, result: Result<Param>) -> bool {
        match self.take_pending(call_id) {
            Some(call) => call.reply.send(result).is_ok(),
            None => false,
        }
    }

    fn reject_pending<P, E>(&self, mut matches: P, error: E) -> usize
    where
        P: FnMut(&PendingCall) -> bool,
        E: Fn() -> BridgeError,
    {
        let rejected: Vec<PendingCall> = match self.pending.lock() {
            Ok(mut pending) => {
                let ids: Vec<CallId> = pending
                    .iter()
                    .filter(|(_, call)| matches(call))
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.iter().filter_map(|id| pending.remove(id)).collect()
            }
            Err(_) => return 0,
        };
        let count = rejected.len();
        for call in rejected {
            let _ = call.reply.send(Err(error()));
        }
        count
    }

    fn call_timed_out(&self, call_id: &CallId) {
        self.take_pending(call_id);
        let timed_out = StreamError::remote(constants::ERR_CALL_TIMEOUT, self.node_id.as_str());
        let settled = self
            .registry
            .with(|r| r.settle_call(call_id, &Outcome::Errored(timed_out)))
            .unwrap_or_default();

        for proxy in settled {
            if proxy.side() != Side::Sending {
                continue;
            }
            let notice = Packet::new(
                call_id.clone(),
                self.node_id.clone(),
                PacketBody::StreamError {
                    direction: proxy.key().direction,
                    error: ErrorDescriptor::new(constants::ERR_CALL_TIMEOUT, self.node_id.as_str()),
                },
            );
            let _ = self.outbox.send(proxy.peer(), notice);
        }
        warn!(call_id = %call_id, "Call timed out");
    }

    fn node_lost(&self, peer: &NodeId) {
        let unreachable = StreamError::remote(constants::ERR_NODE_UNREACHABLE, peer.as_str());
        let settled = self
            .registry
            .with(|r| r.settle_peer(peer, &Outcome::Errored(unreachable)))
            .map(|s| s.len())
            .unwrap_or(0);
        let rejected = self.reject_pending(
            |call| &call.target == peer,
            || BridgeError::NodeUnreachable(peer.to_string()),
        );
        if settled > 0 || rejected > 0 {
            warn!(peer = %peer, streams = settled, calls = rejected, "Node lost");
        }
    }
}

async fn receive_loop(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut lost: mpsc::UnboundedReceiver<NodeId>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            Some(peer) = lost.recv() => TransportEvent::NodeDisconnected(peer),
        };

        let Some(inner) = inner.upgrade() else { break };
        match event {
            TransportEvent::Message(payload) => inbound::handle_payload(&inner, payload),
            TransportEvent::NodeDisconnected(peer) => inner.node_lost(&peer),
        }
    }
    debug!("Receive loop stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::transport::MemoryBus;
    use serde_json::json;

    fn broker(bus: &MemoryBus, node: &str) -> Broker {
        Broker::new(
            BridgeConfig::for_node(node),
            Arc::new(bus.transporter(NodeId::from(node))),
        )
        .unwrap()
    }

    fn echo() -> Service {
        Service::new("echo").action("value", |ctx| async move { Ok(ctx.params) })
    }

    #[tokio::test]
    async fn test_local_call_without_start() {
        let bus = MemoryBus::new();
        let node = broker(&bus, "node-1");
        node.create_service(echo()).unwrap();

        let result = node
            .call("echo.value", Param::Inline(json!("hi")), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(result.into_inline(), Some(json!("hi")));
    }

    #[tokio::test]
    async fn test_unknown_action_without_route() {
        let bus = MemoryBus::new();
        let node = broker(&bus, "node-1");
        let err = node
            .call("nope.none", Param::default(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ActionNotFound(_)));
    }

    #[tokio::test]
    async fn test_remote_call_requires_start() {
        let bus = MemoryBus::new();
        let node = broker(&bus, "node-1");
        node.add_route("echo.value", "node-2").unwrap();
        let err = node
            .call("echo.value", Param::default(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotStarted));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let bus = MemoryBus::new();
        let node = broker(&bus, "node-1");
        node.start().await.unwrap();
        assert!(node.start().await.is_err());
        node.stop().await.unwrap();
        assert!(!node.is_started());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bus = MemoryBus::new();
        let config = BridgeConfig::for_node("");
        let result = Broker::new(config, Arc::new(bus.transporter(NodeId::from(""))));
        assert!(matches!(result, Err(BridgeError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_remote_inline_call() {
        let bus = MemoryBus::new();
        let caller = broker(&bus, "node-1");
        let callee = broker(&bus, "node-2");
        callee.create_service(echo()).unwrap();
        caller.start().await.unwrap();
        callee.start().await.unwrap();

        let result = caller
            .call(
                "echo.value",
                Param::Inline(json!({"a": 1})),
                CallOptions::new().node("node-2"),
            )
            .await
            .unwrap();
        assert_eq!(result.into_inline(), Some(json!({"a": 1})));
        assert_eq!(caller.pending_calls(), 0);
    }
}
