//! Stream proxy state machine.
//!
//! ```text
//!          emit_data
//!         ┌────────┐
//!         ▼        │
//!       OPEN ──────┘
//!       │   │
//! Ended │   │ Errored(err)
//!       ▼   ▼
//!   ENDED   ERRORED
//! ```
//!
//! Transitions out of `OPEN` happen once. Listeners are notified in a fixed
//! order: `on_error` listeners (errored only), then `on_end` listeners. After
//! the transition every listener is dropped and later events are refused.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::core::ids::NodeId;
use crate::error::StreamError;
use crate::stream::flow::FlowControl;
use crate::stream::{Outcome, ProxyKey, ProxyStatus, Side};

type DataListener = Box<dyn FnMut(Bytes) + Send>;
type ErrorListener = Box<dyn FnMut(&StreamError) + Send>;
type EndListener = Box<dyn FnMut() + Send>;

pub struct StreamProxy {
    key: ProxyKey,
    side: Side,
    peer: NodeId,
    status: ProxyStatus,
    flow: Option<Arc<FlowControl>>,
    data_listeners: Vec<DataListener>,
    error_listeners: Vec<ErrorListener>,
    end_listeners: Vec<EndListener>,
}

impl StreamProxy {
    pub fn new(key: ProxyKey, side: Side, peer: NodeId) -> Self {
        Self {
            key,
            side,
            peer,
            status: ProxyStatus::Open,
            flow: None,
            data_listeners: Vec::new(),
            error_listeners: Vec::new(),
            end_listeners: Vec::new(),
        }
    }

    pub fn key(&self) -> &ProxyKey {
        &self.key
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// The node on the other end of this stream.
    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    pub fn status(&self) -> ProxyStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == ProxyStatus::Open
    }

    pub fn on_data<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.data_listeners.push(Box::new(listener));
        self
    }

    pub fn on_error<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(&StreamError) + Send + 'static,
    {
        self.error_listeners.push(Box::new(listener));
        self
    }

    pub fn on_end<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.end_listeners.push(Box::new(listener));
        self
    }

    /// Attach the pending-acknowledgement window of a sending proxy.
    pub fn set_flow(&mut self, flow: Arc<FlowControl>) {
        self.flow = Some(flow);
    }

    pub fn flow(&self) -> Option<&Arc<FlowControl>> {
        self.flow.as_ref()
    }

    /// Hand a chunk to every data listener. Refused once settled.
    pub fn emit_data(&mut self, chunk: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        if let Some((last, rest)) = self.data_listeners.split_last_mut() {
            for listener in rest {
                listener(chunk.clone());
            }
            last(chunk);
        }
        true
    }

    /// Record one acknowledgement from the consumer.
    pub fn acknowledge(&self) -> bool {
        match (&self.flow, self.is_open()) {
            (Some(flow), true) => {
                flow.release();
                true
            }
            _ => false,
        }
    }

    /// Leave `OPEN` and notify. Returns `false` if already settled.
    pub(crate) fn settle(&mut self, outcome: &Outcome) -> bool {
        if !self.is_open() {
            return false;
        }

        if let Some(flow) = &self.flow {
            flow.close();
        }

        self.data_listeners.clear();
        let mut error_listeners = std::mem::take(&mut self.error_listeners);
        let mut end_listeners = std::mem::take(&mut self.end_listeners);

        match outcome {
            Outcome::Ended => {
                self.status = ProxyStatus::Ended;
            }
            Outcome::Errored(err) => {
                self.status = ProxyStatus::Errored;
                for listener in error_listeners.iter_mut() {
                    listener(err);
                }
            }
        }
        for listener in end_listeners.iter_mut() {
            listener();
        }
        true
    }
}

impl fmt::Debug for StreamProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProxy")
            .field("key", &self.key)
            .field("side", &self.side)
            .field("peer", &self.peer)
            .field("status", &self.status)
            .field("pending_acks", &self.flow.as_ref().map(|f| f.pending()))
            .finish()
    }
}
