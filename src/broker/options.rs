use std::time::Duration;

use crate::core::ids::NodeId;
use crate::core::packet::Meta;

/// Per-call options for `Broker::call`.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Run the action on this node, bypassing routes.
    pub node_id: Option<NodeId>,
    /// Overrides `call.default_timeout`.
    pub timeout: Option<Duration>,
    pub meta: Meta,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Deadline for the call's `RESPONSE`. A streamed result that arrived in
    /// time is not cut off by it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}
