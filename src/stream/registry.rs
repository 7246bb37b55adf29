//! # Proxy Registry
//!
//! The node's table of live stream proxies.
//!
//! A key is present exactly while its proxy is `OPEN`: settling removes the
//! entry before listeners are told, so a packet that arrives afterwards finds
//! nothing and is treated as late.
//!
//! ## Sharing
//! The broker's receive loop, the packetizer tasks, and the call path all
//! touch the same table through [`SharedRegistry`]. The lock is never held
//! across an `.await`; proxy listeners only push into channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::core::ids::{CallId, NodeId};
use crate::error::{BridgeError, Result};
use crate::stream::proxy::StreamProxy;
use crate::stream::{Outcome, ProxyKey, Side};
use crate::utils::metrics::global_metrics;

#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: HashMap<ProxyKey, StreamProxy>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an `OPEN` proxy for `key`. Fails if one is already live.
    pub fn register(&mut self, key: ProxyKey, side: Side, peer: NodeId) -> Result<&mut StreamProxy> {
        if self.proxies.contains_key(&key) {
            return Err(BridgeError::DuplicateProxy {
                call_id: key.call_id.to_string(),
                direction: key.direction,
            });
        }
        trace!(proxy = %key, ?side, peer = %peer, "Stream proxy registered");
        global_metrics().stream_opened();
        let proxy = StreamProxy::new(key.clone(), side, peer);
        Ok(self.proxies.entry(key).or_insert(proxy))
    }

    pub fn lookup(&self, key: &ProxyKey) -> Option<&StreamProxy> {
        self.proxies.get(key)
    }

    pub fn lookup_mut(&mut self, key: &ProxyKey) -> Option<&mut StreamProxy> {
        self.proxies.get_mut(key)
    }

    pub fn contains(&self, key: &ProxyKey) -> bool {
        self.proxies.contains_key(key)
    }

    /// Settle and remove one proxy. Returns `false` if it was not live.
    pub fn settle(&mut self, key: &ProxyKey, outcome: &Outcome) -> bool {
        match self.proxies.remove(key) {
            Some(mut proxy) => Self::finish(&mut proxy, outcome),
            None => false,
        }
    }

    /// Settle every proxy whose remote end is `peer`.
    pub fn settle_peer(&mut self, peer: &NodeId, outcome: &Outcome) -> Vec<StreamProxy> {
        self.settle_where(|proxy| proxy.peer() == peer, outcome)
    }

    /// Settle both directions of a call.
    pub fn settle_call(&mut self, call_id: &CallId, outcome: &Outcome) -> Vec<StreamProxy> {
        self.settle_where(|proxy| &proxy.key().call_id == call_id, outcome)
    }

    pub fn settle_all(&mut self, outcome: &Outcome) -> Vec<StreamProxy> {
        self.settle_where(|_| true, outcome)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn keys(&self) -> Vec<ProxyKey> {
        self.proxies.keys().cloned().collect()
    }

    fn settle_where<F>(&mut self, mut predicate: F, outcome: &Outcome) -> Vec<StreamProxy>
    where
        F: FnMut(&StreamProxy) -> bool,
    {
        let keys: Vec<ProxyKey> = self
            .proxies
            .values()
            .filter(|proxy| predicate(proxy))
            .map(|proxy| proxy.key().clone())
            .collect();

        let mut settled = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(mut proxy) = self.proxies.remove(&key) {
                Self::finish(&mut proxy, outcome);
                settled.push(proxy);
            }
        }
        settled
    }

    fn finish(proxy: &mut StreamProxy, outcome: &Outcome) -> bool {
        let done = proxy.settle(outcome);
        if done {
            match outcome {
                Outcome::Ended => global_metrics().stream_ended(),
                Outcome::Errored(err) => {
                    global_metrics().stream_errored();
                    debug!(proxy = %proxy.key(), error = %err, "Stream proxy errored");
                }
            }
        }
        done
    }
}

/// Cloneable handle to a node's registry.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<ProxyRegistry>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, ProxyRegistry>> {
        self.inner.lock().map_err(|_| BridgeError::LockPoisoned)
    }

    /// Run `f` with the table locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut ProxyRegistry) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    pub fn settle(&self, key: &ProxyKey, outcome: &Outcome) -> Result<bool> {
        self.with(|registry| registry.settle(key, outcome))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|registry| registry.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
