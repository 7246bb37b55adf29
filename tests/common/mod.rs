//! Shared fixtures for the broker integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stream_bridge::prelude::*;

/// Two started brokers, `node-1` and `node-2`, on one in-memory bus.
pub struct Cluster {
    pub bus: MemoryBus,
    pub node1: Broker,
    pub node2: Broker,
}

pub fn config(namespace: &str, node: &str) -> BridgeConfig {
    BridgeConfig::default_with_overrides(|c| {
        c.node.node_id = node.to_string();
        c.node.namespace = namespace.to_string();
    })
}

pub fn broker(bus: &MemoryBus, config: BridgeConfig) -> Broker {
    let transporter = bus.transporter(NodeId::new(config.node.node_id.clone()));
    Broker::new(config, Arc::new(transporter)).expect("valid config")
}

impl Cluster {
    pub fn new(namespace: &str) -> Self {
        Self::with_config(config(namespace, "node-1"), config(namespace, "node-2"))
    }

    pub fn with_config(config1: BridgeConfig, config2: BridgeConfig) -> Self {
        let bus = MemoryBus::new();
        Self {
            node1: broker(&bus, config1),
            node2: broker(&bus, config2),
            bus,
        }
    }

    pub async fn start(&self) {
        self.node1.start().await.unwrap();
        self.node2.start().await.unwrap();
    }

    pub async fn stop(&self) {
        self.node1.stop().await.unwrap();
        self.node2.stop().await.unwrap();
    }

    /// Wait until neither node holds a stream proxy.
    pub async fn settled(&self) {
        let (a, b) = (self.node1.clone(), self.node2.clone());
        eventually(move || a.active_streams() == 0 && b.active_streams() == 0).await;
    }
}

/// Records stream events the way the scenario tests compare them.
#[derive(Clone, Default)]
pub struct Flow(Arc<Mutex<Vec<String>>>);

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Wait until exactly `expected` has been recorded.
    pub async fn expect(&self, expected: &[&str]) {
        let flow = self.clone();
        let want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        let target = want.clone();
        let reached = tokio::time::timeout(Duration::from_secs(2), async move {
            loop {
                if flow.events() == target {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "expected {:?}, got {:?}", want, self.events());
    }
}

impl StreamListener for Flow {
    fn on_data(&mut self, chunk: Bytes) {
        self.0
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&chunk).into_owned());
    }

    fn on_error(&mut self, err: StreamError) {
        self.0.lock().unwrap().push(format!("<ERROR:{err}>"));
    }

    fn on_end(&mut self) {
        self.0.lock().unwrap().push("<END>".to_string());
    }
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A one-shot slot a test fills and a handler drains.
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn put(&self, value: T) {
        *self.0.lock().unwrap() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().unwrap().take()
    }
}
