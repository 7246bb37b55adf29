//! Backpressure and many streams in flight at once.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use bytes::Bytes;
use common::{eventually, Cluster, Slot};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_bridge::prelude::*;
use tokio::task::JoinSet;

/// A finite source that counts how many chunks the bridge has pulled.
fn counted_source(chunks: usize, pulled: Arc<AtomicUsize>) -> ByteStream {
    let items = (0..chunks).map(move |i| {
        pulled.fetch_add(1, Ordering::SeqCst);
        Ok::<_, StreamError>(Bytes::from(format!("chunk-{i}")))
    });
    ByteStream::from_stream(futures::stream::iter(items))
}

fn park_service(slot: Slot<ByteStream>) -> Service {
    Service::new("file").action("park", move |mut ctx| {
        let slot = slot.clone();
        async move {
            slot.put(ctx.take_stream()?);
            Ok(Param::Inline(json!("parked")))
        }
    })
}

fn cluster_with_flow(flow_control: bool, ack_window: usize) -> Cluster {
    let tune = |node: &str| {
        let mut config = common::config("flow", node);
        config.stream.flow_control = flow_control;
        config.stream.ack_window = ack_window;
        config
    };
    Cluster::with_config(tune("node-1"), tune("node-2"))
}

#[tokio::test]
async fn test_ack_window_bounds_unconsumed_upload() {
    let cluster = cluster_with_flow(true, 4);
    let slot = Slot::new();
    cluster.node2.create_service(park_service(slot.clone())).unwrap();
    cluster.start().await;

    let pulled = Arc::new(AtomicUsize::new(0));
    let source = counted_source(40, pulled.clone());
    let res = cluster
        .node1
        .call("file.park", Param::Streamed(source), CallOptions::new().node("node-2"))
        .await
        .unwrap();
    assert_eq!(res.into_inline(), Some(json!("parked")));

    let seen = pulled.clone();
    eventually(move || seen.load(Ordering::SeqCst) >= 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    // one chunk may sit pulled while the producer waits for credit
    assert!(pulled.load(Ordering::SeqCst) <= 5);

    let parked = slot.take().unwrap();
    let data = parked.read_to_end().await.unwrap();
    assert_eq!(pulled.load(Ordering::SeqCst), 40);
    let expected: Vec<u8> = (0..40).flat_map(|i| format!("chunk-{i}").into_bytes()).collect();
    assert_eq!(data, expected);

    cluster.settled().await;
    cluster.stop().await;
}

#[tokio::test]
async fn test_without_flow_control_everything_is_pushed() {
    let cluster = cluster_with_flow(false, 4);
    let slot = Slot::new();
    cluster.node2.create_service(park_service(slot.clone())).unwrap();
    cluster.start().await;

    let pulled = Arc::new(AtomicUsize::new(0));
    let source = counted_source(40, pulled.clone());
    cluster
        .node1
        .call("file.park", Param::Streamed(source), CallOptions::new().node("node-2"))
        .await
        .unwrap();

    let seen = pulled.clone();
    eventually(move || seen.load(Ordering::SeqCst) == 40).await;

    // the producer finished before anyone read a byte
    let node1 = cluster.node1.clone();
    eventually(move || node1.active_streams() == 0).await;

    let events = slot.take().unwrap().collect_events().await;
    assert_eq!(events.len(), 41);
    assert_eq!(events.last(), Some(&StreamEvent::End));

    cluster.settled().await;
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_duplex_calls() {
    let cluster = Cluster::new("flow");
    cluster
        .node2
        .create_service(Service::new("text").action("upper", |mut ctx| async move {
            let input = ctx.take_stream()?;
            Ok(Param::Streamed(
                input.map_chunks(|c| Bytes::from(c.to_ascii_uppercase())),
            ))
        }))
        .unwrap();
    cluster.start().await;

    let mut tasks = JoinSet::new();
    for call in 0..32usize {
        let node1 = cluster.node1.clone();
        tasks.spawn(async move {
            let chunks: Vec<String> = (0..25).map(|i| format!("call{call}-part{i};")).collect();
            let source = ByteStream::from_chunks(chunks.clone());
            let res = node1
                .call("text.upper", Param::Streamed(source), CallOptions::new().node("node-2"))
                .await
                .unwrap();
            let out = res.into_stream().unwrap().read_to_end().await.unwrap();
            assert_eq!(out, chunks.concat().to_ascii_uppercase().into_bytes());
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    cluster.settled().await;
    assert_eq!(cluster.node1.pending_calls(), 0);
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_in_both_directions() {
    let cluster = Cluster::new("flow");
    let size = |mut ctx: Context| async move {
        let data = ctx.take_stream()?.read_to_end().await?;
        Ok::<_, BridgeError>(Param::Inline(json!(data.len())))
    };
    cluster
        .node1
        .create_service(Service::new("one").action("size", size))
        .unwrap();
    cluster
        .node2
        .create_service(Service::new("two").action("size", size))
        .unwrap();
    cluster.start().await;

    let mut tasks = JoinSet::new();
    for i in 0..16usize {
        let (from, action, target) = if i % 2 == 0 {
            (cluster.node1.clone(), "two.size", "node-2")
        } else {
            (cluster.node2.clone(), "one.size", "node-1")
        };
        tasks.spawn(async move {
            let source = ByteStream::from_chunks(vec![vec![1u8; 256]; i + 1]);
            let res = from
                .call(action, Param::Streamed(source), CallOptions::new().node(target))
                .await
                .unwrap();
            assert_eq!(res.into_inline(), Some(json!(256 * (i + 1))));
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    cluster.settled().await;
    cluster.stop().await;
}
