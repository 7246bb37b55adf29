//! Global counters move with bridged traffic.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use bytes::Bytes;
use common::Cluster;
use serde_json::json;
use serial_test::serial;
use stream_bridge::prelude::*;
use stream_bridge::utils::metrics::global_metrics;

#[tokio::test]
#[serial]
async fn test_streamed_call_counts_streams_and_acks() {
    let cluster = Cluster::new("metrics");
    cluster
        .node2
        .create_service(Service::new("file").action("size", |mut ctx| async move {
            let data = ctx.take_stream()?.read_to_end().await?;
            Ok(Param::Inline(json!(data.len())))
        }))
        .unwrap();
    cluster.start().await;

    let before = global_metrics().snapshot();
    let source = ByteStream::from_chunks(vec![vec![3u8; 100]; 10]);
    let res = cluster
        .node1
        .call("file.size", Param::Streamed(source), CallOptions::new().node("node-2"))
        .await
        .unwrap();
    assert_eq!(res.into_inline(), Some(json!(1000)));
    cluster.settled().await;
    let after = global_metrics().snapshot();

    assert!(after.calls_remote > before.calls_remote);
    // one proxy on each node, both ended
    assert!(after.streams_opened >= before.streams_opened + 2);
    assert!(after.streams_ended >= before.streams_ended + 2);
    assert!(after.acks_sent >= before.acks_sent + 10);
    assert!(after.packets_sent >= before.packets_sent + 12);
    cluster.stop().await;
}

#[tokio::test]
#[serial]
async fn test_malformed_packets_counted() {
    let cluster = Cluster::new("metrics");
    cluster.start().await;
    let before = global_metrics().snapshot();

    let raw = cluster.bus.transporter(NodeId::new("node-9"));
    raw.send(&NodeId::new("node-2"), "metrics.node-2", Bytes::from_static(b"\x01"))
        .await
        .unwrap();
    raw.send(&NodeId::new("node-2"), "metrics.node-2", Bytes::from_static(b"\xEE\x00junk"))
        .await
        .unwrap();

    let counted = || global_metrics().snapshot().malformed_packets >= before.malformed_packets + 2;
    common::eventually(counted).await;
    cluster.stop().await;
}

#[tokio::test]
#[serial]
async fn test_failed_call_counted() {
    let cluster = Cluster::new("metrics");
    cluster.start().await;
    let before = global_metrics().snapshot();

    let err = cluster
        .node1
        .call("nope.missing", Param::default(), CallOptions::new().node("node-2"))
        .await;
    assert!(err.is_err());

    let after = global_metrics().snapshot();
    assert!(after.calls_failed > before.calls_failed);
    cluster.stop().await;
}
