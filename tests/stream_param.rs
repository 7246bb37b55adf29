//! A stream passed as a call parameter is rebuilt on the remote handler.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{Cluster, Flow};
use serde_json::json;
use stream_bridge::prelude::*;

fn file_service(flow: Flow) -> Service {
    Service::new("file").action("save", move |mut ctx| {
        let flow = flow.clone();
        async move {
            let params = ctx.take_stream()?;
            params.listen(flow);
            Ok(Param::Inline(json!("OK")))
        }
    })
}

#[tokio::test]
async fn test_receive_stream_on_node2() {
    let cluster = Cluster::new("test-1");
    let flow = Flow::new();
    cluster.node2.create_service(file_service(flow.clone())).unwrap();
    cluster.start().await;

    let (writer, stream) = cluster.node1.stream_channel();
    let res = cluster
        .node1
        .call("file.save", Param::Streamed(stream), CallOptions::new().node("node-2"))
        .await
        .unwrap();
    assert_eq!(res.into_inline(), Some(json!("OK")));

    writer.write("first chunk").await.unwrap();
    flow.expect(&["first chunk"]).await;

    writer.write(bytes::Bytes::from_static(b"second chunk")).await.unwrap();
    flow.expect(&["first chunk", "second chunk"]).await;

    writer.end();
    flow.expect(&["first chunk", "second chunk", "<END>"]).await;

    cluster.settled().await;
    cluster.stop().await;
}

#[tokio::test]
async fn test_upload_error_reaches_handler_stream() {
    let cluster = Cluster::new("test-1");
    let flow = Flow::new();
    cluster.node2.create_service(file_service(flow.clone())).unwrap();
    cluster.start().await;

    let (writer, stream) = cluster.node1.stream_channel();
    let res = cluster
        .node1
        .call("file.save", Param::Streamed(stream), CallOptions::new().node("node-2"))
        .await
        .unwrap();
    assert_eq!(res.into_inline(), Some(json!("OK")));

    writer.write("first chunk").await.unwrap();
    flow.expect(&["first chunk"]).await;

    writer
        .fail(StreamError::new("Something happened"))
        .await
        .unwrap();
    flow.expect(&[
        "first chunk",
        "<ERROR:Something happened (NodeID: node-1)>",
        "<END>",
    ])
    .await;

    cluster.settled().await;
    cluster.stop().await;
}

#[tokio::test]
async fn test_routed_call_with_metadata() {
    let cluster = Cluster::new("test-1");
    cluster
        .node2
        .create_service(Service::new("meta").action("user", |ctx| async move {
            Ok(Param::Inline(ctx.meta.get("user").cloned().unwrap_or_default()))
        }))
        .unwrap();
    cluster.node1.add_route("meta.user", "node-2").unwrap();
    cluster.start().await;

    let res = cluster
        .node1
        .call("meta.user", Param::default(), CallOptions::new().meta("user", json!("alice")))
        .await
        .unwrap();
    assert_eq!(res.into_inline(), Some(json!("alice")));
    cluster.stop().await;
}

#[tokio::test]
async fn test_handler_reads_whole_upload() {
    let cluster = Cluster::new("test-1");
    cluster
        .node2
        .create_service(Service::new("file").action("size", |mut ctx| async move {
            let data = ctx.take_stream()?.read_to_end().await?;
            Ok(Param::Inline(json!(data.len())))
        }))
        .unwrap();
    cluster.start().await;

    let source = ByteStream::from_chunks(vec![vec![7u8; 1000]; 50]);
    let res = cluster
        .node1
        .call("file.size", Param::Streamed(source), CallOptions::new().node("node-2"))
        .await
        .unwrap();
    assert_eq!(res.into_inline(), Some(json!(50_000)));

    cluster.settled().await;
    cluster.stop().await;
}
