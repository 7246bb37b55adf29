use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use stream_bridge::prelude::*;

const CHUNK: usize = 16 * 1024;
const CHUNKS: usize = 64;

#[allow(clippy::unwrap_used)]
fn node(bus: &MemoryBus, id: &str, ack_window: usize) -> Broker {
    let config = BridgeConfig::default_with_overrides(|c| {
        c.node.node_id = id.to_string();
        c.node.namespace = "bench".to_string();
        c.stream.ack_window = ack_window;
    });
    Broker::new(config, Arc::new(bus.transporter(NodeId::new(id)))).unwrap()
}

#[allow(clippy::unwrap_used)]
fn bench_remote_upload(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("remote_upload");
    group.throughput(Throughput::Bytes((CHUNK * CHUNKS) as u64));

    for ack_window in [1usize, 16, 256] {
        let bus = MemoryBus::new();
        let caller = node(&bus, "node-1", ack_window);
        let callee = node(&bus, "node-2", ack_window);
        callee
            .create_service(Service::new("file").action("size", |mut ctx| async move {
                let data = ctx.take_stream()?.read_to_end().await?;
                Ok(Param::Inline(serde_json::json!(data.len())))
            }))
            .unwrap();
        runtime.block_on(async {
            caller.start().await.unwrap();
            callee.start().await.unwrap();
        });

        group.bench_function(format!("window_{ack_window}"), |b| {
            b.to_async(&runtime).iter(|| async {
                let source = ByteStream::from_chunks(vec![vec![1u8; CHUNK]; CHUNKS]);
                caller
                    .call("file.size", Param::Streamed(source), CallOptions::new().node("node-2"))
                    .await
                    .unwrap()
            })
        });

        runtime.block_on(async {
            caller.stop().await.unwrap();
            callee.stop().await.unwrap();
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_local_duplex(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let bus = MemoryBus::new();
    let broker = node(&bus, "node-1", 16);
    broker
        .create_service(Service::new("text").action("upper", |mut ctx| async move {
            let input = ctx.take_stream()?;
            Ok(Param::Streamed(input.map_chunks(|c| c.to_ascii_uppercase().into())))
        }))
        .unwrap();

    let mut group = c.benchmark_group("local_duplex");
    group.throughput(Throughput::Bytes((CHUNK * CHUNKS) as u64));
    group.bench_function("upper", |b| {
        b.to_async(&runtime).iter(|| async {
            let source = ByteStream::from_chunks(vec![vec![b'a'; CHUNK]; CHUNKS]);
            let res = broker
                .call("text.upper", Param::Streamed(source), CallOptions::default())
                .await
                .unwrap();
            res.into_stream().unwrap().read_to_end().await.unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_remote_upload, bench_local_duplex);
criterion_main!(benches);
