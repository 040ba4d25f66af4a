use criterion::{criterion_group, criterion_main, Criterion};
use farcall::closure::RemoteTable;
use farcall::config::NodeConfig;
use farcall::node::Node;

fn spawn_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let node = rt.block_on(async {
        Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), RemoteTable::new())
            .await
            .unwrap()
    });

    c.bench_function("spawn_and_echo", |b| {
        b.to_async(&rt).iter(|| {
            let node = node.clone();
            async move {
                let observer = node.spawn(|_h| async move { Ok(()) }).await;
                let observer_pid = observer.self_pid();
                node.spawn(move |h| async move {
                    h.send(observer_pid, 1i32).await;
                    Ok(())
                })
                .await;
                let _: i32 = observer.receive_wait().await;
            }
        })
    });
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
