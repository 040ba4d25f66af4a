//! Work-push Fibonacci and `call` across two real nodes (SPEC_FULL.md §8, scenarios 2 and closures
//! crossing a node boundary).

use std::time::Duration;

use farcall::closure::{Closure, ProcessEntry, RemoteTable};
use farcall::config::NodeConfig;
use farcall::node::Node;
use farcall::protocol::MonitorNotification;
use farcall::{CoreError, DeathReason, ProcessId};

const FIB_LABEL: &str = "test/fib-worker";
const DOUBLE_LABEL: &str = "test/double";

fn fib(n: u64) -> u64 {
    match n {
        0 => 0,
        1 => 1,
        _ => {
            let (mut a, mut b) = (0u64, 1u64);
            for _ in 2..=n {
                let next = a + b;
                a = b;
                b = next;
            }
            b
        }
    }
}

fn worker_table() -> RemoteTable {
    let mut table = RemoteTable::new();
    table.register_entry(FIB_LABEL, |_env| {
        let entry: ProcessEntry = Box::new(|handle| {
            Box::pin(async move {
                loop {
                    let (n, reply_to): (u64, ProcessId) = handle.expect().await;
                    handle.send(reply_to, fib(n)).await;
                }
            })
        });
        Ok(entry)
    });
    table.register_value::<u64, _>(DOUBLE_LABEL, |env| {
        let n: u64 = farcall::serializer::decode(env).map_err(|err| err.to_string())?;
        Ok(n * 2)
    });
    table
}

#[tokio::test]
async fn work_push_fibonacci_across_two_nodes() {
    let master_node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), worker_table())
        .await
        .unwrap();
    let worker_node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), worker_table())
        .await
        .unwrap();
    let worker_node_id = worker_node.id();

    const N: u64 = 20;
    const WORKER_COUNT: usize = 3;

    let master = master_node
        .spawn(move |handle| async move {
            let mut workers = Vec::with_capacity(WORKER_COUNT);
            for _ in 0..WORKER_COUNT {
                workers.push(handle.spawn_closure(worker_node_id, Closure::new(FIB_LABEL, Vec::new())).await);
            }

            let self_pid = handle.self_pid();
            for i in 1..=N {
                let worker = workers[(i as usize - 1) % workers.len()];
                handle.send(worker, (i, self_pid)).await;
            }

            let mut sum = 0u64;
            for _ in 1..=N {
                sum += handle.receive_wait::<u64>().await;
            }
            handle.send(self_pid, sum).await;
            Ok(())
        })
        .await;

    let total: u64 = master.receive_wait().await;
    let expected: u64 = (1..=N).map(fib).sum();
    assert_eq!(total, expected);
}

#[tokio::test]
async fn call_resolves_a_remote_closure_to_a_value() {
    let caller_node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), worker_table())
        .await
        .unwrap();
    let callee_node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), worker_table())
        .await
        .unwrap();
    let callee_id = callee_node.id();

    let caller = caller_node
        .spawn(move |handle| async move {
            let doubled: u64 = handle.call(callee_id, Closure::with_env(DOUBLE_LABEL, &21u64)?).await;
            let self_pid = handle.self_pid();
            handle.send(self_pid, doubled).await;
            Ok::<(), CoreError>(())
        })
        .await;

    let result: u64 = caller.receive_wait().await;
    assert_eq!(result, 42);
}

#[tokio::test]
async fn monitor_fires_once_when_the_connection_to_its_target_drops() {
    let watcher_node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), worker_table())
        .await
        .unwrap();
    let target_node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), worker_table())
        .await
        .unwrap();
    let target_node_id = target_node.id();

    let target = target_node
        .spawn(|handle| async move {
            handle.receive_wait::<()>().await;
            Ok(())
        })
        .await;
    let target_pid = target.self_pid();

    let watcher = watcher_node.spawn(|_h| async move { Ok(()) }).await;
    let mref = watcher.monitor(target_pid).await;

    // Drop the watcher's node's connection to the target's node, as a real transport failure
    // would, without touching the still-running target process itself.
    watcher_node.disconnect(target_node_id).await;

    let first: MonitorNotification = watcher.receive_timeout(Duration::from_millis(500)).await.unwrap();
    assert_eq!(first.0, mref);
    assert_eq!(first.1, target_pid);
    assert_eq!(first.2, DeathReason::Disconnected);

    let second: Option<MonitorNotification> = watcher.receive_timeout(Duration::from_millis(100)).await;
    assert!(second.is_none(), "monitor must fire at most once (Invariant 2)");
}
