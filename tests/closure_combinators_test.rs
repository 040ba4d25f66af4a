//! `closure_seq`/`closure_bind` (SPEC_FULL.md §4.5) against a real node.

use farcall::closure::{closure_bind, closure_seq, Closure, ProcessEntry, RemoteTable};
use farcall::config::NodeConfig;
use farcall::node::Node;
use farcall::ProcessId;

const EMIT_A_LABEL: &str = "test/emit-a";
const EMIT_B_LABEL: &str = "test/emit-b";
const FORTY_ONE_LABEL: &str = "test/forty-one";
const DOUBLE_AND_REPORT_LABEL: &str = "test/double-and-report";

fn combinator_table() -> RemoteTable {
    let mut table = RemoteTable::new();

    table.register_entry(EMIT_A_LABEL, |env| {
        let reporter: ProcessId = bincode::deserialize(env).map_err(|err| err.to_string())?;
        let entry: ProcessEntry = Box::new(move |handle| {
            Box::pin(async move {
                handle.send(reporter, "a".to_string()).await;
                Ok(())
            })
        });
        Ok(entry)
    });
    table.register_entry(EMIT_B_LABEL, |env| {
        let reporter: ProcessId = bincode::deserialize(env).map_err(|err| err.to_string())?;
        let entry: ProcessEntry = Box::new(move |handle| {
            Box::pin(async move {
                handle.send(reporter, "b".to_string()).await;
                Ok(())
            })
        });
        Ok(entry)
    });

    table.register_value::<u64, _>(FORTY_ONE_LABEL, |_env| Ok(41));

    table.register_entry(DOUBLE_AND_REPORT_LABEL, |env| {
        let reporter: ProcessId = bincode::deserialize(env).map_err(|err| err.to_string())?;
        let entry: ProcessEntry = Box::new(move |handle| {
            Box::pin(async move {
                let n: u64 = handle.expect().await;
                handle.send(reporter, n * 2).await;
                Ok(())
            })
        });
        Ok(entry)
    });

    table
}

#[tokio::test]
async fn closure_seq_runs_both_constituents_in_order() {
    let node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), combinator_table())
        .await
        .unwrap();
    let node_id = node.id();

    let observer = node.spawn(|_h| async move { Ok(()) }).await;
    let observer_pid = observer.self_pid();

    let a = Closure::with_env(EMIT_A_LABEL, &observer_pid).unwrap();
    let b = Closure::with_env(EMIT_B_LABEL, &observer_pid).unwrap();
    let _child = observer.spawn_closure(node_id, closure_seq(a, b)).await;

    let first: String = observer.receive_wait().await;
    let second: String = observer.receive_wait().await;
    assert_eq!(first, "a");
    assert_eq!(second, "b");
}

#[tokio::test]
async fn closure_bind_threads_the_resolved_value_into_k() {
    let node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), combinator_table())
        .await
        .unwrap();
    let node_id = node.id();

    let observer = node.spawn(|_h| async move { Ok(()) }).await;
    let observer_pid = observer.self_pid();

    let a = Closure::new(FORTY_ONE_LABEL, Vec::new());
    let k = Closure::with_env(DOUBLE_AND_REPORT_LABEL, &observer_pid).unwrap();
    let _child = observer.spawn_closure(node_id, closure_bind(a, k)).await;

    let result: u64 = observer.receive_wait().await;
    assert_eq!(result, 82);
}
