//! Link propagation across nodes (SPEC_FULL.md §8, scenario 3): node A links to a process on node
//! B that raises an uncaught exception, and observes the `LinkExit` within bounded time.

use farcall::closure::{Closure, ProcessEntry, RemoteTable};
use farcall::config::NodeConfig;
use farcall::node::Node;
use farcall::protocol::{DeathReason, LinkExit};
use farcall::CoreError;

const DOOMED_LABEL: &str = "demo/doomed-worker";

fn remote_table() -> RemoteTable {
    let mut table = RemoteTable::new();
    table.register_entry(DOOMED_LABEL, |_env| {
        let entry: ProcessEntry =
            Box::new(|_handle| Box::pin(async move { Err(CoreError::UncaughtException("deliberate failure".to_string())) }));
        Ok(entry)
    });
    table
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let node_a = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), remote_table()).await?;
    let node_b = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), remote_table()).await?;
    let node_b_id = node_b.id();

    node_a
        .spawn(move |handle| async move {
            let doomed = handle.spawn_closure(node_b_id, Closure::new(DOOMED_LABEL, Vec::new())).await;
            handle.link(doomed).await;
            let exit: LinkExit = handle.receive_wait().await;
            assert!(matches!(exit.1, DeathReason::Exception(_)));
            println!("link propagated across nodes: {:?}", exit.1);
            Ok(())
        })
        .await;

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}
