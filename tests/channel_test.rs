use farcall::closure::RemoteTable;
use farcall::config::NodeConfig;
use farcall::node::Node;

async fn boot_node() -> Node {
    Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), RemoteTable::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn round_robin_merge_preserves_arrival_order() {
    let node = boot_node().await;
    let owner = node.spawn(|_h| async move { Ok(()) }).await;

    let (tx1, rx1) = owner.new_channel::<i32>().await;
    let (tx2, rx2) = owner.new_channel::<i32>().await;

    owner.send_chan(&tx1, 1).await;
    owner.send_chan(&tx2, 2).await;
    owner.send_chan(&tx1, 3).await;
    owner.send_chan(&tx2, 4).await;

    let mut merged = farcall::channel::merge_ports_rr(vec![rx1, rx2]);
    let mut got = Vec::new();
    for _ in 0..4 {
        got.push(owner.receive_chan(&mut merged).await);
    }
    assert_eq!(got, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn left_biased_merge_prefers_earliest_non_empty() {
    let node = boot_node().await;
    let owner = node.spawn(|_h| async move { Ok(()) }).await;

    let (tx1, rx1) = owner.new_channel::<String>().await;
    let (tx2, rx2) = owner.new_channel::<String>().await;

    owner.send_chan(&tx2, "from-2".to_string()).await;
    let mut merged = farcall::channel::merge_ports_biased(vec![rx1, rx2]);
    assert_eq!(owner.receive_chan(&mut merged).await, "from-2");

    owner.send_chan(&tx1, "from-1-a".to_string()).await;
    owner.send_chan(&tx2, "from-2-b".to_string()).await;
    assert_eq!(owner.receive_chan(&mut merged).await, "from-1-a");
}
