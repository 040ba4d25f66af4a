//! Work-push Fibonacci (SPEC_FULL.md §8, scenario 2): a master round-robins `1..n` across a fixed
//! pool of worker processes, each computing `fib` and sending its result straight back. Run with
//! `cargo run --example fib_workers` once this file is wired into `Cargo.toml` as an `[[example]]`.

use farcall::closure::RemoteTable;
use farcall::config::NodeConfig;
use farcall::node::Node;

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

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let node = Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), RemoteTable::new()).await?;

    const WORKER_COUNT: usize = 4;
    const N: u64 = 30;

    let mut workers = Vec::with_capacity(WORKER_COUNT);
    for _ in 0..WORKER_COUNT {
        let worker = node
            .spawn(|handle| async move {
                loop {
                    let (n, reply_to): (u64, farcall::ProcessId) = handle.expect().await;
                    handle.send(reply_to, fib(n)).await;
                }
            })
            .await;
        workers.push(worker.self_pid());
    }

    let master = node
        .spawn(move |handle| async move {
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
    println!("sum of fib(1..={N}) = {total}");
    Ok(())
}
