/*!
A Cloud Haskell-style distributed process runtime for Rust.

Every process owns a mailbox with selective receive, can be linked or monitored by others, and
can exchange values through typed channels that merge. Spawning across nodes works the same way
as spawning locally: a [`closure::Closure`] names a reconstructor function registered in the
target node's [`closure::RemoteTable`], never code itself, so a process can be started on a node
that was never compiled against the caller's closure type.

# Quick start

```no_run
use farcall::config::NodeConfig;
use farcall::closure::RemoteTable;
use farcall::node::Node;

# #[tokio::main]
# async fn main() -> std::io::Result<()> {
let node = Node::start(NodeConfig::default(), RemoteTable::new()).await?;
let echo = node
    .spawn(|handle| async move {
        let value: i32 = handle.expect().await;
        let from: farcall::id::ProcessId = handle.expect().await;
        handle.send(from, value).await;
        Ok(())
    })
    .await;
# let _ = echo;
# Ok(())
# }
```

# Main concepts

* **[`node::Node`]** - one runtime per address; owns the connection map, the process registry and
  the [`closure::RemoteTable`] closures resolve against.
* **[`process::ProcessHandle`]** - what a running process holds: its own mailbox, channel table,
  and the operations of spec-shaped process lifecycle (`send`, `receive_wait`, `link`, `monitor`,
  `spawn_closure`, `call`, `spawn_supervised`, ...).
* **[`channel::SendPort`] / [`channel::ReceivePort`]** - typed, unidirectional channels. Receive
  ends merge with [`channel::merge_ports_biased`] / [`channel::merge_ports_rr`] into one port that
  still receives atomically across every leaf.
* **[`closure::Closure`]** - `(label, env)`, resolved against a [`closure::RemoteTable`] into
  either a plain value (`un_closure`) or a runnable process entry (`spawn_closure`/`call`/
  `spawn_supervised`).

Connection failures and abnormal exits never panic a caller: they show up as an ordinary
[`protocol::LinkExit`] or [`protocol::MonitorNotification`] message in the watching process's
mailbox, with a [`protocol::DeathReason`] naming what happened.
*/

pub mod channel;
pub mod closure;
pub mod config;
pub mod error;
pub mod id;
pub mod mailbox;
pub mod message;
pub mod node;
pub mod process;
pub mod protocol;
pub mod serializer;
mod transport;

pub use closure::{Closure, RemoteTable};
pub use config::NodeConfig;
pub use error::CoreError;
pub use id::{ChannelId, MonitorRef, NodeId, ProcessId, SpawnRef};
pub use mailbox::{match_if, match_message, match_unknown, BlockMode, Matcher};
pub use message::Message;
pub use node::Node;
pub use process::ProcessHandle;
pub use protocol::DeathReason;
