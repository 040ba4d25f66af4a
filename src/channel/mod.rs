//! Typed, unidirectional channels with mergeable receive ends (spec §4.2).
//!
//! A [`SendPort`] is just a [`ChannelId`]: cheap to clone, serializable, and safe to mail to any
//! process on any node. A [`ReceivePort`] owns the actual queue (or a tree of them, once merged)
//! and is deliberately **not** `Serialize`/`Deserialize` — the type system is what stops a receive
//! end from leaking off the process that created it.

mod queue;
mod receiver;
mod sender;

pub(crate) use queue::ChannelQueue;
pub use receiver::ReceivePort;
pub use sender::SendPort;

use std::sync::Arc;

use crate::id::ChannelId;

/// Constructs the two ends of a fresh channel rooted at `id`. Used by
/// [`crate::process::LocalProcess::new_channel`], which is the only code with a legitimate
/// `ChannelId` counter to mint `id` from.
pub(crate) fn new_channel<T>(id: ChannelId) -> (SendPort<T>, ReceivePort<T>, Arc<ChannelQueue>) {
    let queue = Arc::new(ChannelQueue::new());
    (
        SendPort::new(id),
        ReceivePort::single(queue.clone()),
        queue,
    )
}

/// Merges `ports` into one [`ReceivePort`] that always prefers the earliest non-empty port
/// (spec §4.2, `LeftBiased`).
pub fn merge_ports_biased<T>(ports: Vec<ReceivePort<T>>) -> ReceivePort<T> {
    ReceivePort::left_biased(ports)
}

/// Merges `ports` into one [`ReceivePort`] that, after each successful receive, rotates so the
/// next receive starts from the following port (spec §4.2, `RoundRobin`).
pub fn merge_ports_rr<T>(ports: Vec<ReceivePort<T>>) -> ReceivePort<T> {
    ReceivePort::round_robin(ports)
}
