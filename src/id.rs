//! Process, node, channel, monitor and spawn identifiers.
//!
//! Every identifier type here is a plain value: cheap to copy, hash and compare, and stable for
//! the lifetime of whatever it names. `ProcessId`, `ChannelId`, `MonitorRef` and `SpawnRef` are all
//! ultimately `(NodeId, u64)` pairs, where the `u64` comes from a strictly monotonic counter owned
//! by the node (or, for `MonitorRef`/`SpawnRef`, by the requesting process). None of these counters
//! ever wrap back to a previously issued value for the lifetime of the process that owns them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque address of a node's transport endpoint.
///
/// Equality and hashing are defined over the pair `(addr, instance)`: the `instance` nonce
/// distinguishes a node that restarted on the same `SocketAddr` from its predecessor, so that a
/// connection re-established after a crash is never mistaken for a live continuation of the old
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    addr: SocketAddr,
    instance: u64,
}

impl NodeId {
    /// Creates a `NodeId` for a node bound to `addr`, freshly booted in this process.
    pub fn new(addr: SocketAddr) -> Self {
        NodeId {
            addr,
            instance: rand::random(),
        }
    }

    /// Builds a `NodeId` from its wire-stable parts. Used when decoding a `NodeId` received from
    /// a peer, never to mint a fresh identity.
    pub fn from_parts(addr: SocketAddr, instance: u64) -> Self {
        NodeId { addr, instance }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}", self.addr, self.instance)
    }
}

/// A strictly monotonic counter. Shared building block for every `*_index`/`*_counter` field in
/// this module: no identifier derived from it is ever reused for the lifetime of the owning value.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Counter(AtomicU64::new(0))
    }

    /// Returns the next value, starting at 0.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// The identity of a process: the node that owns it, plus a local index assigned from that node's
/// process counter.
///
/// `local_index` is never reused within a node's lifetime (Invariant 1, spec §3). Ordering is
/// lexicographic on `(node, local_index)` and is used only to break ties when two linked processes
/// die "simultaneously" and must agree, without further communication, on who notifies whom first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId {
    node: NodeId,
    local_index: u64,
}

impl ProcessId {
    pub fn new(node: NodeId, local_index: u64) -> Self {
        ProcessId { node, local_index }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn local_index(&self) -> u64 {
        self.local_index
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.local_index)
    }
}

/// The identity of a typed channel: the process that owns it, plus a local index assigned from
/// that process's channel counter. Channels die with their owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    owner: ProcessId,
    local_index: u64,
}

impl ChannelId {
    pub fn new(owner: ProcessId, local_index: u64) -> Self {
        ChannelId { owner, local_index }
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    pub fn local_index(&self) -> u64 {
        self.local_index
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#chan{}", self.owner, self.local_index)
    }
}

/// Correlates a single `monitor` installation with the `MonitorNotification` it eventually
/// produces (at most once, Invariant 4). The counter is drawn from the *monitoring* process, not
/// the target, so two different processes monitoring the same target never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorRef {
    target: ProcessId,
    counter: u64,
}

impl MonitorRef {
    pub fn new(target: ProcessId, counter: u64) -> Self {
        MonitorRef { target, counter }
    }

    pub fn target(&self) -> ProcessId {
        self.target
    }
}

impl fmt::Display for MonitorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor({},{})", self.target, self.counter)
    }
}

/// Correlates a remote `Spawn` request with its `DidSpawn` reply. Drawn from the requesting
/// process's own counter, so a process can have several spawns in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpawnRef(u64);

impl SpawnRef {
    pub fn new(counter: u64) -> Self {
        SpawnRef(counter)
    }
}

impl fmt::Display for SpawnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spawn({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_never_repeats() {
        let c = Counter::new();
        let seen: Vec<u64> = (0..5).map(|_| c.next()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn process_id_ordering_is_lexicographic() {
        let node = NodeId::new("127.0.0.1:9000".parse().unwrap());
        let a = ProcessId::new(node, 1);
        let b = ProcessId::new(node, 2);
        assert!(a < b);
    }

    #[test]
    fn different_boot_instances_are_distinct_nodes() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let n1 = NodeId::new(addr);
        let n2 = NodeId::new(addr);
        assert_ne!(n1, n2, "two boots on the same address must not collide");
    }
}
