//! Node-level runtime configuration (SPEC_FULL.md §4.8, ambient).
//!
//! Deliberately thin: everything here is wire-protocol-agnostic and has nothing to do with the
//! spec itself, only with how one concrete node boots. Loading this from a file or environment is
//! left to callers, the way the teacher's `ProcessConfig` is assembled by hand rather than parsed.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Boots one [`crate::node::Node`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address this node's transport listener binds to.
    pub bind_addr: SocketAddr,
    /// Bound on the number of control messages (link/monitor/spawn requests) buffered per peer
    /// connection before a sender starts waiting.
    pub control_channel_capacity: usize,
    /// Bound on the number of outbound data frames buffered per peer connection.
    pub data_channel_capacity: usize,
    /// Whether a panic unwinding out of a process's root future is caught at the task boundary and
    /// converted into `DeathReason::Exception` (true), or allowed to abort the runtime (false).
    pub catch_panics: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            bind_addr: "127.0.0.1:0".parse().expect("hardcoded address parses"),
            control_channel_capacity: 1024,
            data_channel_capacity: 1024,
            catch_panics: true,
        }
    }
}

impl NodeConfig {
    pub fn with_bind_addr(addr: SocketAddr) -> Self {
        NodeConfig {
            bind_addr: addr,
            ..Default::default()
        }
    }
}
