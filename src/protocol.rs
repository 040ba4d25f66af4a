//! The control-plane signals the node controller dispatches, and the ordinary, mailbox-delivered
//! notifications those signals eventually produce (spec §4.4).
//!
//! Shape grounded on the real `lunatic` process runtime's `Signal` enum
//! (`examples/other_examples/11b1714d_..._lib.rs.rs`: `Link`, `UnLink`, `LinkDied`, `Message`,
//! `Kill`), extended with `Monitor`/`Unmonitor`/`Spawn` to cover the distributed rendezvous and
//! monitoring this spec adds on top of plain linking.
//!
//! Only registration requests (`Link`, `Unlink`, `Monitor`, `Unmonitor`, `Spawn`) travel as
//! control signals proper. Their outcomes — [`LinkExit`], [`MonitorNotification`], [`DidSpawn`] —
//! are ordinary typed values delivered straight into the requester's mailbox (spec §4.3: "remote
//! death signals delivered via the mailbox ... are ordinary messages").

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{MonitorRef, ProcessId, SpawnRef};

/// Why a process stopped. A closed set (spec §4.4): nothing outside this enum is ever reported as
/// a death reason.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DeathReason {
    #[error("normal termination")]
    Normal,
    #[error("exception: {0}")]
    Exception(String),
    #[error("connection to the owning node was lost")]
    Disconnected,
    #[error("process never existed or its node is unreachable")]
    Unreachable,
    #[error("linked process {0} died: {1}")]
    LinkedDeath(ProcessId, Box<DeathReason>),
}

/// A control-plane registration request, always paired with the `ProcessId` of whoever sent it
/// (spec §4.4: "every control message carries a sender identifier and a signal"). Each variant
/// targets an existing process. `Spawn` is handled separately (`crate::transport::Frame::Spawn`):
/// it targets a node as a whole, not a process, since there is no destination PID until it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Signal {
    /// Register `sender` as a process to notify (with a [`LinkExit`]) if the destination dies.
    Link,
    Unlink,
    /// Register `sender` as a process to notify (with a [`MonitorNotification`] carrying this
    /// ref) if the destination dies.
    Monitor(MonitorRef),
    Unmonitor(MonitorRef),
}

/// A control message: who it's from, and what it says.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcMsg {
    pub sender: ProcessId,
    pub signal: Signal,
}

impl NcMsg {
    pub fn new(sender: ProcessId, signal: Signal) -> Self {
        NcMsg { sender, signal }
    }
}

/// Delivered to every process linked to `0` once it has died for reason `1` (spec §4.4's `Exit`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkExit(pub ProcessId, pub DeathReason);

/// Delivered to whoever installed monitor `0`, once its target (`1`) has died for reason `2`.
/// Produced at most once per [`MonitorRef`] (Invariant 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorNotification(pub MonitorRef, pub ProcessId, pub DeathReason);

/// Correlates with a pending `spawn_async` (spec §4.4): the process spawned in response to
/// `SpawnRef` `0` is `1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidSpawn(pub SpawnRef, pub ProcessId);
