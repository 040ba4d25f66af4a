//! The crate-wide error hierarchy.
//!
//! Local errors end the local process; they are never retried at this layer (spec §7). Remote
//! consequences are expressed only through link/monitor signals and a [`crate::protocol::DeathReason`] —
//! `CoreError` is what produces that reason, not something callers on other nodes ever see directly.

use thiserror::Error;

use crate::id::NodeId;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("connection to node {0} failed")]
    TransportFailure(NodeId),

    #[error("closure resolution failed: {0}")]
    ClosureResolution(#[from] ClosureResolutionError),

    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::Error),

    #[error("process terminated")]
    TerminationRequested,

    #[error("uncaught exception: {0}")]
    UncaughtException(String),
}

/// Why [`crate::closure::Closure::resolve`] could not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClosureResolutionError {
    #[error("no closure registered under label {0:?}")]
    UnknownLabel(String),

    #[error("closure {label:?} produced a value of a different type than requested")]
    TypeMismatch { label: String },

    #[error("closure {label:?} failed to decode its environment: {reason}")]
    BadEnvironment { label: String, reason: String },
}
