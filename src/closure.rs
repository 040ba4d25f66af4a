//! Serializable deferred computations (spec §4.5).
//!
//! A [`Closure`] is `(label, env_bytes)` — never code, always just enough data to look a
//! reconstructor function up in the resolving node's [`RemoteTable`] and hand it the environment.
//! Two kinds of closures exist: ones that resolve to a plain typed *value* (`un_closure`, §4.5
//! paragraph 1) and ones that resolve to a *process entry* — a computation a node can actually
//! spawn (used by `Spawn`/`spawn`/`call`/`spawn_supervised`, §4.5 paragraphs 2-3). They are kept in
//! separate registries because a process entry is not itself a serializable value; only the
//! `(label, env)` token naming it is.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ClosureResolutionError;
use crate::message::Message;
use crate::process::ProcessHandle;
use crate::serializer::{self, Fingerprint};

/// Reserved label for [`closure_seq`]'s combinator closures.
pub const SEQ_LABEL: &str = "core/seq";
/// Reserved label for [`closure_bind`]'s combinator closures.
pub const BIND_LABEL: &str = "core/bind";
/// Reserved label used internally by `spawn_supervised` to link the child back to its parent
/// before running the user's entry.
pub const LINK_BACK_LABEL: &str = "core/link-back";
/// Reserved label used internally by `call` to send the user entry's result back to the caller.
pub const SEND_RESULT_LABEL: &str = "core/send-result";

/// `(label, environment)` — a deferred computation that has not yet been resolved against any
/// particular node's [`RemoteTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Closure {
    label: String,
    env: Vec<u8>,
}

impl Closure {
    pub fn new(label: impl Into<String>, env: Vec<u8>) -> Self {
        Closure {
            label: label.into(),
            env,
        }
    }

    /// Builds a closure over a plain, serializable environment value.
    pub fn with_env<E: Serialize>(label: impl Into<String>, env: &E) -> Result<Self, crate::error::CoreError> {
        Ok(Closure::new(label, serializer::encode(env)?))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolves this closure to a plain typed value through `table` (the `un_closure` operation).
    /// Fails with [`ClosureResolutionError::UnknownLabel`] if nothing is registered under the
    /// label, or [`ClosureResolutionError::TypeMismatch`] if the registered value is not a `T`.
    pub fn resolve<T>(&self, table: &RemoteTable) -> Result<T, ClosureResolutionError>
    where
        T: DeserializeOwned + 'static,
    {
        let message = table.resolve_value(&self.label, &self.env)?;
        if !message.is::<T>() {
            return Err(ClosureResolutionError::TypeMismatch {
                label: self.label.clone(),
            });
        }
        message.decode::<T>().map_err(|err| ClosureResolutionError::BadEnvironment {
            label: self.label.clone(),
            reason: err.to_string(),
        })
    }

    /// Resolves this closure to a runnable process entry (used by the node controller when
    /// handling `Signal::Spawn`).
    pub(crate) fn resolve_entry(&self, table: &RemoteTable) -> Result<ProcessEntry, ClosureResolutionError> {
        table.resolve_entry(&self.label, &self.env)
    }

    /// Resolves this closure to its raw, still-encoded [`Message`], without checking it against any
    /// particular `T` (used by `call`'s proxy, which only needs to forward the value, not decode
    /// it; and by `closure_bind`'s combinator, which hands it straight to the spawned process's
    /// own mailbox).
    pub(crate) fn resolve_message(&self, table: &RemoteTable) -> Result<Message, ClosureResolutionError> {
        table.resolve_value(&self.label, &self.env)
    }
}

/// A resolved, ready-to-run process body: what a node actually schedules once a `Spawn` signal's
/// closure has been resolved. `Err` ends the process with `DeathReason::Exception`; `Ok(())` ends
/// it with `DeathReason::Normal` (spec §4.3).
pub type ProcessEntry =
    Box<dyn FnOnce(ProcessHandle) -> BoxFuture<'static, Result<(), crate::error::CoreError>> + Send>;

type ValueCtor = Box<dyn Fn(&[u8]) -> Result<Message, ClosureResolutionError> + Send + Sync>;
type EntryCtor = Box<dyn Fn(&[u8]) -> Result<ProcessEntry, ClosureResolutionError> + Send + Sync>;

/// The per-node, immutable-after-boot map from closure labels to reconstructor functions
/// (spec §6, "RemoteTable interface").
pub struct RemoteTable {
    values: HashMap<String, (Fingerprint, ValueCtor)>,
    entries: HashMap<String, EntryCtor>,
}

impl Default for RemoteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTable {
    /// A table with only the reserved combinator labels registered. Application code adds its own
    /// labels with [`RemoteTable::register_value`] / [`RemoteTable::register_entry`] before a node
    /// boots (the table is immutable once the node starts, per spec §6).
    pub fn new() -> Self {
        let mut table = RemoteTable {
            values: HashMap::new(),
            entries: HashMap::new(),
        };
        table.register_combinators();
        crate::process::register_process_combinators(&mut table);
        table
    }

    /// Registers a label that resolves to a plain, `Serialize`/`DeserializeOwned` value.
    /// `ctor(env_bytes) -> Result<T, reason>` lets the decode step itself fail with a readable
    /// reason, surfaced as [`ClosureResolutionError::BadEnvironment`].
    pub fn register_value<T, F>(&mut self, label: impl Into<String>, ctor: F)
    where
        T: Serialize + 'static,
        F: Fn(&[u8]) -> Result<T, String> + Send + Sync + 'static,
    {
        let label = label.into();
        let stored_label = label.clone();
        let wrapped: ValueCtor = Box::new(move |env| {
            let value = ctor(env).map_err(|reason| ClosureResolutionError::BadEnvironment {
                label: stored_label.clone(),
                reason,
            })?;
            Message::encode(&value).map_err(|err| ClosureResolutionError::BadEnvironment {
                label: stored_label.clone(),
                reason: err.to_string(),
            })
        });
        self.values.insert(label, (Fingerprint::of::<T>(), wrapped));
    }

    /// Registers a label that resolves to a runnable process entry, for use with `spawn`/`call`/
    /// `spawn_supervised`.
    pub fn register_entry<F>(&mut self, label: impl Into<String>, ctor: F)
    where
        F: Fn(&[u8]) -> Result<ProcessEntry, String> + Send + Sync + 'static,
    {
        let label = label.into();
        let stored_label = label.clone();
        let wrapped: EntryCtor = Box::new(move |env| {
            ctor(env).map_err(|reason| ClosureResolutionError::BadEnvironment {
                label: stored_label.clone(),
                reason,
            })
        });
        self.entries.insert(label, wrapped);
    }

    pub(crate) fn resolve_value(&self, label: &str, env: &[u8]) -> Result<Message, ClosureResolutionError> {
        let (_fingerprint, ctor) = self
            .values
            .get(label)
            .ok_or_else(|| ClosureResolutionError::UnknownLabel(label.to_string()))?;
        ctor(env)
    }

    pub(crate) fn resolve_entry(&self, label: &str, env: &[u8]) -> Result<ProcessEntry, ClosureResolutionError> {
        let ctor = self
            .entries
            .get(label)
            .ok_or_else(|| ClosureResolutionError::UnknownLabel(label.to_string()))?;
        ctor(env)
    }

    fn register_combinators(&mut self) {
        self.register_entry(SEQ_LABEL, |env| {
            let (a, b): (Closure, Closure) =
                bincode::deserialize(env).map_err(|err| err.to_string())?;
            let entry: ProcessEntry = Box::new(move |handle: ProcessHandle| {
                Box::pin(async move {
                    run_entry_inline(&a, &handle).await;
                    run_entry_inline(&b, &handle).await;
                    Ok(())
                })
            });
            Ok(entry)
        });

        // `bind` resolves `a` as a *value* (`un_closure`, not a process entry) and delivers it
        // into this process's own mailbox before running `k`, so `k`'s entry sees it as the first
        // message it receives. `k` is run regardless of whether `a` resolved, logging the failure,
        // since a `ProcessEntry` has no return slot to report it through otherwise.
        self.register_entry(BIND_LABEL, |env| {
            let (a, k): (Closure, Closure) =
                bincode::deserialize(env).map_err(|err| err.to_string())?;
            let entry: ProcessEntry = Box::new(move |handle: ProcessHandle| {
                Box::pin(async move {
                    match a.resolve_message(handle.remote_table()) {
                        Ok(message) => handle.deliver_to_self(message).await,
                        Err(err) => {
                            tracing::warn!(label = a.label(), error = %err, "bind's left-hand closure failed to resolve to a value");
                        }
                    }
                    run_entry_inline(&k, &handle).await;
                    Ok(())
                })
            });
            Ok(entry)
        });
    }
}

/// Resolves and runs `closure`'s entry against an already-spawned process's handle, used by the
/// `seq`/`bind` combinators to run their constituents without spawning a fresh process each.
async fn run_entry_inline(closure: &Closure, handle: &ProcessHandle) {
    match closure.resolve_entry(handle.remote_table()) {
        Ok(entry) => {
            if let Err(err) = entry(handle.clone()).await {
                tracing::warn!(label = closure.label(), error = %err, "combinator constituent exited with an error");
            }
        }
        Err(err) => {
            tracing::warn!(label = closure.label(), error = %err, "combinator failed to resolve a constituent closure");
        }
    }
}

/// `cpSeq a b`: a closure that, once spawned, runs `a` then `b` in the same process.
pub fn closure_seq(a: Closure, b: Closure) -> Closure {
    Closure::new(SEQ_LABEL, bincode::serialize(&(a, b)).expect("closures are always serializable"))
}

/// `cpBind a k`: resolves `a` to a value (`un_closure`), delivers it as the first message to the
/// spawned process's own mailbox, then runs `k` — `k`'s entry is expected to `expect`/`receive`
/// that value as its first step.
pub fn closure_bind(a: Closure, k: Closure) -> Closure {
    Closure::new(BIND_LABEL, bincode::serialize(&(a, k)).expect("closures are always serializable"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_registered_value() {
        let mut table = RemoteTable::new();
        table.register_value::<i32, _>("double-of-21", |_env| Ok(42));
        let closure = Closure::new("double-of-21", Vec::new());
        let value: i32 = closure.resolve(&table).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn unknown_label_is_an_error() {
        let table = RemoteTable::new();
        let closure = Closure::new("nope", Vec::new());
        let err = closure.resolve::<i32>(&table).unwrap_err();
        assert!(matches!(err, ClosureResolutionError::UnknownLabel(_)));
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let mut table = RemoteTable::new();
        table.register_value::<i32, _>("an-int", |_env| Ok(1));
        let closure = Closure::new("an-int", Vec::new());
        let err = closure.resolve::<String>(&table).unwrap_err();
        assert!(matches!(err, ClosureResolutionError::TypeMismatch { .. }));
    }
}
