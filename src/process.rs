//! The local process handle and its operation surface (spec §4.3).
//!
//! A `ProcessHandle` is the thing user code actually holds: a cheap, cloneable reference to a
//! running process's mailbox, channel table, and owning node. The process's root future receives
//! one by value when it starts; every other process reaches it indirectly, by `ProcessId`, through
//! the node's registry (spec §9, "cyclic references").

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};

use crate::channel::{ReceivePort, SendPort};
use crate::closure::{Closure, ProcessEntry, RemoteTable, LINK_BACK_LABEL, SEND_RESULT_LABEL};
use crate::error::CoreError;
use crate::id::{MonitorRef, NodeId, ProcessId, SpawnRef};
use crate::mailbox::{match_message, match_unknown, BlockMode, Matcher};
use crate::message::Message;
use crate::node::{LocalEntry, Node};
use crate::protocol::{DeathReason, DidSpawn, Signal};
use crate::transport::Destination;

/// Raised by [`ProcessHandle::terminate`] to unwind the root future. Caught by
/// [`ProcessHandle::catch_terminate`]; if it escapes to the top, the process exits with
/// `DeathReason::Normal` (spec §4.3, §9 open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminated;

/// A handle to one running process: its identity, its node, and its own mailbox/channel/link
/// bookkeeping. Cheap to clone; every clone refers to the same underlying state.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: ProcessId,
    node: Node,
    entry: Arc<LocalEntry>,
}

pub(crate) fn handle_for(node: Node, pid: ProcessId, entry: Arc<LocalEntry>) -> ProcessHandle {
    ProcessHandle { pid, node, entry }
}

/// Drives a resolved process entry to completion, producing the death reason the node records
/// for it. Panics are caught at this boundary when `catch_panics` is set (spec §4.8); an
/// `Err(CoreError::TerminationRequested)` propagated out of the root future (an uncaught
/// `terminate`) is reported as `Normal`, matching §9's resolution of the open question.
pub(crate) async fn run_entry(entry: ProcessEntry, handle: ProcessHandle, catch_panics: bool) -> DeathReason {
    let fut = entry(handle);
    let outcome = if catch_panics {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(CoreError::UncaughtException(panic_message(payload))),
        }
    } else {
        fut.await
    };
    match outcome {
        Ok(()) => DeathReason::Normal,
        Err(CoreError::TerminationRequested) => DeathReason::Normal,
        Err(err) => DeathReason::Exception(err.to_string()),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "process panicked with a non-string payload".to_string()
    }
}

impl ProcessHandle {
    pub fn self_pid(&self) -> ProcessId {
        self.pid
    }

    pub fn self_node(&self) -> NodeId {
        self.node.id()
    }

    pub(crate) fn remote_table(&self) -> &RemoteTable {
        self.node.remote_table().as_ref()
    }

    /// Delivers an already-encoded [`Message`] into this same process's own mailbox. Used by
    /// `closure_bind`'s combinator to thread a resolved value into the continuation it runs next,
    /// the same way [`ProcessHandle::send_chan`] delivers a pre-encoded value to a channel.
    pub(crate) async fn deliver_to_self(&self, message: Message) {
        self.node.route_data(Destination::Process(self.pid), message).await;
    }

    /// Fire-and-forget send to another process's mailbox (spec §4.3, §4.6). Never fails
    /// observably; a send to a process on an already-failed node is dropped silently (the caller
    /// learns of this only via a monitor or link).
    pub async fn send<T>(&self, target: ProcessId, value: T)
    where
        T: Serialize + 'static,
    {
        self.node.send_value(target, value).await;
    }

    /// Blocks until a message of type `T` arrives, scanning past (and preserving the order of)
    /// any other type already queued.
    pub async fn expect<T>(&self) -> T
    where
        T: DeserializeOwned + 'static,
    {
        self.receive_wait().await
    }

    /// Equivalent to [`ProcessHandle::expect`]; named to match spec §4.3's `receive_wait`.
    pub async fn receive_wait<T>(&self) -> T
    where
        T: DeserializeOwned + 'static,
    {
        let mut matchers: Vec<Box<dyn Matcher<T> + Send>> = vec![match_message(|v: T| v)];
        match self.entry.mailbox.receive(&mut matchers, BlockMode::Blocking).await {
            Ok(Some(value)) => value,
            Ok(None) => unreachable!("blocking receive returned none"),
            Err(err) => panic!("mailbox decode failure for a matched fingerprint: {err}"),
        }
    }

    /// Like [`ProcessHandle::receive_wait`], but gives up after `timeout`, returning `None`.
    pub async fn receive_timeout<T>(&self, timeout: Duration) -> Option<T>
    where
        T: DeserializeOwned + 'static,
    {
        let mut matchers: Vec<Box<dyn Matcher<T> + Send>> = vec![match_message(|v: T| v)];
        match self
            .entry
            .mailbox
            .receive(&mut matchers, BlockMode::Timeout(timeout))
            .await
        {
            Ok(value) => value,
            Err(err) => panic!("mailbox decode failure for a matched fingerprint: {err}"),
        }
    }

    /// Non-blocking selective receive against a caller-supplied matcher list, in the order given
    /// (spec §4.1). The last matcher should usually be [`crate::mailbox::match_unknown`] if unknown
    /// message types must be drained rather than left blocking future receives.
    pub async fn receive_select<R>(&self, matchers: &mut [Box<dyn Matcher<R> + Send>], mode: BlockMode) -> Result<Option<R>, CoreError> {
        self.entry.mailbox.receive(matchers, mode).await
    }

    /// Drops the head message regardless of type, if one is queued. Convenience built on
    /// [`crate::mailbox::match_unknown`].
    pub async fn drop_next(&self) -> Option<Message> {
        let mut matchers: Vec<Box<dyn Matcher<Message> + Send>> = vec![match_unknown(|m| m)];
        self.entry
            .mailbox
            .receive(&mut matchers, BlockMode::NonBlocking)
            .await
            .expect("match_unknown never fails to decode")
    }

    // ---- channels ----

    pub async fn new_channel<T>(&self) -> (SendPort<T>, ReceivePort<T>)
    where
        T: DeserializeOwned + 'static,
    {
        let (id, queue) = self.node.new_channel_id(self.pid, &self.entry).await;
        (SendPort::new(id), ReceivePort::single(queue))
    }

    pub async fn send_chan<T>(&self, port: &SendPort<T>, value: T)
    where
        T: Serialize + 'static,
    {
        let Ok(message) = Message::encode(&value) else { return };
        self.node.route_data(Destination::Channel(port.channel_id()), message).await;
    }

    pub async fn receive_chan<T>(&self, port: &mut ReceivePort<T>) -> T
    where
        T: DeserializeOwned + 'static,
    {
        port.receive_chan().await
    }

    // ---- lifecycle ----

    /// Spawns `root` as a new, unlinked process on this same node (spec §4.3's `spawn` applied to
    /// a local Rust closure rather than a remote [`Closure`] token; see
    /// [`ProcessHandle::spawn_closure`] for the cross-node form driven by the `RemoteTable`).
    pub async fn spawn_local<F, Fut>(&self, root: F) -> ProcessHandle
    where
        F: FnOnce(ProcessHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.node.spawn(root).await
    }

    /// Requests that `target` resolve and spawn `closure`, without waiting for the reply (spec
    /// §4.5). Returns the [`SpawnRef`] that will correlate with the eventual
    /// [`crate::protocol::DidSpawn`] message.
    pub async fn spawn_async(&self, target: NodeId, closure: Closure) -> SpawnRef {
        let spawn_ref = SpawnRef::new(self.entry.monitor_counter.next());
        self.node.request_spawn(target, closure, spawn_ref, self.pid).await;
        spawn_ref
    }

    /// `spawn_async` followed by `expect`ing the matching `DidSpawn` (spec §4.5).
    pub async fn spawn_closure(&self, target: NodeId, closure: Closure) -> ProcessId {
        let spawn_ref = self.spawn_async(target, closure).await;
        loop {
            let DidSpawn(got_ref, pid) = self.expect::<DidSpawn>().await;
            if got_ref == spawn_ref {
                return pid;
            }
        }
    }

    /// Spawns a proxy on `target` that runs `closure` and mails its resolved value straight back,
    /// then blocks for the reply (spec §4.5). `closure` must resolve (via `un_closure`) to a `T`.
    pub async fn call<T>(&self, target: NodeId, closure: Closure) -> T
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let wrapped = Closure::new(
            SEND_RESULT_LABEL,
            bincode::serialize(&(closure, self.pid)).expect("closure and pid are always serializable"),
        );
        let _ = self.spawn_closure(target, wrapped).await;
        self.expect::<T>().await
    }

    /// Spawns `closure` on `target`, linking it back to this process before it runs, and installs
    /// a monitor on it from this process (spec §4.5). Returns the child's `ProcessId` and the
    /// `MonitorRef` of the installed monitor.
    pub async fn spawn_supervised(&self, target: NodeId, closure: Closure) -> (ProcessId, MonitorRef) {
        let wrapped = Closure::new(
            LINK_BACK_LABEL,
            bincode::serialize(&(closure, self.pid)).expect("closure and pid are always serializable"),
        );
        let child = self.spawn_closure(target, wrapped).await;
        let mref = self.monitor(child).await;
        (child, mref)
    }

    /// Installs a link between this process and `target`: if either dies, the other receives a
    /// [`crate::protocol::LinkExit`] (spec §4.3, Invariant 5). Bidirectional by construction: this
    /// call both records `target` locally (so this process is notified if it dies) and asks
    /// `target`'s node to record this process (so `target` is notified if *this* process dies).
    pub async fn link(&self, target: ProcessId) {
        {
            let mut state = self.entry.state.lock().await;
            state.links.insert(target);
        }
        if let Some(reason) = self.node.register_watch(target, self.pid, Signal::Link).await {
            self.node.send_value(self.pid, crate::protocol::LinkExit(target, reason)).await;
        }
    }

    pub async fn unlink(&self, target: ProcessId) {
        {
            let mut state = self.entry.state.lock().await;
            state.links.remove(&target);
        }
        self.node.unregister_watch(target, self.pid, Signal::Unlink).await;
    }

    /// Installs a one-shot monitor on `target`: a [`crate::protocol::MonitorNotification`] is
    /// delivered exactly once when `target` dies (spec §4.3, Invariant 4).
    pub async fn monitor(&self, target: ProcessId) -> MonitorRef {
        let mref = MonitorRef::new(target, self.entry.monitor_counter.next());
        if let Some(reason) = self
            .node
            .register_watch(target, self.pid, Signal::Monitor(mref))
            .await
        {
            self.node
                .send_value(self.pid, crate::protocol::MonitorNotification(mref, target, reason))
                .await;
        }
        mref
    }

    pub async fn unmonitor(&self, mref: MonitorRef) {
        self.node
            .unregister_watch(mref.target(), self.pid, Signal::Unmonitor(mref))
            .await;
    }

    /// Raises [`Terminated`], unwinding the current async call stack up to the nearest enclosing
    /// [`ProcessHandle::catch_terminate`], or to the root future if there is none — in which case
    /// the process exits with `DeathReason::Normal` (spec §4.3, §9).
    pub fn terminate(&self) -> CoreError {
        CoreError::TerminationRequested
    }

    /// Runs `body`, intercepting a [`ProcessHandle::terminate`] raised inside it. Does **not**
    /// intercept link-exit or monitor notifications delivered via the mailbox — those are ordinary
    /// messages, not control flow (spec §4.3).
    pub async fn catch_terminate<F, Fut, R>(&self, body: F) -> Result<R, Terminated>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R, CoreError>>,
    {
        match body().await {
            Ok(value) => Ok(value),
            Err(CoreError::TerminationRequested) => Err(Terminated),
            Err(err) => {
                tracing::warn!(error = %err, "catch_terminate observed a non-termination error");
                Err(Terminated)
            }
        }
    }

    /// Resolves `closure` to a plain typed value through this node's `RemoteTable` (spec §4.5,
    /// "`un_closure`").
    pub fn un_closure<T>(&self, closure: &Closure) -> Result<T, crate::error::ClosureResolutionError>
    where
        T: DeserializeOwned + 'static,
    {
        closure.resolve(self.remote_table())
    }
}

/// Registers the closures a spawn/call/supervise rendezvous needs on top of the plain combinators
/// [`crate::closure::RemoteTable::register_combinators`] already installs: the `call` proxy and the
/// `spawn_supervised` link-back wrapper. Both take `(inner: Closure, requester: ProcessId)` as their
/// environment and resolve `inner` against the *same* table they themselves were resolved from.
pub(crate) fn register_process_combinators(table: &mut RemoteTable) {
    table.register_entry(SEND_RESULT_LABEL, |env| {
        let (inner, requester): (Closure, ProcessId) =
            bincode::deserialize(env).map_err(|err| err.to_string())?;
        let entry: ProcessEntry = Box::new(move |handle: ProcessHandle| {
            Box::pin(async move {
                let message = inner
                    .resolve_message(handle.remote_table())
                    .map_err(CoreError::ClosureResolution)?;
                handle.node.route_data(Destination::Process(requester), message).await;
                Ok(())
            })
        });
        Ok(entry)
    });

    table.register_entry(LINK_BACK_LABEL, |env| {
        let (inner, parent): (Closure, ProcessId) =
            bincode::deserialize(env).map_err(|err| err.to_string())?;
        let entry: ProcessEntry = Box::new(move |handle: ProcessHandle| {
            Box::pin(async move {
                handle.link(parent).await;
                match inner.resolve_entry(handle.remote_table()) {
                    Ok(child_entry) => child_entry(handle).await,
                    Err(err) => Err(CoreError::ClosureResolution(err)),
                }
            })
        });
        Ok(entry)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    async fn boot_node() -> Node {
        Node::start(NodeConfig::with_bind_addr("127.0.0.1:0".parse().unwrap()), RemoteTable::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn echo_roundtrip() {
        let node = boot_node().await;
        let observer = node.spawn(|_h: ProcessHandle| async move { Ok(()) }).await;
        let observer_pid = observer.self_pid();

        let echo = node
            .spawn(|handle: ProcessHandle| async move {
                let value: i32 = handle.expect().await;
                let sender: ProcessId = handle.expect().await;
                handle.send(sender, value).await;
                Ok(())
            })
            .await;
        let echo_pid = echo.self_pid();

        node.spawn(move |handle: ProcessHandle| async move {
            handle.send(echo_pid, 42i32).await;
            handle.send(echo_pid, handle.self_pid()).await;
            let reply: i32 = handle.expect().await;
            handle.send(observer_pid, reply).await;
            Ok(())
        })
        .await;

        let reply: i32 = observer.receive_timeout(Duration::from_millis(500)).await.unwrap();
        assert_eq!(reply, 42);
    }

    #[tokio::test]
    async fn selective_receive_preserves_skipped_order() {
        let node = boot_node().await;
        let handle = node.spawn(|_h: ProcessHandle| async move { Ok(()) }).await;
        handle.send(handle.self_pid(), "a".to_string()).await;
        handle.send(handle.self_pid(), 7i32).await;
        handle.send(handle.self_pid(), "b".to_string()).await;

        let got: i32 = handle.receive_timeout(Duration::from_millis(200)).await.unwrap();
        assert_eq!(got, 7);
        let first: String = handle.receive_timeout(Duration::from_millis(200)).await.unwrap();
        assert_eq!(first, "a");
    }

    #[tokio::test]
    async fn link_notifies_on_abnormal_exit() {
        let node = boot_node().await;
        let watcher = node.spawn(|_h: ProcessHandle| async move { Ok(()) }).await;
        let watcher_pid = watcher.self_pid();

        let doomed = node
            .spawn(move |handle: ProcessHandle| async move {
                handle.link(watcher_pid).await;
                Err(CoreError::UncaughtException("boom".to_string()))
            })
            .await;
        let _ = doomed.self_pid();

        let exit: crate::protocol::LinkExit = watcher.receive_timeout(Duration::from_millis(500)).await.unwrap();
        assert!(matches!(exit.1, DeathReason::Exception(_)));
    }

    #[tokio::test]
    async fn monitor_fires_at_most_once() {
        let node = boot_node().await;
        let watcher = node.spawn(|_h: ProcessHandle| async move { Ok(()) }).await;
        let target = node.spawn(|_h: ProcessHandle| async move { Ok(()) }).await;
        let target_pid = target.self_pid();
        let _mref = watcher.monitor(target_pid).await;

        let first: crate::protocol::MonitorNotification =
            watcher.receive_timeout(Duration::from_millis(500)).await.unwrap();
        assert_eq!(first.1, target_pid);
        let second: Option<crate::protocol::MonitorNotification> =
            watcher.receive_timeout(Duration::from_millis(100)).await;
        assert!(second.is_none());
    }
}
