//! The per-node singleton: connection map, control/data routing, and process registry (spec §4.4).
//!
//! The actor-per-node model has no direct teacher analogue — the teacher's own "node" is the
//! external `lunatic` WASM host, entirely out of process. Grounded directly on spec §4.4, using the
//! same "one task owns one `mpsc` receiver" shape as the teacher's process signal loop and the
//! reader-task-forwarding-into-a-central-dispatcher shape of
//! `examples/other_examples/93eea3a6_..._client.rs.rs`.
//!
//! Connections are bidirectional and deduplicated per peer: the first frame either side writes on
//! a freshly dialed socket is a `Frame::Hello(NodeId)` naming the dialer, so the accepting side can
//! register the same socket for sends back to that peer rather than dialing a second one.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::closure::{ProcessEntry, RemoteTable};
use crate::config::NodeConfig;
use crate::error::CoreError;
use crate::id::{ChannelId, Counter, MonitorRef, NodeId, ProcessId};
use crate::mailbox::CQueue;
use crate::message::Message;
use crate::process::{self, ProcessHandle};
use crate::protocol::{DeathReason, DidSpawn, LinkExit, MonitorNotification, NcMsg, Signal};
use crate::transport::{self, Destination, Frame, SpawnRequest, TcpTransport};

/// What a local process installed toward a watcher that lives on another node. Kept so that, if
/// the connection to that node later fails, this node can synthesize the death notification itself
/// without the remote side's cooperation (spec §4.4 "connection failure handling").
#[derive(Clone)]
enum OutboundWatch {
    Link { local: ProcessId, remote: ProcessId },
    Monitor { local: ProcessId, remote: ProcessId, mref: MonitorRef },
}

/// A connection's outbound sides, split so that control traffic (link/monitor/spawn signals)
/// cannot be held up behind a backlog of data frames on a slow peer, and each is bounded
/// independently per `NodeConfig` (spec §4.8).
struct ConnSenders {
    control: mpsc::Sender<Frame>,
    data: mpsc::Sender<Frame>,
}

enum ConnState {
    Open(ConnSenders),
    Failed,
}

/// Bookkeeping for one locally spawned process, shared between its `ProcessHandle`s and the node.
pub(crate) struct LocalEntry {
    pub mailbox: Arc<CQueue>,
    pub channels: Mutex<HashMap<u64, Arc<crate::channel::ChannelQueue>>>,
    pub channel_counter: Counter,
    pub monitor_counter: Counter,
    pub state: Mutex<ProcessState>,
}

/// The part of a process's bookkeeping the node needs to read when that process dies: who to
/// notify, and how (spec §3 "LocalProcess state").
#[derive(Default)]
pub(crate) struct ProcessState {
    pub links: HashSet<ProcessId>,
    pub monitors_from: HashMap<MonitorRef, ProcessId>,
}

struct NodeInner {
    id: NodeId,
    config: NodeConfig,
    remote_table: Arc<RemoteTable>,
    processes: RwLock<HashMap<u64, Arc<LocalEntry>>>,
    dead_registry: RwLock<HashMap<u64, DeathReason>>,
    next_index: Counter,
    connections: Mutex<HashMap<NodeId, ConnState>>,
    outbound_watches: Mutex<HashMap<NodeId, Vec<OutboundWatch>>>,
}

/// A handle to one running node. Cheap to clone; every clone refers to the same state.
#[derive(Clone)]
pub struct Node(Arc<NodeInner>);

impl Node {
    /// Boots a node: binds the configured address and starts its accept loop. `remote_table`
    /// should already carry every label the application registers; it is immutable from here on
    /// (spec §6, "RemoteTable interface... immutable after boot").
    pub async fn start(config: NodeConfig, remote_table: RemoteTable) -> std::io::Result<Self> {
        let listener = TcpTransport::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let inner = Arc::new(NodeInner {
            id: NodeId::new(local_addr),
            config,
            remote_table: Arc::new(remote_table),
            processes: RwLock::new(HashMap::new()),
            dead_registry: RwLock::new(HashMap::new()),
            next_index: Counter::new(),
            connections: Mutex::new(HashMap::new()),
            outbound_watches: Mutex::new(HashMap::new()),
        });
        tracing::info!(node = %inner.id, addr = %local_addr, "node listening");
        let accept_inner = inner.clone();
        tokio::spawn(async move { accept_inner.accept_loop(listener).await });
        Ok(Node(inner))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub(crate) fn remote_table(&self) -> &Arc<RemoteTable> {
        &self.0.remote_table
    }

    pub(crate) fn config(&self) -> &NodeConfig {
        &self.0.config
    }

    /// Spawns `root` as a new, unlinked local process.
    pub async fn spawn<F, Fut>(&self, root: F) -> ProcessHandle
    where
        F: FnOnce(ProcessHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let entry: ProcessEntry = Box::new(move |handle| Box::pin(root(handle)));
        let pid = self.0.allocate_pid();
        let local_entry = self.0.clone().spawn_with_pid(pid, entry).await;
        process::handle_for(self.clone(), pid, local_entry)
    }

    pub(crate) async fn local_entry(&self, pid: ProcessId) -> Option<Arc<LocalEntry>> {
        self.0.local_entry(pid).await
    }

    pub(crate) async fn new_channel_id(
        &self,
        owner: ProcessId,
        owner_entry: &Arc<LocalEntry>,
    ) -> (ChannelId, Arc<crate::channel::ChannelQueue>) {
        self.0.new_channel(owner, owner_entry).await
    }

    pub(crate) async fn route_data(&self, destination: Destination, message: Message) {
        self.0.route_data(destination, message).await
    }

    pub(crate) async fn send_value<T: Serialize + 'static>(&self, dest: ProcessId, value: T) {
        self.0.route_value(dest, value).await
    }

    pub(crate) async fn register_watch(&self, target: ProcessId, watcher: ProcessId, signal: Signal) -> Option<DeathReason> {
        self.0.register_watch(target, watcher, signal).await
    }

    pub(crate) async fn unregister_watch(&self, target: ProcessId, watcher: ProcessId, signal: Signal) {
        self.0.unregister_watch(target, watcher, signal).await
    }

    pub(crate) async fn request_spawn(&self, target: NodeId, closure: crate::closure::Closure, spawn_ref: crate::id::SpawnRef, requester: ProcessId) {
        self.0.request_spawn(target, closure, spawn_ref, requester).await
    }

    /// Forcibly marks the connection to `peer` as failed, synthesizing the same `Disconnected`
    /// link-exit/monitor notifications a genuine transport failure would (spec §4.4's connection
    /// failure handling, Invariant 4). Does not close the underlying socket, if one exists; it
    /// drops this node's outbound sender pair for `peer`, which ends that connection's writer task
    /// the next time it tries to hand off a frame.
    pub async fn disconnect(&self, peer: NodeId) {
        self.0.mark_failed(peer).await;
    }
}

impl NodeInner {
    fn allocate_pid(&self) -> ProcessId {
        ProcessId::new(self.id, self.next_index.next())
    }

    /// Registers `pid`'s bookkeeping and drives its root future to completion on a fresh task.
    /// Returns the shared [`LocalEntry`] so the caller can hand it straight to a `ProcessHandle`
    /// without a second lookup.
    async fn spawn_with_pid(self: Arc<Self>, pid: ProcessId, entry: ProcessEntry) -> Arc<LocalEntry> {
        let local_entry = Arc::new(LocalEntry {
            mailbox: Arc::new(CQueue::new()),
            channels: Mutex::new(HashMap::new()),
            channel_counter: Counter::new(),
            monitor_counter: Counter::new(),
            state: Mutex::new(ProcessState::default()),
        });
        self.processes.write().await.insert(pid.local_index(), local_entry.clone());
        tracing::debug!(%pid, "process spawned");
        let node = Node(self.clone());
        let handle = process::handle_for(node.clone(), pid, local_entry.clone());
        let catch_panics = self.config.catch_panics;
        tokio::spawn(async move {
            let reason = process::run_entry(entry, handle, catch_panics).await;
            node.0.finish_process(pid, reason).await;
        });
        local_entry
    }

    async fn finish_process(&self, pid: ProcessId, reason: DeathReason) {
        let entry = self.processes.write().await.remove(&pid.local_index());
        self.dead_registry
            .write()
            .await
            .insert(pid.local_index(), reason.clone());
        tracing::info!(%pid, ?reason, "process exited");
        let Some(entry) = entry else { return };
        let state = entry.state.lock().await;
        for watcher in state.links.iter().copied() {
            self.route_value(watcher, LinkExit(pid, reason.clone())).await;
        }
        for (&mref, &watcher) in state.monitors_from.iter() {
            self.route_value(watcher, MonitorNotification(mref, pid, reason.clone())).await;
        }
    }

    // ---- sending ----

    async fn route_value<T: Serialize + 'static>(&self, dest: ProcessId, value: T) {
        let Ok(message) = Message::encode(&value) else { return };
        self.route_data(Destination::Process(dest), message).await;
    }

    pub(crate) async fn route_data(&self, destination: Destination, message: Message) {
        let target_node = match &destination {
            Destination::Process(pid) => pid.node(),
            Destination::Channel(cid) => cid.owner().node(),
        };
        if target_node == self.id {
            self.deliver_local_data(destination, message).await;
            return;
        }
        self.send_remote(target_node, Frame::Data { destination, message }).await;
    }

    async fn deliver_local_data(&self, destination: Destination, message: Message) {
        match destination {
            Destination::Process(pid) => {
                if let Some(entry) = self.processes.read().await.get(&pid.local_index()) {
                    entry.mailbox.push(message).await;
                }
            }
            Destination::Channel(cid) => {
                if let Some(entry) = self.processes.read().await.get(&cid.owner().local_index()) {
                    if let Some(queue) = entry.channels.lock().await.get(&cid.local_index()) {
                        queue.push(message).await;
                    }
                }
            }
        }
    }

    async fn send_remote(&self, node: NodeId, frame: Frame) {
        match self.connection_for(node).await {
            Some(senders) => {
                let sender = match &frame {
                    Frame::Data { .. } => &senders.data,
                    Frame::Hello(_) | Frame::ControlToProcess { .. } | Frame::Spawn(_) => &senders.control,
                };
                if sender.send(frame).await.is_err() {
                    tracing::warn!(%node, "outbound queue closed after connection failure");
                }
            }
            None => {
                tracing::warn!(%node, "dropping frame: no connection and destination is unreachable");
            }
        }
    }

    async fn connection_for(self: &Arc<Self>, node: NodeId) -> Option<ConnSenders> {
        {
            let guard = self.connections.lock().await;
            match guard.get(&node) {
                Some(ConnState::Open(senders)) => {
                    return Some(ConnSenders {
                        control: senders.control.clone(),
                        data: senders.data.clone(),
                    })
                }
                Some(ConnState::Failed) => return None,
                None => {}
            }
        }
        match TcpTransport::connect(node.addr()).await {
            Ok(framed) => {
                let (mut sink, stream) = framed.split();
                if transport::send_frame(&mut sink, &Frame::Hello(self.id)).await.is_err() {
                    self.mark_failed(node).await;
                    return None;
                }
                Some(self.clone().adopt_connection(node, sink, stream).await)
            }
            Err(err) => {
                tracing::warn!(%node, %err, "failed to dial peer");
                self.mark_failed(node).await;
                None
            }
        }
    }

    async fn adopt_connection(
        self: Arc<Self>,
        node: NodeId,
        sink: SplitSink<transport::FramedConn, bytes::Bytes>,
        stream: SplitStream<transport::FramedConn>,
    ) -> ConnSenders {
        let (control_tx, control_rx) = mpsc::channel::<Frame>(self.config.control_channel_capacity.max(1));
        let (data_tx, data_rx) = mpsc::channel::<Frame>(self.config.data_channel_capacity.max(1));
        let senders = ConnSenders { control: control_tx, data: data_tx };
        self.connections.lock().await.insert(
            node,
            ConnState::Open(ConnSenders { control: senders.control.clone(), data: senders.data.clone() }),
        );
        let writer = self.clone();
        tokio::spawn(async move { writer.writer_loop(node, sink, control_rx, data_rx).await });
        let reader = self.clone();
        tokio::spawn(async move { reader.reader_loop(node, stream).await });
        senders
    }

    /// Drains control frames ahead of data frames (`biased`), so a backlog of data traffic never
    /// delays a link/monitor/spawn signal. The two receivers close together: both senders live
    /// only inside one `ConnSenders`, dropped as a pair when the connection is marked failed.
    async fn writer_loop(
        self: Arc<Self>,
        node: NodeId,
        mut sink: SplitSink<transport::FramedConn, bytes::Bytes>,
        mut control_rx: mpsc::Receiver<Frame>,
        mut data_rx: mpsc::Receiver<Frame>,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                frame = control_rx.recv() => frame,
                frame = data_rx.recv() => frame,
            };
            match frame {
                Some(frame) => {
                    if transport::send_frame(&mut sink, &frame).await.is_err() {
                        self.handle_connection_failure(node).await;
                        return;
                    }
                }
                None => return,
            }
        }
    }

    async fn reader_loop(self: Arc<Self>, node: NodeId, mut stream: SplitStream<transport::FramedConn>) {
        loop {
            match transport::recv_frame(&mut stream).await {
                Some(frame) => self.handle_inbound_frame(node, frame).await,
                None => {
                    self.handle_connection_failure(node).await;
                    return;
                }
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: tokio::net::TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    stream.set_nodelay(true).ok();
                    let framed = tokio_util::codec::Framed::new(stream, tokio_util::codec::LengthDelimitedCodec::new());
                    let inner = self.clone();
                    tokio::spawn(async move { inner.accept_connection(framed, peer_addr).await });
                }
                Err(err) => tracing::warn!(%err, "accept failed"),
            }
        }
    }

    async fn accept_connection(self: Arc<Self>, framed: transport::FramedConn, peer_addr: SocketAddr) {
        let (sink, mut stream) = framed.split();
        let Some(frame) = transport::recv_frame(&mut stream).await else {
            tracing::warn!(%peer_addr, "inbound connection closed before handshake");
            return;
        };
        let Frame::Hello(peer_node) = frame else {
            tracing::warn!(%peer_addr, "inbound connection did not open with Hello");
            return;
        };
        tracing::info!(%peer_node, %peer_addr, "accepted connection");
        self.adopt_connection(peer_node, sink, stream).await;
    }

    async fn mark_failed(&self, node: NodeId) {
        let already_failed = {
            let mut guard = self.connections.lock().await;
            let was_failed = matches!(guard.get(&node), Some(ConnState::Failed));
            guard.insert(node, ConnState::Failed);
            was_failed
        };
        if already_failed {
            return;
        }
        // The transport-level error this connection actually produced (spec §7: "TransportFailure:
        // a connection broke; converted by the NC into Disconnected death reasons"). Nothing calls
        // this process's root future with it — it is the NC's own accounting of what happened,
        // surfaced only through the `tracing::warn!` below and the Disconnected notifications that
        // follow.
        let transport_err = CoreError::TransportFailure(node);
        let watches = self.outbound_watches.lock().await.remove(&node).unwrap_or_default();
        tracing::warn!(
            %node,
            error = %transport_err,
            affected = watches.len(),
            "connection failed, synthesizing disconnect notifications"
        );
        for watch in watches {
            match watch {
                OutboundWatch::Link { local, remote } => {
                    self.route_value(local, LinkExit(remote, DeathReason::Disconnected)).await;
                }
                OutboundWatch::Monitor { local, remote, mref } => {
                    self.route_value(local, MonitorNotification(mref, remote, DeathReason::Disconnected))
                        .await;
                }
            }
        }
    }

    async fn handle_connection_failure(&self, node: NodeId) {
        self.mark_failed(node).await;
    }

    // ---- control: link / unlink / monitor / unmonitor ----

    /// Registers `watcher` against a (possibly remote) `target`. Returns the resolved death reason
    /// if `target` is already known dead, so the caller can synthesize the notification itself
    /// instead of waiting for one that will never come (spec §4.4: "if target already dead... emit
    /// immediately").
    pub(crate) async fn register_watch(&self, target: ProcessId, watcher: ProcessId, signal: Signal) -> Option<DeathReason> {
        if target.node() == self.id {
            self.register_watch_local(target, watcher, signal).await
        } else {
            match self.connections.lock().await.get(&target.node()) {
                Some(ConnState::Failed) => return Some(DeathReason::Unreachable),
                _ => {}
            }
            self.send_remote(target.node(), Frame::ControlToProcess { destination: target, msg: NcMsg::new(watcher, signal.clone()) }).await;
            let mut outbound = self.outbound_watches.lock().await;
            let entry = outbound.entry(target.node()).or_default();
            match signal {
                Signal::Link => entry.push(OutboundWatch::Link { local: watcher, remote: target }),
                Signal::Monitor(mref) => entry.push(OutboundWatch::Monitor { local: watcher, remote: target, mref }),
                _ => {}
            }
            None
        }
    }

    async fn register_watch_local(&self, target: ProcessId, watcher: ProcessId, signal: Signal) -> Option<DeathReason> {
        let entry = self.processes.read().await.get(&target.local_index()).cloned();
        match entry {
            Some(entry) => {
                let mut state = entry.state.lock().await;
                match signal {
                    Signal::Link => { state.links.insert(watcher); }
                    Signal::Monitor(mref) => { state.monitors_from.insert(mref, watcher); }
                    _ => {}
                }
                None
            }
            None => Some(
                self.dead_registry
                    .read()
                    .await
                    .get(&target.local_index())
                    .cloned()
                    .unwrap_or(DeathReason::Unreachable),
            ),
        }
    }

    pub(crate) async fn unregister_watch(&self, target: ProcessId, watcher: ProcessId, signal: Signal) {
        if target.node() == self.id {
            if let Some(entry) = self.processes.read().await.get(&target.local_index()) {
                let mut state = entry.state.lock().await;
                match signal {
                    Signal::Unlink => { state.links.remove(&watcher); }
                    Signal::Unmonitor(mref) => { state.monitors_from.remove(&mref); }
                    _ => {}
                }
            }
        } else {
            self.send_remote(target.node(), Frame::ControlToProcess { destination: target, msg: NcMsg::new(watcher, signal.clone()) }).await;
            if let Some(watches) = self.outbound_watches.lock().await.get_mut(&target.node()) {
                watches.retain(|w| match (w, &signal) {
                    (OutboundWatch::Link { remote, .. }, Signal::Unlink) => *remote != target,
                    (OutboundWatch::Monitor { mref, .. }, Signal::Unmonitor(removed)) => mref != removed,
                    _ => true,
                });
            }
        }
    }

    async fn handle_inbound_frame(self: &Arc<Self>, _from: NodeId, frame: Frame) {
        match frame {
            Frame::Hello(_) => {}
            Frame::Data { destination, message } => self.deliver_local_data(destination, message).await,
            Frame::ControlToProcess { destination, msg } => self.handle_inbound_control(destination, msg).await,
            Frame::Spawn(request) => self.handle_spawn(request).await,
        }
    }

    async fn handle_inbound_control(&self, destination: ProcessId, msg: NcMsg) {
        match msg.signal {
            Signal::Link => {
                if let Some(reason) = self.register_watch_local(destination, msg.sender, Signal::Link).await {
                    self.route_value(msg.sender, LinkExit(destination, reason)).await;
                }
            }
            Signal::Unlink => {
                self.unregister_watch(destination, msg.sender, Signal::Unlink).await;
            }
            Signal::Monitor(mref) => {
                if let Some(reason) = self
                    .register_watch_local(destination, msg.sender, Signal::Monitor(mref))
                    .await
                {
                    self.route_value(msg.sender, MonitorNotification(mref, destination, reason)).await;
                }
            }
            Signal::Unmonitor(mref) => {
                self.unregister_watch(destination, msg.sender, Signal::Unmonitor(mref)).await;
            }
        }
    }

    async fn handle_spawn(self: &Arc<Self>, request: SpawnRequest) {
        let pid = self.allocate_pid();
        match request.closure.resolve_entry(&self.remote_table) {
            Ok(entry) => {
                self.clone().spawn_with_pid(pid, entry).await;
            }
            Err(err) => {
                tracing::error!(%pid, %err, "spawn closure resolution failed");
                self.dead_registry
                    .write()
                    .await
                    .insert(pid.local_index(), DeathReason::Exception(err.to_string()));
            }
        }
        self.route_value(request.requester, DidSpawn(request.spawn_ref, pid)).await;
    }

    /// Requests that `closure` be spawned on `target`. Handled in-process (no network hop) when
    /// `target` is this node, same as `handle_spawn` would do after a round trip.
    async fn request_spawn(
        self: &Arc<Self>,
        target: NodeId,
        closure: crate::closure::Closure,
        spawn_ref: crate::id::SpawnRef,
        requester: ProcessId,
    ) {
        let request = SpawnRequest { closure, spawn_ref, requester };
        if target == self.id {
            self.handle_spawn(request).await;
        } else {
            self.send_remote(target, Frame::Spawn(request)).await;
        }
    }

    // ---- channels ----

    pub(crate) async fn new_channel(
        &self,
        owner: ProcessId,
        owner_entry: &Arc<LocalEntry>,
    ) -> (ChannelId, Arc<crate::channel::ChannelQueue>) {
        let index = owner_entry.channel_counter.next();
        let id = ChannelId::new(owner, index);
        let queue = Arc::new(crate::channel::ChannelQueue::new());
        owner_entry.channels.lock().await.insert(index, queue.clone());
        (id, queue)
    }

    pub(crate) async fn local_entry(&self, pid: ProcessId) -> Option<Arc<LocalEntry>> {
        self.processes.read().await.get(&pid.local_index()).cloned()
    }
}

