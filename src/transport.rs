//! The concrete transport (SPEC_FULL.md §4.7): a `tokio` TCP implementation of the abstract,
//! endpoint-addressed, reliable, ordered, per-connection interface the node controller consumes
//! (spec §6).
//!
//! Grounded on the reader-task-plus-channel shape in
//! `examples/other_examples/93eea3a6_..._client.rs.rs` (a task owns the read half of a connection
//! and forwards decoded frames into a channel; the write half is driven directly by callers), and
//! on the length-delimited-frame idiom used throughout the corpus's network code. Frames are
//! `bincode`-encoded [`Frame`] values inside a `tokio_util::codec::LengthDelimitedCodec` envelope.

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::CoreError;
use crate::id::{ChannelId, NodeId, ProcessId};
use crate::message::Message;
use crate::protocol::NcMsg;

/// Where a `Data` frame is routed once it reaches the destination node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Destination {
    Process(ProcessId),
    Channel(ChannelId),
}

/// A request to resolve and spawn a closure on the receiving node (spec §4.4 `Spawn` signal). Kept
/// out of [`Signal`](crate::protocol::Signal) itself because, unlike `Link`/`Monitor`, it does not
/// target an existing process — it targets the node as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SpawnRequest {
    pub closure: crate::closure::Closure,
    pub spawn_ref: crate::id::SpawnRef,
    pub requester: ProcessId,
}

/// One self-describing unit on the wire (spec §6, "Wire framing (produced)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Frame {
    /// First frame written on every freshly dialed socket, naming the dialer so the accepting
    /// side can reuse the same socket for its own sends back.
    Hello(NodeId),
    Data { destination: Destination, message: Message },
    ControlToProcess { destination: ProcessId, msg: NcMsg },
    Spawn(SpawnRequest),
}

pub(crate) type FramedConn = Framed<TcpStream, LengthDelimitedCodec>;

/// Thin namespace over the two things a node needs from the network: dialing out, and listening
/// for inbound connections. Not a trait: this crate ships exactly one transport, and the abstract
/// interface of spec §6 is documented here rather than encoded as a `dyn` boundary, since nothing
/// in this crate needs to swap it out at runtime.
pub struct TcpTransport;

impl TcpTransport {
    /// Dials `addr`, returning a framed connection ready to exchange [`Frame`]s.
    pub(crate) async fn connect(addr: std::net::SocketAddr) -> std::io::Result<FramedConn> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(Framed::new(stream, LengthDelimitedCodec::new()))
    }

    /// Binds a listener for inbound connections.
    pub(crate) async fn bind(addr: std::net::SocketAddr) -> std::io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }
}

fn encode_frame(frame: &Frame) -> Result<Bytes, CoreError> {
    Ok(Bytes::from(bincode::serialize(frame)?))
}

fn decode_frame(bytes: &[u8]) -> Result<Frame, CoreError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Sends one frame on any sink half of a framed connection (a whole [`FramedConn`] or its
/// `SplitSink`). The caller, not this function, knows which `NodeId` the connection was for; a
/// write failure here is turned into a `CoreError::TransportFailure` by the node controller's
/// `mark_failed`, once it decides the connection is actually down.
pub(crate) async fn send_frame<S>(sink: &mut S, frame: &Frame) -> std::io::Result<()>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    let bytes = encode_frame(frame).map_err(std::io::Error::other)?;
    sink.send(bytes).await
}

/// Reads the next frame off any stream half of a framed connection. `None` means the peer closed
/// cleanly (EOF), produced a read error, or sent bytes that failed to decode as a `Frame` —
/// every one of those is connection failure from the node controller's point of view (spec §4.7:
/// "a decode error that indicates desynchronization").
pub(crate) async fn recv_frame<S>(stream: &mut S) -> Option<Frame>
where
    S: Stream<Item = Result<BytesMut, std::io::Error>> + Unpin,
{
    match stream.next().await {
        None => None,
        Some(Ok(bytes)) => decode_frame(&bytes).ok(),
        Some(Err(_)) => None,
    }
}
