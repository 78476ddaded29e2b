//! # Connection
//!
//! One peer session spanning a TCP stream and a UDP channel.
//!
//! ## Lifecycle
//! ```text
//! Connecting ──(TCP + UDP up)──▶ Open ──(close / error / idle / destroy)──▶ Closed
//! ```
//! Server-side peers start `Open`. Every teardown path funnels through one
//! atomic "closing" flag, so a connection closes exactly once no matter how
//! many paths race: the first caller records the cause, cancels the token
//! (which stops every task and socket of the connection) and emits the single
//! [`ConnectionEvent::Closed`].
//!
//! ## Writes
//! Writes are synchronous and never block: TCP frames are queued to the
//! connection's writer task in order, UDP datagrams are sent immediately or
//! dropped if the socket buffer is full. Writes after close are silently
//! ignored. A write that needs a transport that is not up yet fails with
//! [`ProtocolError::NotReady`].

use crate::core::packet::{Frame, Packet, PacketType};
use crate::core::value::Value;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::version::ProtocolVersion;
use crate::service::events::EventQueue;
use crate::transport::tcp::{serialize_tcp, TcpFrameCodec};
use crate::transport::udp::{
    decode_server_datagram, encode_client_datagram, encode_server_datagram, UdpEndpoint, MAX_DATAGRAM,
};
use crate::utils::metrics::global_metrics;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closed => 2,
        }
    }
}

/// Which end of the protocol this connection speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Notifications from a connection, in the order they happened
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A decoded packet from either channel
    Packet(Packet),
    /// A fault worth reporting; ordinary disconnects never appear here
    Error(Arc<ProtocolError>),
    /// Terminal notification, sent exactly once, with the close cause
    Closed(Option<Arc<ProtocolError>>),
}

pub(crate) enum UdpLink {
    /// Socket connected to the server's UDP port
    Client(Arc<UdpSocket>),
    /// The server's shared socket plus this peer's pinned endpoint
    Server {
        socket: Arc<UdpSocket>,
        endpoint: UdpEndpoint,
    },
}

struct Inner {
    id: AtomicU16,
    role: Role,
    state: AtomicU8,
    closing: AtomicBool,
    token: CancellationToken,
    version: Arc<ProtocolVersion>,
    dispatcher: Dispatcher,
    shared_dispatcher: Option<Dispatcher>,
    quiet: Arc<HashSet<String>>,
    peer_addr: OnceLock<SocketAddr>,
    tcp_tx: OnceLock<mpsc::UnboundedSender<Bytes>>,
    udp: OnceLock<UdpLink>,
    cause: OnceLock<Option<Arc<ProtocolError>>>,
    events: EventQueue<ConnectionEvent>,
}

/// Handle to one peer session. Clones refer to the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("version", &self.inner.version.id())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        role: Role,
        version: Arc<ProtocolVersion>,
        token: CancellationToken,
        quiet: Arc<HashSet<String>>,
        shared_dispatcher: Option<Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: AtomicU16::new(0),
                role,
                state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
                closing: AtomicBool::new(false),
                token,
                version,
                dispatcher: Dispatcher::new(),
                shared_dispatcher,
                quiet,
                peer_addr: OnceLock::new(),
                tcp_tx: OnceLock::new(),
                udp: OnceLock::new(),
                cause: OnceLock::new(),
                events: EventQueue::new(),
            }),
        }
    }

    /// Client id; `0` until assigned
    pub fn id(&self) -> u16 {
        self.inner.id.load(Ordering::Acquire)
    }

    /// Set the client id. Clients learn theirs from an application packet.
    pub fn set_id(&self, id: u16) {
        self.inner.id.store(id, Ordering::Release);
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Whether both handles refer to the same session
    pub fn same_session(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn version(&self) -> &Arc<ProtocolVersion> {
        &self.inner.version
    }

    /// Remote TCP address, once connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr.get().copied()
    }

    /// Remote UDP endpoint: the server address for clients, the pinned
    /// source for server peers
    pub fn udp_endpoint(&self) -> Option<SocketAddr> {
        match self.inner.udp.get()? {
            UdpLink::Client(socket) => socket.peer_addr().ok(),
            UdpLink::Server { endpoint, .. } => endpoint.get(),
        }
    }

    /// The connection's cancellation token; cancelling it closes the connection
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Completes once the connection has started closing
    pub async fn closed(&self) {
        self.inner.token.cancelled().await
    }

    /// Cause recorded by the close, if closed with one
    pub fn close_cause(&self) -> Option<Arc<ProtocolError>> {
        self.inner.cause.get().cloned().flatten()
    }

    /// This connection's own handler registry
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Resolve a packet type name against the connection's version
    pub fn packet_type(&self, name: &str) -> Result<PacketType> {
        self.inner.version.packet_type(name)
    }

    /// Run `handler` for every packet named `name`
    pub fn on<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(self.packet_type(name)?, handler)
    }

    /// Run `handler` for the next packet named `name` only
    pub fn once<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: FnOnce(&Connection, &Packet) -> Result<()> + Send + 'static,
    {
        self.inner.dispatcher.once(self.packet_type(name)?, handler)
    }

    /// Whether a handler (own or server-wide) is registered for `kind`
    pub fn has_handler(&self, kind: &PacketType) -> bool {
        self.inner.dispatcher.has_handler(kind)
            || self
                .inner
                .shared_dispatcher
                .as_ref()
                .is_some_and(|d| d.has_handler(kind))
    }

    /// Take the event stream. Only the first call gets it.
    ///
    /// Until then only the most recent
    /// [`EVENT_BACKLOG`](crate::service::events::EVENT_BACKLOG) events are kept;
    /// handler-only users can leave it untaken.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.inner.events.take()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Send a packet over TCP
    pub fn write(&self, name: &str, data: impl Into<Value>) -> Result<()> {
        self.write_packet(&Packet::new(self.packet_type(name)?, data.into()))
    }

    /// Send a packet over TCP, flagged for relay to the other peers
    pub fn write_passthrough(&self, name: &str, data: impl Into<Value>) -> Result<()> {
        self.write_packet(&Packet::relayed(self.packet_type(name)?, data.into()))
    }

    pub fn write_packet(&self, packet: &Packet) -> Result<()> {
        if self.is_closing() {
            return Ok(());
        }
        let frame = serialize_tcp(&self.inner.version, packet)?;
        self.log_packet("write", "tcp", packet);
        self.write_raw(frame)
    }

    /// Queue an already serialized TCP frame
    pub fn write_raw(&self, frame: Bytes) -> Result<()> {
        if self.is_closing() {
            return Ok(());
        }
        let tx = self.inner.tcp_tx.get().ok_or(ProtocolError::NotReady)?;
        let len = frame.len() as u64;
        if tx.send(frame).is_err() {
            debug!(peer_id = self.id(), "{}", constants::ERR_WRITER_GONE);
            return Ok(());
        }
        global_metrics().packet_sent(len);
        Ok(())
    }

    /// Send a packet over UDP
    pub fn write_udp(&self, name: &str, data: impl Into<Value>) -> Result<()> {
        self.write_udp_packet(&Packet::new(self.packet_type(name)?, data.into()))
    }

    pub fn write_udp_packet(&self, packet: &Packet) -> Result<()> {
        if self.is_closing() {
            return Ok(());
        }
        let datagram = match self.inner.udp.get() {
            None => return Err(ProtocolError::NotReady),
            Some(UdpLink::Client(_)) => encode_client_datagram(&self.inner.version, self.id(), packet)?,
            Some(UdpLink::Server { endpoint, .. }) => {
                if !endpoint.is_pinned() {
                    return Err(ProtocolError::NotReady);
                }
                encode_server_datagram(&self.inner.version, packet)?
            }
        };
        self.log_packet("write", "udp", packet);
        self.write_udp_raw(&datagram)
    }

    /// Send an already serialized datagram
    pub fn write_udp_raw(&self, datagram: &[u8]) -> Result<()> {
        if self.is_closing() {
            return Ok(());
        }
        let sent = match self.inner.udp.get() {
            None => return Err(ProtocolError::NotReady),
            Some(UdpLink::Client(socket)) => socket.try_send(datagram),
            Some(UdpLink::Server { socket, endpoint }) => {
                let target = endpoint.get().ok_or(ProtocolError::NotReady)?;
                socket.try_send_to(datagram, target)
            }
        };
        match sent {
            Ok(n) => {
                global_metrics().packet_sent(n as u64);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(peer_id = self.id(), bytes = datagram.len(), "UDP send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Close the connection. Idempotent; only the first call has any effect.
    pub fn destroy(&self, cause: Option<ProtocolError>) {
        self.close_with(cause.map(Arc::new));
    }

    pub(crate) fn close_with(&self, cause: Option<Arc<ProtocolError>>) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let previous = self
            .inner
            .state
            .swap(ConnectionState::Closed.as_u8(), Ordering::AcqRel);
        let _ = self.inner.cause.set(cause.clone());

        if let Some(err) = &cause {
            self.report(err.clone());
        }
        self.inner.token.cancel();
        self.inner.dispatcher.clear();
        if ConnectionState::from_u8(previous) == ConnectionState::Open {
            global_metrics().connection_closed();
        }

        match &cause {
            Some(err) => info!(peer_id = self.id(), cause = %err, "Connection closed"),
            None => info!(peer_id = self.id(), "Connection closed"),
        }
        self.inner.events.finish(ConnectionEvent::Closed(cause));
    }

    /// Close after a transport failure; ordinary disconnects carry no cause
    pub(crate) fn fail(&self, err: ProtocolError) {
        if err.is_disconnect() {
            self.close_with(None);
        } else {
            self.close_with(Some(Arc::new(err)));
        }
    }

    /// Surface a fault on the event stream unless it is an ordinary disconnect
    pub(crate) fn report(&self, err: Arc<ProtocolError>) {
        if err.is_disconnect() {
            return;
        }
        warn!(peer_id = self.id(), error = %err, "Connection error");
        global_metrics().connection_error();
        self.inner.events.publish(ConnectionEvent::Error(err));
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    pub(crate) fn mark_open(&self) -> bool {
        let opened = self
            .inner
            .state
            .compare_exchange(
                ConnectionState::Connecting.as_u8(),
                ConnectionState::Open.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if opened {
            global_metrics().connection_opened();
        }
        opened
    }

    /// Run handlers for a decoded packet and publish it on the event stream
    pub(crate) fn deliver(&self, channel: &'static str, packet: Packet) {
        if self.is_closing() {
            return;
        }
        self.log_packet("read", channel, &packet);

        let mut result = self.inner.dispatcher.dispatch(self, &packet);
        if let Some(shared) = &self.inner.shared_dispatcher {
            let shared_result = shared.dispatch(self, &packet);
            if result.is_ok() {
                result = shared_result;
            }
        }
        if let Err(e) = result {
            self.report(Arc::new(e));
        }
        self.inner.events.publish(ConnectionEvent::Packet(packet));
    }

    /// Offer a datagram carrying this peer's id; `false` if it was dropped
    pub(crate) fn receive_datagram(&self, source: SocketAddr, packet: Packet, bytes: usize) -> bool {
        let Some(UdpLink::Server { endpoint, .. }) = self.inner.udp.get() else {
            return false;
        };
        if !endpoint.admit(source).is_accepted() {
            return false;
        }
        global_metrics().packet_received(bytes as u64);
        self.deliver("udp", packet);
        true
    }

    fn log_packet(&self, direction: &'static str, channel: &'static str, packet: &Packet) {
        if self.inner.quiet.contains(packet.kind.name()) {
            return;
        }
        debug!(
            peer_id = self.id(),
            direction,
            channel,
            packet = %packet.kind,
            data = %packet.data,
            "Packet"
        );
    }

    // -----------------------------------------------------------------------
    // Transport attachment
    // -----------------------------------------------------------------------

    /// Start the TCP reader and writer tasks.
    ///
    /// `on_frame` runs on the reader task for every decoded frame.
    pub(crate) fn attach_tcp<F>(&self, stream: TcpStream, idle_timeout: Duration, on_frame: F)
    where
        F: Fn(&Connection, Frame) + Send + 'static,
    {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        if let Ok(addr) = stream.peer_addr() {
            let _ = self.inner.peer_addr.set(addr);
        }
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.tcp_tx.set(tx).is_err() {
            warn!(peer_id = self.id(), "TCP transport attached twice");
            return;
        }
        tokio::spawn(write_loop(self.clone(), write_half, rx));
        tokio::spawn(read_loop(self.clone(), read_half, idle_timeout, on_frame));
    }

    /// Use a socket already connected to the server's UDP port
    pub(crate) fn attach_client_udp(&self, socket: UdpSocket) {
        let socket = Arc::new(socket);
        if self.inner.udp.set(UdpLink::Client(socket.clone())).is_err() {
            warn!(peer_id = self.id(), "UDP transport attached twice");
            return;
        }
        tokio::spawn(client_udp_loop(self.clone(), socket));
    }

    /// Share the server's UDP socket; the endpoint is pinned by the first datagram
    pub(crate) fn attach_server_udp(&self, socket: Arc<UdpSocket>) {
        let link = UdpLink::Server {
            socket,
            endpoint: UdpEndpoint::new(),
        };
        if self.inner.udp.set(link).is_err() {
            warn!(peer_id = self.id(), "UDP transport attached twice");
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(version: Arc<ProtocolVersion>, role: Role) -> Self {
        Self::new(role, version, CancellationToken::new(), Arc::default(), None)
    }

    /// Open connection whose TCP frames land in the returned receiver
    #[cfg(test)]
    pub(crate) fn with_test_writer(
        version: Arc<ProtocolVersion>,
        id: u16,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let connection = Self::detached(version, Role::Server);
        connection.set_id(id);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = connection.inner.tcp_tx.set(tx);
        connection.mark_open();
        (connection, rx)
    }
}

async fn write_loop(
    connection: Connection,
    write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let token = connection.token();
    let mut sink = FramedWrite::new(write_half, TcpFrameCodec::new(connection.version().clone()));
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        connection.fail(e);
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = sink.get_mut().shutdown().await;
}

async fn read_loop<F>(connection: Connection, read_half: OwnedReadHalf, idle_timeout: Duration, on_frame: F)
where
    F: Fn(&Connection, Frame) + Send + 'static,
{
    let token = connection.token();
    let mut frames = FramedRead::new(read_half, TcpFrameCodec::new(connection.version().clone()));
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                connection.close_with(None);
                return;
            }
            next = tokio::time::timeout(idle_timeout, frames.next()) => next,
        };
        match next {
            Ok(Some(Ok(frame))) => on_frame(&connection, frame),
            Ok(Some(Err(e))) => {
                connection.fail(e);
                return;
            }
            Ok(None) => {
                debug!(peer_id = connection.id(), "TCP stream ended");
                connection.close_with(None);
                return;
            }
            Err(_) => {
                connection.close_with(Some(Arc::new(ProtocolError::TimedOut)));
                return;
            }
        }
    }
}

async fn client_udp_loop(connection: Connection, socket: Arc<UdpSocket>) {
    let token = connection.token();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => return,
            received = socket.recv(&mut buf) => received,
        };
        let n = match received {
            Ok(n) => n,
            // Connected UDP sockets report ICMP port-unreachable this way
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!(error = %e, "UDP peer unreachable");
                continue;
            }
            Err(e) => {
                connection.fail(e.into());
                return;
            }
        };
        match decode_server_datagram(connection.version(), &buf[..n]) {
            Ok(Some(packet)) => {
                global_metrics().packet_received(n as u64);
                connection.deliver("udp", packet);
            }
            Ok(None) => global_metrics().datagram_dropped(),
            Err(e) => {
                debug!(error = %e, bytes = n, "Dropping undecodable datagram");
                global_metrics().datagram_dropped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::protocol::version::VersionRegistry;
    use serde_json::json;

    fn version() -> Arc<ProtocolVersion> {
        let def = json!({ "types": {
            "kind": ["mapper", { "type": "u8", "mappings": { "0": "Ping", "1": "Chat" } }],
            "tcp_packet": ["container", [
                { "name": "passthrough", "type": "bool" },
                { "name": "type", "type": "kind" },
                { "name": "data", "type": ["switch", { "compareTo": "type",
                    "fields": { "Chat": ["pstring", { "countType": "u8" }] }, "default": "void" }] }
            ]],
            "udp_outgoing": ["container", [
                { "name": "type", "type": "kind" },
                { "name": "data", "type": "void" }
            ]],
            "udp_incoming": ["container", [
                { "name": "clientId", "type": "u16" },
                { "name": "packet", "type": "udp_outgoing" }
            ]]
        } });
        VersionRegistry::builder()
            .register(101, &def, &json!({}))
            .unwrap()
            .build()
            .get(101)
            .unwrap()
    }

    #[test]
    fn test_destroy_is_idempotent_with_single_close_event() {
        let conn = Connection::detached(version(), Role::Client);
        let mut events = conn.take_events().unwrap();
        assert!(conn.take_events().is_none());

        conn.destroy(Some(ProtocolError::TimedOut));
        conn.destroy(Some(ProtocolError::TransportError("second".into())));
        conn.destroy(None);

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.token().is_cancelled());
        assert!(matches!(conn.close_cause().as_deref(), Some(ProtocolError::TimedOut)));

        assert!(matches!(events.try_recv(), Ok(ConnectionEvent::Error(_))));
        assert!(matches!(events.try_recv(), Ok(ConnectionEvent::Closed(Some(_)))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_cancelled_cause_is_not_reported() {
        let conn = Connection::detached(version(), Role::Client);
        let mut events = conn.take_events().unwrap();
        conn.destroy(Some(ProtocolError::Cancelled));
        assert!(matches!(events.try_recv(), Ok(ConnectionEvent::Closed(Some(_)))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_writes_before_transport_are_not_ready() {
        let conn = Connection::detached(version(), Role::Client);
        assert!(matches!(conn.write("Ping", Value::Null), Err(ProtocolError::NotReady)));
        assert!(matches!(conn.write_udp("Ping", Value::Null), Err(ProtocolError::NotReady)));
        assert!(matches!(
            conn.write("Nope", Value::Null),
            Err(ProtocolError::UnknownPacketType(_))
        ));
    }

    #[test]
    fn test_writes_after_close_are_ignored() {
        let (conn, mut rx) = Connection::with_test_writer(version(), 3);
        conn.write("Chat", "hello").unwrap();
        assert_eq!(rx.try_recv().unwrap().as_ref(), &[8, 0, 1, 5, b'h', b'e', b'l', b'l', b'o'][..]);

        conn.destroy(None);
        conn.write("Chat", "late").unwrap();
        conn.write_udp("Ping", Value::Null).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_oversized_write_is_encode_error() {
        let (conn, mut rx) = Connection::with_test_writer(version(), 3);
        let long = "x".repeat(254);
        assert!(matches!(conn.write("Chat", long.as_str()), Err(ProtocolError::Encode(_))));
        assert!(rx.try_recv().is_err());
        let fits = "x".repeat(252);
        conn.write("Chat", fits.as_str()).unwrap();
        assert_eq!(rx.try_recv().unwrap().len(), 1 + 255);
    }

    #[test]
    fn test_delivery_runs_handlers_then_publishes() {
        let conn = Connection::detached(version(), Role::Client);
        let mut events = conn.take_events().unwrap();
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        conn.on("Chat", move |_, packet| {
            seen_tx.send(packet.data.clone()).unwrap();
            Ok(())
        })
        .unwrap();

        let chat = conn.packet_type("Chat").unwrap();
        conn.deliver("tcp", Packet::new(chat.clone(), Value::from("hi")));
        assert_eq!(seen_rx.try_recv().unwrap(), Value::from("hi"));
        assert!(matches!(events.try_recv(), Ok(ConnectionEvent::Packet(p)) if p.kind == chat));
    }

    #[test]
    fn test_untaken_events_stay_bounded() {
        let conn = Connection::detached(version(), Role::Client);
        let handled = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = handled.clone();
        conn.on("Ping", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let ping = conn.packet_type("Ping").unwrap();
        for _ in 0..10_000 {
            conn.deliver("tcp", Packet::new(ping.clone(), Value::Null));
        }
        assert_eq!(handled.load(Ordering::SeqCst), 10_000);

        let mut events = conn.take_events().unwrap();
        let mut backlog = 0;
        while events.try_recv().is_ok() {
            backlog += 1;
        }
        assert_eq!(backlog, crate::service::events::EVENT_BACKLOG);

        conn.destroy(None);
        assert!(matches!(events.try_recv(), Ok(ConnectionEvent::Closed(None))));
    }
}
