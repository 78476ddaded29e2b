//! # Server
//!
//! Listens on one TCP port and one UDP port and turns every accepted TCP
//! stream into a server-side [`Connection`].
//!
//! ## Flow
//! ```text
//! accept ──▶ allocate id ──▶ register ──▶ attach TCP + shared UDP ──▶ Open
//!   │            │
//!   │            └─ id space full ──▶ ServerEvent::Dropped
//!   └─ UDP datagram ──▶ decode clientId ──▶ peer lookup ──▶ pin / admit ──▶ deliver
//! ```
//!
//! Every peer's token is a child of the server's root token, so
//! [`Server::destroy`] tears down every peer with it. Background tasks run
//! until the server is destroyed.

use crate::config::ServerConfig;
use crate::core::packet::{Frame, Packet};
use crate::core::value::Value;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::version::{ProtocolVersion, VersionRegistry};
use crate::service::connection::{Connection, Role};
use crate::service::events::EventQueue;
use crate::service::registry::PeerRegistry;
use crate::transport::tcp::serialize_tcp;
use crate::transport::udp::{decode_client_datagram, encode_server_datagram, MAX_DATAGRAM};
use crate::utils::metrics::global_metrics;
use crate::utils::resolve::{literal_addr, resolve};
use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Notifications from a server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer was accepted and is open
    Connection(Connection),
    /// A peer closed because of a fault
    ClientError {
        peer_id: u16,
        error: Arc<ProtocolError>,
    },
    /// A TCP stream was refused before becoming a peer
    Dropped {
        peer_addr: SocketAddr,
        error: Arc<ProtocolError>,
    },
    /// A listener-level fault
    Error(Arc<ProtocolError>),
    /// Terminal notification, sent exactly once
    Closed(Option<Arc<ProtocolError>>),
}

struct ServerInner {
    config: ServerConfig,
    version: Arc<ProtocolVersion>,
    registry: Arc<PeerRegistry>,
    dispatcher: Dispatcher,
    quiet: Arc<HashSet<String>>,
    token: CancellationToken,
    closing: AtomicBool,
    udp: Arc<UdpSocket>,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    events: EventQueue<ServerEvent>,
}

/// Handle to a running server. Clones refer to the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("tcp_addr", &self.inner.tcp_addr)
            .field("udp_addr", &self.inner.udp_addr)
            .field("version", &self.inner.version.id())
            .field("peers", &self.inner.registry.len())
            .finish()
    }
}

impl Server {
    /// Bind both listeners and start accepting peers
    #[instrument(skip_all, fields(version = config.version, tcp_port = config.tcp_port, udp_port = config.udp_port))]
    pub async fn bind(config: ServerConfig, versions: &VersionRegistry) -> Result<Self> {
        Self::bind_with_registry(config, versions, PeerRegistry::new()).await
    }

    /// Resolve `config.host` first, listening in the family it resolves to
    pub async fn bind_resolved(mut config: ServerConfig, versions: &VersionRegistry) -> Result<Self> {
        if let Some(host) = config.host.take() {
            let resolved = resolve(&host).await?;
            config.host = Some(resolved.addr.to_string());
            config.legacy_ip = resolved.family.is_legacy();
        }
        Self::bind(config, versions).await
    }

    pub(crate) async fn bind_with_registry(
        config: ServerConfig,
        versions: &VersionRegistry,
        registry: PeerRegistry,
    ) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ProtocolError::ConfigError(problems.join("; ")));
        }
        let version = versions.get(config.version)?;
        let ip = literal_addr(config.host.as_deref(), config.legacy_ip, true)?;

        let (listener, udp) = tokio::try_join!(
            TcpListener::bind((ip, config.tcp_port)),
            UdpSocket::bind((ip, config.udp_port)),
        )?;
        let tcp_addr = listener.local_addr()?;
        let udp_addr = udp.local_addr()?;

        let server = Self {
            inner: Arc::new(ServerInner {
                quiet: Arc::new(config.quiet_packets.iter().cloned().collect()),
                config,
                version,
                registry: Arc::new(registry),
                dispatcher: Dispatcher::new(),
                token: CancellationToken::new(),
                closing: AtomicBool::new(false),
                udp: Arc::new(udp),
                tcp_addr,
                udp_addr,
                events: EventQueue::new(),
            }),
        };

        tokio::spawn(accept_loop(server.clone(), listener));
        tokio::spawn(udp_loop(server.clone()));

        info!(%tcp_addr, %udp_addr, version = server.inner.version.id(), "Server listening");
        Ok(server)
    }

    pub fn local_tcp_addr(&self) -> SocketAddr {
        self.inner.tcp_addr
    }

    pub fn local_udp_addr(&self) -> SocketAddr {
        self.inner.udp_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn version(&self) -> &Arc<ProtocolVersion> {
        &self.inner.version
    }

    /// Live peers
    pub fn registry(&self) -> &PeerRegistry {
        &self.inner.registry
    }

    /// Root token; every peer token is a child of it
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Completes once the server has been destroyed
    pub async fn closed(&self) {
        self.inner.token.cancelled().await
    }

    /// Run `handler` for every packet named `name`, from any peer
    pub fn on<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(self.inner.version.packet_type(name)?, handler)
    }

    /// Run `handler` for the next packet named `name`, from any peer
    pub fn once<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: FnOnce(&Connection, &Packet) -> Result<()> + Send + 'static,
    {
        self.inner.dispatcher.once(self.inner.version.packet_type(name)?, handler)
    }

    /// Take the event stream. Only the first call gets it; until then only
    /// the most recent [`EVENT_BACKLOG`](crate::service::events::EVENT_BACKLOG)
    /// events are kept.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.inner.events.take()
    }

    /// Publish an event; ignored once [`ServerEvent::Closed`] has been sent
    fn emit(&self, event: ServerEvent) {
        self.inner.events.publish(event);
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Serialize once for [`Server::broadcast_raw`]
    pub fn serialize_packet(&self, name: &str, data: impl Into<Value>) -> Result<Bytes> {
        let packet = Packet::new(self.inner.version.packet_type(name)?, data.into());
        serialize_tcp(&self.inner.version, &packet)
    }

    /// Send a packet over TCP to every open peer. Returns how many were reached.
    pub fn broadcast(&self, name: &str, data: impl Into<Value>) -> Result<usize> {
        let frame = self.serialize_packet(name, data)?;
        Ok(self.broadcast_raw(&frame))
    }

    pub fn broadcast_raw(&self, frame: &Bytes) -> usize {
        self.inner.registry.broadcast_raw(frame)
    }

    /// Serialize once for [`Server::broadcast_udp_raw`]
    pub fn serialize_packet_udp(&self, name: &str, data: impl Into<Value>) -> Result<Bytes> {
        let packet = Packet::new(self.inner.version.packet_type(name)?, data.into());
        encode_server_datagram(&self.inner.version, &packet)
    }

    /// Send a packet over UDP to every open peer with a pinned endpoint
    pub fn broadcast_udp(&self, name: &str, data: impl Into<Value>) -> Result<usize> {
        let datagram = self.serialize_packet_udp(name, data)?;
        Ok(self.broadcast_udp_raw(&datagram))
    }

    pub fn broadcast_udp_raw(&self, datagram: &[u8]) -> usize {
        self.inner.registry.broadcast_udp_raw(datagram)
    }

    /// Broadcast `name` every `heartbeat_interval` until the server is destroyed
    pub fn heartbeat(&self, name: &str, data: impl Into<Value>) -> Result<()> {
        let frame = self.serialize_packet(name, data)?;
        let period = self.inner.config.heartbeat_interval;
        let token = self.inner.token.clone();
        let registry = self.inner.registry.clone();

        tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {
                        let reached = registry.broadcast_raw(&frame);
                        debug!(peers = reached, "Heartbeat");
                    }
                }
            }
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Stop listening and close every peer. Idempotent.
    pub fn destroy(&self, cause: Option<ProtocolError>) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let cause = cause.map(Arc::new);
        if let Some(err) = cause.as_ref().filter(|e| !e.is_disconnect()) {
            warn!(error = %err, "Server error");
            self.emit(ServerEvent::Error(err.clone()));
        }

        self.inner.token.cancel();
        let peers = self.inner.registry.connections();
        for peer in &peers {
            peer.close_with(None);
        }

        info!(peers = peers.len(), "Server closed");
        self.inner.events.finish(ServerEvent::Closed(cause));
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        let inner = &self.inner;
        let peer = Connection::new(
            Role::Server,
            inner.version.clone(),
            inner.token.child_token(),
            inner.quiet.clone(),
            Some(inner.dispatcher.clone()),
        );

        let id = match inner.registry.register(&peer) {
            Ok(id) => id,
            Err(e) => {
                warn!(%addr, error = %e, "Refusing connection");
                global_metrics().connection_dropped();
                peer.close_with(None);
                self.emit(ServerEvent::Dropped {
                    peer_addr: addr,
                    error: Arc::new(e),
                });
                return;
            }
        };

        peer.attach_server_udp(inner.udp.clone());
        let relay = inner.config.relay_passthrough.then(|| inner.registry.clone());
        peer.attach_tcp(stream, inner.config.timeout, move |conn, frame| {
            let Frame { packet, raw } = frame;
            let unhandled = packet.passthrough && !conn.has_handler(&packet.kind);
            conn.deliver("tcp", packet);
            if let (true, Some(registry)) = (unhandled, &relay) {
                registry.relay_passthrough(conn.id(), &raw);
            }
        });
        peer.mark_open();

        info!(peer_id = id, %addr, "Client connected");
        self.emit(ServerEvent::Connection(peer.clone()));
        tokio::spawn(watch_peer(self.clone(), peer));
    }
}

async fn accept_loop(server: Server, listener: TcpListener) {
    let token = server.token();
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => server.admit(stream, addr),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                server.emit(ServerEvent::Error(Arc::new(e.into())));
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn udp_loop(server: Server) {
    let token = server.token();
    let socket = server.inner.udp.clone();
    let version = server.inner.version.clone();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, source) = match received {
            Ok(received) => received,
            // ICMP unreachable from an earlier send
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                warn!(error = %e, "UDP receive failed");
                server.emit(ServerEvent::Error(Arc::new(e.into())));
                continue;
            }
        };

        let (client_id, packet) = match decode_client_datagram(&version, &buf[..n]) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(%source, bytes = n, error = %e, "Dropping undecodable datagram");
                global_metrics().datagram_dropped();
                continue;
            }
        };
        let admitted = server
            .inner
            .registry
            .get(client_id)
            .is_some_and(|peer| peer.receive_datagram(source, packet, n));
        if !admitted {
            debug!(%source, client_id, "Dropping datagram for unknown or mismatched peer");
            global_metrics().datagram_dropped();
        }
    }
    debug!("UDP loop stopped");
}

async fn watch_peer(server: Server, peer: Connection) {
    peer.closed().await;
    server.inner.registry.unregister(&peer);
    if server.is_closed() {
        return;
    }
    if let Some(error) = peer.close_cause().filter(|e| !e.is_disconnect()) {
        server.emit(ServerEvent::ClientError {
            peer_id: peer.id(),
            error,
        });
    }
    debug!(peer_id = peer.id(), peers = server.inner.registry.len(), "Peer removed");
}
