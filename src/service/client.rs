//! # Client
//!
//! Opens the TCP stream and the UDP socket to a server concurrently. The
//! connection is `Open` once both are up; if either fails the other attempt
//! is dropped and the connection closes with that failure as its cause.
//!
//! ```rust,no_run
//! use td2d_protocol::config::ClientConfig;
//! use td2d_protocol::protocol::VersionRegistry;
//! use td2d_protocol::service::Client;
//!
//! # async fn run() -> td2d_protocol::error::Result<()> {
//! let versions = VersionRegistry::from_dir("protocols")?;
//! let client = Client::new(ClientConfig::default(), &versions)?;
//! client.connection().on("ServerHeartbeat", |_, _| Ok(()))?;
//! let connection = client.connect().await?;
//! connection.write("ClientIdentity", td2d_protocol::core::Value::Null)?;
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::version::VersionRegistry;
use crate::service::connection::{Connection, Role};
use crate::utils::resolve::{literal_addr, resolve};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// A client connection that has not connected yet.
///
/// Handlers registered and events taken on [`Client::connection`] before
/// [`Client::connect`] see every packet from the first one on.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    connection: Connection,
}

impl Client {
    pub fn new(config: ClientConfig, versions: &VersionRegistry) -> Result<Self> {
        let version = versions.get(config.version)?;
        let quiet = Arc::new(config.quiet_packets.iter().cloned().collect());
        let connection = Connection::new(Role::Client, version, CancellationToken::new(), quiet, None);
        Ok(Self { config, connection })
    }

    /// The connection, still `Connecting`
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect both channels.
    ///
    /// Cancelling the connection's token aborts the attempt with
    /// [`ProtocolError::Cancelled`].
    #[instrument(skip_all, fields(version = self.config.version, tcp_port = self.config.tcp_port, udp_port = self.config.udp_port))]
    pub async fn connect(self) -> Result<Connection> {
        let Client { config, connection } = self;
        match open_channels(&config, &connection).await {
            Ok((stream, socket)) => {
                connection.attach_tcp(stream, config.timeout, |conn, frame| conn.deliver("tcp", frame.packet));
                connection.attach_client_udp(socket);
                if !connection.mark_open() {
                    return Err(ProtocolError::Cancelled);
                }
                info!(peer = ?connection.peer_addr(), "Connected");
                Ok(connection)
            }
            Err(e) => {
                warn!(error = %e, "Connect failed");
                connection.close_with(Some(Arc::new(e.replicate())));
                Err(e)
            }
        }
    }
}

async fn open_channels(config: &ClientConfig, connection: &Connection) -> Result<(TcpStream, UdpSocket)> {
    let ip = literal_addr(config.host.as_deref(), config.legacy_ip, false)?;
    let tcp_addr = SocketAddr::new(ip, config.tcp_port);
    let udp_addr = SocketAddr::new(ip, config.udp_port);

    let token = connection.token();
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ProtocolError::Cancelled),
        opened = async { tokio::try_join!(connect_tcp(tcp_addr, config.timeout), connect_udp(udp_addr)) } => opened,
    }
}

async fn connect_tcp(addr: SocketAddr, limit: Duration) -> Result<TcpStream> {
    tokio::time::timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::TimedOut)?
        .map_err(ProtocolError::from)
}

async fn connect_udp(remote: SocketAddr) -> Result<UdpSocket> {
    let local = match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;
    Ok(socket)
}

/// Connect without registering anything first
pub async fn connect(config: ClientConfig, versions: &VersionRegistry) -> Result<Connection> {
    Client::new(config, versions)?.connect().await
}

/// Resolve `config.host` first and connect in the family it resolves to
pub async fn connect_resolved(mut config: ClientConfig, versions: &VersionRegistry) -> Result<Connection> {
    if let Some(host) = config.host.take() {
        let resolved = resolve(&host).await?;
        config.host = Some(resolved.addr.to_string());
        config.legacy_ip = resolved.family.is_legacy();
    }
    connect(config, versions).await
}
