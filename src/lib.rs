//! # td2d-protocol
//!
//! Dual-channel game networking: every session pairs an ordered TCP stream
//! with a lossy UDP channel, and every packet is described by a per-version
//! ProtoDef-style JSON schema compiled at startup.
//!
//! ## Layers
//! - [`core`]: schema compiler, binary codec, dynamic values, packets
//! - [`protocol`]: version registry, enum tables, handler dispatch
//! - [`transport`]: TCP frame codec and UDP datagram framing
//! - [`service`]: connections, client connect, server, peer registry
//! - [`utils`]: game timers, host resolution, logging, metrics
//!
//! ## Example
//! ```rust,no_run
//! use td2d_protocol::config::ServerConfig;
//! use td2d_protocol::protocol::VersionRegistry;
//! use td2d_protocol::service::{Server, ServerEvent};
//!
//! # async fn run() -> td2d_protocol::error::Result<()> {
//! let versions = VersionRegistry::from_dir("protocols")?;
//! let server = Server::bind(ServerConfig::default(), &versions).await?;
//! server.heartbeat("ServerHeartbeat", td2d_protocol::core::Value::Null)?;
//!
//! let mut events = server.take_events().expect("first call");
//! while let Some(event) = events.recv().await {
//!     if let ServerEvent::Connection(peer) = event {
//!         peer.write("ServerStatus", serde_json::json!({ "clientId": peer.id(), "isLobby": true }))?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::{Packet, PacketType, Value};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{ProtocolVersion, VersionRegistry};
pub use crate::service::{connect, Client, Connection, ConnectionEvent, Server, ServerEvent};
