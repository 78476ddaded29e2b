//! # Sessions
//!
//! Peer sessions and the two endpoints that create them.
//!
//! ## Components
//! - **Connection**: one peer's TCP + UDP session and its lifecycle
//! - **Client**: concurrent TCP/UDP connect
//! - **Server**: listeners, accept and UDP receive loops, heartbeat
//! - **Registry**: client id allocation, broadcast and passthrough relay
//! - **Events**: bounded backlog in front of each event stream

pub mod client;
pub mod connection;
pub mod events;
pub mod registry;
pub mod server;

pub use client::{connect, connect_resolved, Client};
pub use connection::{Connection, ConnectionEvent, ConnectionState, Role};
pub use events::EVENT_BACKLOG;
pub use registry::PeerRegistry;
pub use server::{Server, ServerEvent};
