//! # Peer Registry
//!
//! Server-side table of live peers keyed by client id.
//!
//! ## Id Allocation
//! Ids are drawn uniformly from `[1, max]` (max `0xFFFF`). After 100
//! collisions the registry falls back to a descending linear scan, and only
//! when every id is taken does allocation fail with
//! [`ProtocolError::ResourceExhausted`]. Allocation and insertion happen under
//! one write lock, so two accepts can never receive the same id.
//!
//! ## Fan-out
//! Broadcast and relay send one pre-serialized buffer to many peers. Delivery
//! is best effort per recipient: a failing peer is logged and counted, and
//! the remaining peers still receive the buffer.

use crate::error::{ProtocolError, Result};
use crate::service::connection::Connection;
use crate::utils::metrics::global_metrics;
use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Random draws before falling back to a linear scan
pub const RANDOM_ID_ATTEMPTS: usize = 100;

/// Largest client id
pub const MAX_CLIENT_ID: u16 = u16::MAX;

#[derive(Debug)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<u16, Connection>>,
    max_id: u16,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::with_id_space(MAX_CLIENT_ID)
    }

    /// Registry handing out ids from `[1, max_id]`
    pub fn with_id_space(max_id: u16) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_id: max_id.max(1),
        }
    }

    /// Assign a free id to `connection` and start tracking it
    pub fn register(&self, connection: &Connection) -> Result<u16> {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let id = allocate_id(&peers, self.max_id)?;
        connection.set_id(id);
        peers.insert(id, connection.clone());
        debug!(peer_id = id, peers = peers.len(), "Registered peer");
        Ok(id)
    }

    /// Stop tracking `connection`; a newer peer reusing the id is left alone
    pub fn unregister(&self, connection: &Connection) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        match peers.get(&connection.id()) {
            Some(current) if current.same_session(connection) => {
                peers.remove(&connection.id());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: u16) -> Option<Connection> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the tracked connections
    pub fn connections(&self) -> Vec<Connection> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Queue one TCP frame to every open peer. Returns how many accepted it.
    pub fn broadcast_raw(&self, frame: &Bytes) -> usize {
        self.fan_out(None, |peer| peer.write_raw(frame.clone()))
    }

    /// Send one datagram to every open peer with a pinned endpoint
    pub fn broadcast_udp_raw(&self, datagram: &[u8]) -> usize {
        self.fan_out(None, |peer| {
            if peer.udp_endpoint().is_none() {
                return Ok(false);
            }
            peer.write_udp_raw(datagram).map(|_| true)
        })
    }

    /// Forward a passthrough frame, bytes unchanged, to every open peer but the sender
    pub fn relay_passthrough(&self, sender: u16, frame: &Bytes) -> usize {
        let delivered = self.fan_out(Some(sender), |peer| peer.write_raw(frame.clone()));
        if delivered > 0 {
            global_metrics().packet_relayed();
        }
        delivered
    }

    fn fan_out<F, T>(&self, exclude: Option<u16>, send: F) -> usize
    where
        F: Fn(&Connection) -> Result<T>,
        T: Into<Delivered>,
    {
        let mut delivered = 0;
        for peer in self.connections() {
            if Some(peer.id()) == exclude || !peer.is_open() {
                continue;
            }
            match send(&peer) {
                Ok(sent) => {
                    if sent.into().0 {
                        delivered += 1;
                    }
                }
                Err(e) => {
                    warn!(peer_id = peer.id(), error = %e, "Fan-out to peer failed");
                    global_metrics().broadcast_failure();
                }
            }
        }
        delivered
    }
}

/// Whether a fan-out send reached its peer
struct Delivered(bool);

impl From<()> for Delivered {
    fn from(_: ()) -> Self {
        Delivered(true)
    }
}

impl From<bool> for Delivered {
    fn from(sent: bool) -> Self {
        Delivered(sent)
    }
}

fn allocate_id(peers: &HashMap<u16, Connection>, max_id: u16) -> Result<u16> {
    let mut rng = rand::rng();
    for _ in 0..RANDOM_ID_ATTEMPTS {
        let id = rng.random_range(1..=max_id);
        if !peers.contains_key(&id) {
            return Ok(id);
        }
    }
    (1..=max_id)
        .rev()
        .find(|id| !peers.contains_key(id))
        .ok_or(ProtocolError::ResourceExhausted)
}
