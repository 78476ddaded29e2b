//! # UDP Datagram Framing
//!
//! One datagram carries exactly one packet. The framing is asymmetric:
//!
//! ```text
//! client → server:  [udp_incoming { clientId, packet: { type, data } }]
//! server → client:  [0x00] [udp_outgoing { type, data }]
//! ```
//!
//! Clients drop server datagrams shorter than two bytes or with a non-zero
//! first byte. The server identifies the sender by `clientId` and pins the
//! first source endpoint it sees for that id; see [`UdpEndpoint`].

use crate::core::compiler::{UDP_INCOMING, UDP_OUTGOING};
use crate::core::packet::{Packet, FIELD_CLIENT_ID, FIELD_PACKET};
use crate::core::value::{Map, Value};
use crate::error::{ProtocolError, Result};
use crate::protocol::version::ProtocolVersion;
use crate::utils::metrics::global_metrics;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// First byte of every server → client datagram
pub const SERVER_DATAGRAM_HEADER: u8 = 0x00;

/// Smallest server datagram worth decoding: header plus one byte
pub const MIN_SERVER_DATAGRAM: usize = 2;

/// Largest datagram the receive loops read
pub const MAX_DATAGRAM: usize = 65_507;

/// Serialize a client → server datagram
pub fn encode_client_datagram(version: &ProtocolVersion, client_id: u16, packet: &Packet) -> Result<Bytes> {
    let mut map = Map::new();
    map.insert(FIELD_CLIENT_ID.into(), Value::from(client_id));
    map.insert(FIELD_PACKET.into(), packet.to_udp_value());
    let bytes = version.schema().encode_to_vec(&Value::Object(map), UDP_INCOMING)?;
    Ok(Bytes::from(bytes))
}

/// Parse a client → server datagram into the sender's id and packet
pub fn decode_client_datagram(version: &ProtocolVersion, datagram: &[u8]) -> Result<(u16, Packet)> {
    let (value, _) = version.schema().decode(datagram, 0, UDP_INCOMING)?;
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(ProtocolError::Decode(format!(
                "udp_incoming must decode to an object, got {}",
                other.kind()
            )))
        }
    };
    let client_id = map
        .get(FIELD_CLIENT_ID)
        .and_then(Value::as_i64)
        .and_then(|id| u16::try_from(id).ok())
        .ok_or_else(|| ProtocolError::Decode("udp_incoming without a valid clientId".into()))?;
    let packet = map
        .remove(FIELD_PACKET)
        .ok_or_else(|| ProtocolError::Decode("udp_incoming without packet".into()))?;
    Ok((client_id, Packet::from_value(packet, version.packet_types())?))
}

/// Serialize a server → client datagram
pub fn encode_server_datagram(version: &ProtocolVersion, packet: &Packet) -> Result<Bytes> {
    let value = packet.to_udp_value();
    let schema = version.schema();
    let size = schema.size_of(&value, UDP_OUTGOING)?;
    let mut buf = BytesMut::zeroed(1 + size);
    buf[0] = SERVER_DATAGRAM_HEADER;
    schema.encode(&value, &mut buf, 1, UDP_OUTGOING)?;
    Ok(buf.freeze())
}

/// Parse a server → client datagram.
///
/// Returns `Ok(None)` for datagrams the framing says to drop silently.
pub fn decode_server_datagram(version: &ProtocolVersion, datagram: &[u8]) -> Result<Option<Packet>> {
    if datagram.len() < MIN_SERVER_DATAGRAM || datagram[0] != SERVER_DATAGRAM_HEADER {
        trace!(bytes = datagram.len(), "Dropping datagram with bad header");
        return Ok(None);
    }
    let (value, _) = version.schema().decode(datagram, 1, UDP_OUTGOING)?;
    Packet::from_value(value, version.packet_types()).map(Some)
}

/// Outcome of offering a datagram source to a [`UdpEndpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First datagram: the source is now the peer's endpoint
    Pinned,
    /// Same address as the pinned endpoint
    Accepted,
    /// Different address; drop the datagram
    Rejected,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Remote UDP endpoint of one server-side peer.
///
/// Set at most once, by the first datagram carrying the peer's id, and
/// never reset while the peer lives. Later datagrams are matched on address
/// only: NAT may move the source port, so the port is not compared.
#[derive(Debug, Default)]
pub struct UdpEndpoint {
    pinned: OnceLock<SocketAddr>,
}

impl UdpEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pinned endpoint, if any datagram has arrived yet
    pub fn get(&self) -> Option<SocketAddr> {
        self.pinned.get().copied()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.get().is_some()
    }

    /// Pin `source` if nothing is pinned yet, otherwise compare addresses
    pub fn admit(&self, source: SocketAddr) -> Admission {
        let mut pinned_now = false;
        let pinned = self.pinned.get_or_init(|| {
            pinned_now = true;
            source
        });
        if pinned_now {
            debug!(endpoint = %source, "Pinned UDP endpoint");
            global_metrics().endpoint_pinned();
            Admission::Pinned
        } else if pinned.ip().to_canonical() == source.ip().to_canonical() {
            Admission::Accepted
        } else {
            trace!(pinned = %pinned, source = %source, "Rejected datagram from foreign address");
            Admission::Rejected
        }
    }
}
