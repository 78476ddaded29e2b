//! # Packets
//!
//! Application-level view of what travels inside a frame.
//!
//! A [`Packet`] is `{ type, data, passthrough }`. The `type` is a
//! [`PacketType`] drawn from the closed set a protocol version declares
//! (the mapper behind the `type` field of its transport messages), so an
//! unknown type name is rejected before it reaches a socket.
//!
//! `passthrough` only exists on TCP. It marks packets the server may relay
//! verbatim to the other peers without understanding their payload.

use crate::core::compiler::{CompiledSchema, TCP_PACKET, UDP_INCOMING, UDP_OUTGOING};
use crate::core::types::TypeDescriptor;
use crate::core::value::{Map, Value};
use crate::error::{ProtocolError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Field names of the packet envelope
pub const FIELD_TYPE: &str = "type";
pub const FIELD_DATA: &str = "data";
pub const FIELD_PASSTHROUGH: &str = "passthrough";
pub const FIELD_CLIENT_ID: &str = "clientId";
pub const FIELD_PACKET: &str = "packet";

/// One member of a version's packet type set.
///
/// Cheap to clone and compare; only obtainable from [`PacketTypes`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketType(Arc<str>);

impl PacketType {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for PacketType {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for PacketType {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// Closed set of packet types declared by one protocol version
#[derive(Debug, Clone, Default)]
pub struct PacketTypes {
    by_name: HashMap<Arc<str>, PacketType>,
}

impl PacketTypes {
    /// Collect the names of every `type` mapper in the transport messages.
    pub fn from_schema(schema: &CompiledSchema) -> Result<Self> {
        let candidates = [
            schema.message(TCP_PACKET).and_then(|t| t.field(FIELD_TYPE)),
            schema.message(UDP_OUTGOING).and_then(|t| t.field(FIELD_TYPE)),
            schema
                .message(UDP_INCOMING)
                .and_then(|t| t.field(FIELD_PACKET))
                .and_then(|t| t.field(FIELD_TYPE)),
        ];

        let mut by_name = HashMap::new();
        for candidate in candidates.into_iter().flatten() {
            if let TypeDescriptor::Mapper(mapper) = candidate {
                for name in mapper.names() {
                    let name: Arc<str> = Arc::from(name);
                    by_name
                        .entry(name.clone())
                        .or_insert_with(|| PacketType(name));
                }
            }
        }
        if by_name.is_empty() {
            return Err(ProtocolError::Schema(
                "no packet type mapper found in transport messages".into(),
            ));
        }
        Ok(Self { by_name })
    }

    /// Look up a packet type by name
    pub fn get(&self, name: &str) -> Result<PacketType> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownPacketType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All packet types, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &PacketType> {
        let mut types: Vec<_> = self.by_name.values().collect();
        types.sort();
        types.into_iter()
    }
}

/// A decoded (or to-be-sent) application packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketType,
    pub data: Value,
    pub passthrough: bool,
}

impl Packet {
    pub fn new(kind: PacketType, data: Value) -> Self {
        Self {
            kind,
            data,
            passthrough: false,
        }
    }

    /// Packet flagged for opaque relay by the server
    pub fn relayed(kind: PacketType, data: Value) -> Self {
        Self {
            kind,
            data,
            passthrough: true,
        }
    }

    /// `{ passthrough, type, data }` as carried by `tcp_packet`
    pub fn to_tcp_value(&self) -> Value {
        let mut map = self.envelope();
        map.insert(FIELD_PASSTHROUGH.into(), Value::Bool(self.passthrough));
        Value::Object(map)
    }

    /// `{ type, data }` as carried inside UDP datagrams
    pub fn to_udp_value(&self) -> Value {
        Value::Object(self.envelope())
    }

    fn envelope(&self) -> Map {
        let mut map = Map::new();
        map.insert(FIELD_TYPE.into(), Value::String(self.kind.name().to_string()));
        map.insert(FIELD_DATA.into(), self.data.clone());
        map
    }

    /// Rebuild a packet from a decoded envelope.
    ///
    /// A missing `passthrough` field reads as `false`.
    pub fn from_value(value: Value, types: &PacketTypes) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ProtocolError::Decode(format!(
                    "packet envelope must be an object, got {}",
                    other.kind()
                )))
            }
        };
        let kind = match map.remove(FIELD_TYPE) {
            Some(Value::String(name)) => types.get(&name)?,
            Some(other) => return Err(ProtocolError::UnknownPacketType(other.to_string())),
            None => return Err(ProtocolError::Decode("packet without type".into())),
        };
        let passthrough = map
            .remove(FIELD_PASSTHROUGH)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let data = map.remove(FIELD_DATA).unwrap_or_default();
        Ok(Self {
            kind,
            data,
            passthrough,
        })
    }
}

/// A packet together with the exact bytes it arrived in
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub packet: Packet,
    /// Whole wire frame, header included, suitable for verbatim relay
    pub raw: Bytes,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::core::compiler::compile;
    use serde_json::json;

    fn types() -> PacketTypes {
        let def = json!({ "types": {
            "packet_kind": ["mapper", { "type": "u8", "mappings": { "0": "Ping", "1": "Chat" } }],
            "udp_kind": ["mapper", { "type": "u8", "mappings": { "0": "Ping", "7": "State" } }],
            "tcp_packet": ["container", [
                { "name": "passthrough", "type": "bool" },
                { "name": "type", "type": "packet_kind" },
                { "name": "data", "type": ["switch", { "compareTo": "type", "fields": {}, "default": "void" }] }
            ]],
            "udp_outgoing": ["container", [
                { "name": "type", "type": "udp_kind" },
                { "name": "data", "type": "void" }
            ]],
            "udp_incoming": ["container", [
                { "name": "clientId", "type": "u16" },
                { "name": "packet", "type": "udp_outgoing" }
            ]]
        } });
        PacketTypes::from_schema(&compile(&def).unwrap()).unwrap()
    }

    #[test]
    fn test_type_set_is_union_of_mappers() {
        let types = types();
        let names: Vec<_> = types.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["Chat", "Ping", "State"]);
        assert!(matches!(types.get("Nope"), Err(ProtocolError::UnknownPacketType(_))));
    }

    #[test]
    fn test_envelope_conversion() {
        let types = types();
        let packet = Packet::relayed(types.get("Chat").unwrap(), Value::from("hi"));
        let value = packet.to_tcp_value();
        assert_eq!(value.get("passthrough"), Some(&Value::Bool(true)));
        assert_eq!(Packet::from_value(value, &types).unwrap(), packet);

        let udp = Packet::new(types.get("State").unwrap(), Value::Null).to_udp_value();
        assert_eq!(udp.get("passthrough"), None);
        assert!(!Packet::from_value(udp, &types).unwrap().passthrough);
    }
}
