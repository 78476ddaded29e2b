//! Shared helpers for the integration tests

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use td2d_protocol::core::{Packet, Value};
use td2d_protocol::protocol::{ProtocolVersion, VersionRegistry};

pub const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Versions 100, 101 and the 101 aliases from the fixture directory
pub fn versions() -> VersionRegistry {
    VersionRegistry::from_dir(FIXTURES).expect("fixture protocols should load")
}

pub fn version(id: u16) -> Arc<ProtocolVersion> {
    versions().get(id).expect("fixture version")
}

pub fn packet(version: &ProtocolVersion, name: &str, data: serde_json::Value) -> Packet {
    Packet::new(version.packet_type(name).unwrap(), Value::from(data))
}
