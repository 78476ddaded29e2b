//! # Version Registry
//!
//! Immutable table from protocol version id to everything needed to speak
//! that version: compiled schema, enum tables, packet type set and TCP
//! framing.
//!
//! The registry is built once at startup and shared by `Arc`; nothing in it
//! changes afterwards, so readers never lock.
//!
//! ## Loading
//! ```text
//! <dir>/100/protocol.json
//! <dir>/100/enums.json        (optional)
//! <dir>/100/limits.json       (optional, object of named game limits)
//! <dir>/101/protocol.json
//! <dir>/101/kickreasons.json  (optional, list like an enum table)
//! <dir>/aliases.json          (optional, e.g. { "1013": 101 })
//! ```
//! Several ids may share one definition; see [`VersionRegistryBuilder::alias`].
//! An alias is a full copy of its target: schema, enums, limits, kick
//! reasons and TCP framing.

use crate::core::compiler::{compile, CompiledSchema};
use crate::core::packet::{PacketType, PacketTypes};
use crate::error::{ProtocolError, Result};
use crate::protocol::enums::{EnumSet, EnumTable};
use crate::utils::metrics::Timer;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The one version whose TCP frames carry a magic prefix
pub const LEGACY_PROTOCOL_VERSION: u16 = 100;

/// TCP frame magic of the legacy version
pub const MAGIC: &[u8] = b"hPKT\0";

/// Framing every version gets unless registered otherwise
pub fn default_magic(id: u16) -> Option<&'static [u8]> {
    (id == LEGACY_PROTOCOL_VERSION).then_some(MAGIC)
}

/// Everything needed to speak one protocol version
#[derive(Debug, Clone)]
pub struct ProtocolVersion {
    id: u16,
    schema: CompiledSchema,
    enums: EnumSet,
    packet_types: PacketTypes,
    magic: Option<&'static [u8]>,
    limits: Json,
    kick_reasons: Option<EnumTable>,
}

impl ProtocolVersion {
    /// Compile a version from its protocol and enum definitions
    pub fn compile(id: u16, protocol: &Json, enums: &Json, magic: Option<&'static [u8]>) -> Result<Self> {
        let _timer = Timer::start("compile_protocol_version");
        let schema = compile(protocol).map_err(|e| match e {
            ProtocolError::Schema(m) => ProtocolError::Schema(format!("version {id}: {m}")),
            other => other,
        })?;
        let packet_types = PacketTypes::from_schema(&schema)?;
        let enums = EnumSet::from_json(enums)?;
        debug!(
            version = id,
            packet_types = packet_types.len(),
            enums = enums.len(),
            "Compiled protocol version"
        );
        Ok(Self {
            id,
            schema,
            enums,
            packet_types,
            magic,
            limits: Json::Object(Default::default()),
            kick_reasons: None,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    pub fn enums(&self) -> &EnumSet {
        &self.enums
    }

    pub fn packet_types(&self) -> &PacketTypes {
        &self.packet_types
    }

    /// Resolve a packet type name against this version's closed set
    pub fn packet_type(&self, name: &str) -> Result<PacketType> {
        self.packet_types.get(name)
    }

    /// Game limits shipped with the version; an empty object if none
    pub fn limits(&self) -> &Json {
        &self.limits
    }

    /// Integer limit `name`, if present
    pub fn limit(&self, name: &str) -> Option<i64> {
        self.limits.get(name).and_then(Json::as_i64)
    }

    /// Kick reason table, for versions that define one
    pub fn kick_reasons(&self) -> Option<&EnumTable> {
        self.kick_reasons.as_ref()
    }

    /// TCP frame magic, if this version uses one
    pub fn magic(&self) -> Option<&'static [u8]> {
        self.magic
    }

    /// Bytes in front of every TCP payload: magic plus the length byte
    pub fn frame_header_len(&self) -> usize {
        self.magic.map_or(0, <[u8]>::len) + 1
    }

    fn with_id(&self, id: u16) -> Self {
        Self { id, ..self.clone() }
    }
}

/// Immutable, cheaply cloneable map of protocol versions
#[derive(Debug, Clone, Default)]
pub struct VersionRegistry {
    versions: Arc<HashMap<u16, Arc<ProtocolVersion>>>,
}

impl VersionRegistry {
    pub fn builder() -> VersionRegistryBuilder {
        VersionRegistryBuilder::default()
    }

    /// Load every `<dir>/<id>/protocol.json` below `dir` with its optional
    /// data files, then the optional `<dir>/aliases.json`
    /// (`{ "<alias id>": <target id> }`)
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut builder = Self::builder();
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|s| s.parse::<u16>().ok()) else {
                continue;
            };
            let protocol_path = entry.path().join("protocol.json");
            if !protocol_path.exists() {
                warn!(path = %entry.path().display(), "Version directory without protocol.json");
                continue;
            }
            let protocol = read_json(&protocol_path)?;
            let enums = read_optional_json(&entry.path().join("enums.json"))?
                .unwrap_or_else(|| Json::Object(Default::default()));
            builder = builder.register(id, &protocol, &enums)?;
            if let Some(limits) = read_optional_json(&entry.path().join("limits.json"))? {
                builder = builder.limits(id, limits)?;
            }
            if let Some(reasons) = read_optional_json(&entry.path().join("kickreasons.json"))? {
                builder = builder.kick_reasons(id, &reasons)?;
            }
        }

        if let Some(aliases) = read_optional_json(&dir.join("aliases.json"))? {
            let aliases: HashMap<u16, u16> = serde_json::from_value(aliases)?;
            let mut aliases: Vec<_> = aliases.into_iter().collect();
            aliases.sort_unstable();
            for (id, target) in aliases {
                builder = builder.alias(id, target)?;
            }
        }

        let registry = builder.build();
        info!(path = %dir.display(), versions = registry.len(), "Loaded protocol versions");
        Ok(registry)
    }

    /// Version `id`, or [`ProtocolError::UnsupportedVersion`]
    pub fn get(&self, id: u16) -> Result<Arc<ProtocolVersion>> {
        self.versions
            .get(&id)
            .cloned()
            .ok_or(ProtocolError::UnsupportedVersion(id))
    }

    pub fn contains(&self, id: u16) -> bool {
        self.versions.contains_key(&id)
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<_> = self.versions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Startup-time builder; the only way to populate a [`VersionRegistry`]
#[derive(Debug, Default)]
pub struct VersionRegistryBuilder {
    versions: HashMap<u16, Arc<ProtocolVersion>>,
}

impl VersionRegistryBuilder {
    /// Register a version with the default framing for its id
    pub fn register(self, id: u16, protocol: &Json, enums: &Json) -> Result<Self> {
        self.register_with_framing(id, protocol, enums, default_magic(id))
    }

    /// Register a version with explicit TCP framing
    pub fn register_with_framing(
        mut self,
        id: u16,
        protocol: &Json,
        enums: &Json,
        magic: Option<&'static [u8]>,
    ) -> Result<Self> {
        let version = ProtocolVersion::compile(id, protocol, enums, magic)?;
        self.versions.insert(id, Arc::new(version));
        Ok(self)
    }

    /// Attach the game limits object to the registered version `id`
    pub fn limits(mut self, id: u16, limits: Json) -> Result<Self> {
        if !limits.is_object() {
            return Err(ProtocolError::Schema(format!("version {id}: limits must be an object")));
        }
        Arc::make_mut(self.registered(id)?).limits = limits;
        Ok(self)
    }

    /// Attach the kick reason list to the registered version `id`
    pub fn kick_reasons(mut self, id: u16, reasons: &Json) -> Result<Self> {
        let table = EnumTable::from_json("kickreasons", reasons).map_err(|e| match e {
            ProtocolError::Schema(m) => ProtocolError::Schema(format!("version {id}: {m}")),
            other => other,
        })?;
        Arc::make_mut(self.registered(id)?).kick_reasons = Some(table);
        Ok(self)
    }

    fn registered(&mut self, id: u16) -> Result<&mut Arc<ProtocolVersion>> {
        self.versions.get_mut(&id).ok_or(ProtocolError::UnsupportedVersion(id))
    }

    /// Make `id` speak the same definitions as the registered `target`
    pub fn alias(mut self, id: u16, target: u16) -> Result<Self> {
        let version = self
            .versions
            .get(&target)
            .ok_or(ProtocolError::UnsupportedVersion(target))?
            .with_id(id);
        self.versions.insert(id, Arc::new(version));
        Ok(self)
    }

    pub fn build(self) -> VersionRegistry {
        VersionRegistry {
            versions: Arc::new(self.versions),
        }
    }
}

fn read_json(path: &Path) -> Result<Json> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

fn read_optional_json(path: &Path) -> Result<Option<Json>> {
    if path.exists() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn definition() -> Json {
        json!({ "types": {
            "kind": ["mapper", { "type": "u8", "mappings": { "0": "Ping" } }],
            "tcp_packet": ["container", [
                { "name": "passthrough", "type": "bool" },
                { "name": "type", "type": "kind" },
                { "name": "data", "type": "void" }
            ]],
            "udp_outgoing": ["container", [
                { "name": "type", "type": "kind" },
                { "name": "data", "type": "void" }
            ]],
            "udp_incoming": ["container", [
                { "name": "clientId", "type": "u16" },
                { "name": "packet", "type": "udp_outgoing" }
            ]]
        } })
    }

    #[test]
    fn test_magic_only_for_legacy_version() {
        let registry = VersionRegistry::builder()
            .register(100, &definition(), &json!({}))
            .unwrap()
            .register(101, &definition(), &json!({}))
            .unwrap()
            .build();
        assert_eq!(registry.get(100).unwrap().magic(), Some(MAGIC));
        assert_eq!(registry.get(100).unwrap().frame_header_len(), 6);
        assert_eq!(registry.get(101).unwrap().magic(), None);
        assert_eq!(registry.get(101).unwrap().frame_header_len(), 1);
    }

    #[test]
    fn test_alias_shares_definitions() {
        let registry = VersionRegistry::builder()
            .register(101, &definition(), &json!({ "maps": ["Hills"] }))
            .unwrap()
            .alias(1013, 101)
            .unwrap()
            .build();
        let aliased = registry.get(1013).unwrap();
        assert_eq!(aliased.id(), 1013);
        assert!(aliased.packet_type("Ping").is_ok());
        assert!(aliased.enums().get("maps").is_some());
        assert_eq!(registry.ids(), vec![101, 1013]);
    }

    #[test]
    fn test_unknown_version() {
        let registry = VersionRegistry::builder().build();
        assert!(matches!(registry.get(7), Err(ProtocolError::UnsupportedVersion(7))));
        assert!(matches!(
            VersionRegistry::builder().alias(1, 2),
            Err(ProtocolError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_schema_error_names_version() {
        let err = VersionRegistry::builder()
            .register(100, &json!({ "types": { "tcp_packet": "u8" } }), &json!({}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Schema(ref m) if m.contains("version 100")));
    }

    #[test]
    fn test_alias_keeps_target_framing() {
        let registry = VersionRegistry::builder()
            .register(100, &definition(), &json!({}))
            .unwrap()
            .alias(1000, 100)
            .unwrap()
            .register_with_framing(101, &definition(), &json!({}), Some(&b"TD"[..]))
            .unwrap()
            .alias(1013, 101)
            .unwrap()
            .build();
        let legacy = registry.get(1000).unwrap();
        assert_eq!(legacy.magic(), Some(MAGIC));
        assert_eq!(legacy.frame_header_len(), 6);
        let custom = registry.get(1013).unwrap();
        assert_eq!(custom.magic(), Some(&b"TD"[..]));
        assert_eq!(custom.frame_header_len(), 3);
    }

    #[test]
    fn test_limits_and_kick_reasons_follow_aliases() {
        let registry = VersionRegistry::builder()
            .register(101, &definition(), &json!({}))
            .unwrap()
            .limits(101, json!({ "maxPlayers": 16, "maxUsernameLength": 24 }))
            .unwrap()
            .kick_reasons(101, &json!(["Unknown", "Banned", "VersionMismatch"]))
            .unwrap()
            .alias(1014, 101)
            .unwrap()
            .build();
        let aliased = registry.get(1014).unwrap();
        assert_eq!(aliased.limit("maxPlayers"), Some(16));
        assert_eq!(aliased.limit("missing"), None);
        assert_eq!(aliased.kick_reasons().and_then(|k| k.id_of("Banned")), Some(1));
    }

    #[test]
    fn test_version_data_is_validated() {
        let builder = VersionRegistry::builder().register(101, &definition(), &json!({})).unwrap();
        assert!(matches!(
            builder.limits(101, json!([1, 2])),
            Err(ProtocolError::Schema(m)) if m.contains("limits")
        ));
        let builder = VersionRegistry::builder().register(101, &definition(), &json!({})).unwrap();
        assert!(matches!(
            builder.kick_reasons(101, &json!({ "0": "Unknown" })),
            Err(ProtocolError::Schema(m)) if m.contains("version 101")
        ));
        assert!(matches!(
            VersionRegistry::builder().limits(5, json!({})),
            Err(ProtocolError::UnsupportedVersion(5))
        ));
        let registry = VersionRegistry::builder().register(100, &definition(), &json!({})).unwrap().build();
        let plain = registry.get(100).unwrap();
        assert!(plain.limits().as_object().is_some_and(|o| o.is_empty()));
        assert!(plain.kick_reasons().is_none());
    }
}
