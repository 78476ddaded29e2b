//! # Protocol Versions
//!
//! Per-version data and the typed handler registry.
//!
//! ## Components
//! - **Version**: compiled schema, enum tables, packet types and framing per version id
//! - **Enums**: game enumeration tables with placeholder-aware id windows
//! - **Dispatcher**: persistent and one-shot handlers keyed by packet type

pub mod dispatcher;
pub mod enums;
pub mod version;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;
pub use enums::{EnumSet, EnumTable};
pub use version::{ProtocolVersion, VersionRegistry, VersionRegistryBuilder, LEGACY_PROTOCOL_VERSION, MAGIC};
