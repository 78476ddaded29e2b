//! # Core Protocol Components
//!
//! Schema-driven binary codec and the packet model built on top of it.
//!
//! ## Components
//! - **Compiler**: ProtoDef-style JSON definitions into immutable [`TypeDescriptor`]s
//! - **Codec**: decode / size / encode over compiled descriptors
//! - **Value**: the dynamic value the codec produces and consumes
//! - **Packet**: `{ type, data, passthrough }` plus the per-version type set
//!
//! ## Guarantees
//! - `size_of(v) == encode(v).len()` for every value the codec accepts
//! - `decode(encode(v)) == v`
//! - Container fields decode strictly in order; later fields may reference earlier ones
//! - Decoding never reads past, and encoding never writes past, the given buffer

pub mod codec;
pub mod compiler;
pub mod packet;
pub mod types;
pub mod value;

pub use compiler::{compile, CompiledSchema};
pub use packet::{Frame, Packet, PacketType, PacketTypes};
pub use types::TypeDescriptor;
pub use value::{Map, Value};
