//! # Schema Compiler
//!
//! Turns a ProtoDef-style JSON protocol definition into a [`CompiledSchema`].
//!
//! ## Definition Format
//! ```text
//! { "types": { "<name>": <type>, ... }, "protocol": { "types": { ... } } }
//!
//! <type> := "u8" | "lu16" | "pstring" ... | "<type name>"
//!         | ["container", [{ "name": "..", "type": <type> } | { "anon": true, "type": <type> }]]
//!         | ["array",     { "type": <type>, "count": 4 | "field" } | { "type": <type>, "countType": "u8" }]
//!         | ["switch",    { "compareTo": "field" | "../field", "fields": { "<key>": <type> }, "default": <type> }]
//!         | ["mapper",    { "type": "u8", "mappings": { "0": "Name", "0x01": "Other" } }]
//!         | ["pstring",   { "countType": "u8" }]
//!         | ["buffer",    { "countType": "u8" } | { "count": 16 | "field" }]
//! ```
//! Types declared as `"native"` must be one of the built-in primitives.
//! `"unimplemented"` and `"restBuffer"` are opaque natives that consume the
//! remaining buffer.
//!
//! ## Resolution
//! Named references are expanded once, at compile time, in the context where
//! they are used. Field references (`compareTo`, `count`) are checked against
//! the fields declared *before* the referencing field; a reference that cannot
//! be resolved is a [`ProtocolError::Schema`]. Anonymous fields share their
//! parent's scope, so fields declared inside them are visible to later
//! siblings.

use crate::core::types::{
    Count, Endian, Field, FieldRef, FloatKind, IntKind, Mapper, Native, Switch, TypeDescriptor,
};
use crate::error::{ProtocolError, Result};
use serde_json::Value as Json;
use std::collections::HashMap;
use tracing::debug;

/// Top-level message for TCP frame payloads
pub const TCP_PACKET: &str = "tcp_packet";
/// Top-level message for client→server datagrams
pub const UDP_INCOMING: &str = "udp_incoming";
/// Top-level message for server→client datagrams
pub const UDP_OUTGOING: &str = "udp_outgoing";

/// Messages every protocol version must define
pub const REQUIRED_MESSAGES: [&str; 3] = [TCP_PACKET, UDP_INCOMING, UDP_OUTGOING];

/// Compiled form of one protocol definition
#[derive(Debug, Clone, Default)]
pub struct CompiledSchema {
    messages: HashMap<String, TypeDescriptor>,
}

impl CompiledSchema {
    /// Descriptor of a top-level message
    pub fn message(&self, name: &str) -> Option<&TypeDescriptor> {
        self.messages.get(name)
    }

    /// Names of all compiled messages
    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub(crate) fn require(&self, name: &str) -> Result<&TypeDescriptor> {
        self.messages
            .get(name)
            .ok_or_else(|| ProtocolError::Schema(format!("unknown message `{name}`")))
    }
}

/// Compile a protocol definition, requiring the three transport messages.
pub fn compile(definition: &Json) -> Result<CompiledSchema> {
    compile_messages(definition, &REQUIRED_MESSAGES)
}

/// Compile the named top-level messages of a protocol definition.
pub fn compile_messages(definition: &Json, names: &[&str]) -> Result<CompiledSchema> {
    let mut compiler = Compiler::new(definition)?;
    let mut messages = HashMap::with_capacity(names.len());
    for name in names {
        let ty = compiler.compile_named(name)?;
        messages.insert((*name).to_string(), ty);
    }
    debug!(messages = messages.len(), "Compiled protocol schema");
    Ok(CompiledSchema { messages })
}

/// Field names visible at each container level, innermost last
#[derive(Default)]
struct Scope {
    levels: Vec<Vec<String>>,
}

impl Scope {
    fn current(&mut self) -> &mut Vec<String> {
        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }

    fn resolve(&self, path: &str) -> Result<FieldRef> {
        let field = parse_field_ref(path)?;
        let level = self
            .levels
            .len()
            .checked_sub(1 + field.up)
            .ok_or_else(|| ProtocolError::Schema(format!("field reference `{path}` escapes the message")))?;
        if self.levels[level].iter().any(|n| *n == field.name) {
            Ok(field)
        } else {
            Err(ProtocolError::Schema(format!(
                "field reference `{path}` does not name an earlier sibling"
            )))
        }
    }
}

fn parse_field_ref(path: &str) -> Result<FieldRef> {
    let mut up = 0;
    let mut rest = path;
    while let Some(stripped) = rest.strip_prefix("../") {
        up += 1;
        rest = stripped;
    }
    if rest.is_empty() || rest.contains('/') {
        return Err(ProtocolError::Schema(format!("malformed field reference `{path}`")));
    }
    Ok(FieldRef {
        up,
        name: rest.to_string(),
    })
}

struct Compiler<'a> {
    types: HashMap<&'a str, &'a Json>,
    resolving: Vec<String>,
}

impl<'a> Compiler<'a> {
    fn new(definition: &'a Json) -> Result<Self> {
        let mut types = HashMap::new();
        let mut node = Some(definition);
        // The namespace path used by the game's definition files
        while let Some(ns) = node {
            if let Some(map) = ns.get("types").and_then(Json::as_object) {
                for (name, def) in map {
                    types.insert(name.as_str(), def);
                }
            }
            node = ns.get("protocol");
        }
        if types.is_empty() {
            return Err(ProtocolError::Schema("definition declares no types".into()));
        }
        Ok(Self {
            types,
            resolving: Vec::new(),
        })
    }

    fn compile_named(&mut self, name: &str) -> Result<TypeDescriptor> {
        let mut scope = Scope::default();
        self.compile_ref(name, &mut scope, false)
    }

    fn compile_ref(&mut self, name: &str, scope: &mut Scope, flatten: bool) -> Result<TypeDescriptor> {
        match self.types.get(name).copied() {
            Some(Json::String(s)) if s == "native" => builtin_native(name)
                .map(TypeDescriptor::Native)
                .ok_or_else(|| ProtocolError::Schema(format!("unknown native type `{name}`"))),
            Some(def) => {
                if self.resolving.iter().any(|n| n == name) {
                    return Err(ProtocolError::Schema(format!("recursive type `{name}`")));
                }
                self.resolving.push(name.to_string());
                let result = self.compile_type(def, scope, flatten);
                self.resolving.pop();
                result
            }
            None => builtin_native(name)
                .map(TypeDescriptor::Native)
                .ok_or_else(|| ProtocolError::Schema(format!("unresolved type `{name}`"))),
        }
    }

    fn compile_type(&mut self, def: &Json, scope: &mut Scope, flatten: bool) -> Result<TypeDescriptor> {
        match def {
            Json::String(name) => self.compile_ref(name, scope, flatten),
            Json::Array(parts) if parts.len() == 2 => {
                let kind = parts[0]
                    .as_str()
                    .ok_or_else(|| ProtocolError::Schema("type constructor must be a string".into()))?;
                let opts = &parts[1];
                match kind {
                    "container" => self.compile_container(opts, scope, flatten),
                    "array" => self.compile_array(opts, scope),
                    "switch" => self.compile_switch(opts, scope, flatten),
                    "mapper" => self.compile_mapper(opts, scope),
                    "pstring" => Ok(TypeDescriptor::Native(Native::PString(
                        self.compile_count(opts, scope)?,
                    ))),
                    "buffer" => Ok(TypeDescriptor::Native(Native::Buffer(
                        self.compile_count(opts, scope)?,
                    ))),
                    other => Err(ProtocolError::Schema(format!(
                        "unsupported type constructor `{other}`"
                    ))),
                }
            }
            other => Err(ProtocolError::Schema(format!("malformed type definition: {other}"))),
        }
    }

    fn compile_container(&mut self, opts: &Json, scope: &mut Scope, flatten: bool) -> Result<TypeDescriptor> {
        let entries = opts
            .as_array()
            .ok_or_else(|| ProtocolError::Schema("container fields must be an array".into()))?;
        if !flatten {
            scope.levels.push(Vec::new());
        }
        let result = self.compile_fields(entries, scope);
        if !flatten {
            scope.levels.pop();
        }
        result.map(TypeDescriptor::Container)
    }

    fn compile_fields(&mut self, entries: &[Json], scope: &mut Scope) -> Result<Vec<Field>> {
        let mut fields = Vec::with_capacity(entries.len());
        for entry in entries {
            let ty_def = entry
                .get("type")
                .ok_or_else(|| ProtocolError::Schema(format!("container field without type: {entry}")))?;
            let anon = entry.get("anon").and_then(Json::as_bool).unwrap_or(false);
            if anon {
                let ty = self.compile_type(ty_def, scope, true)?;
                if !matches!(ty, TypeDescriptor::Container(_) | TypeDescriptor::Switch(_)) {
                    return Err(ProtocolError::Schema(
                        "anonymous fields must be containers or switches".into(),
                    ));
                }
                fields.push(Field { name: None, ty });
            } else {
                let name = entry
                    .get("name")
                    .and_then(Json::as_str)
                    .ok_or_else(|| ProtocolError::Schema(format!("container field without name: {entry}")))?;
                let ty = self.compile_type(ty_def, scope, false)?;
                scope.current().push(name.to_string());
                fields.push(Field {
                    name: Some(name.to_string()),
                    ty,
                });
            }
        }
        Ok(fields)
    }

    fn compile_array(&mut self, opts: &Json, scope: &mut Scope) -> Result<TypeDescriptor> {
        let count = self.compile_count(opts, scope)?;
        let element_def = opts
            .get("type")
            .ok_or_else(|| ProtocolError::Schema("array without element type".into()))?;
        let element = self.compile_type(element_def, scope, false)?;
        Ok(TypeDescriptor::Array {
            element: Box::new(element),
            count,
        })
    }

    fn compile_count(&mut self, opts: &Json, scope: &mut Scope) -> Result<Count> {
        if let Some(count_type) = opts.get("countType") {
            return match self.compile_type(count_type, scope, false)? {
                TypeDescriptor::Native(Native::Int(kind)) => Ok(Count::Prefixed(kind)),
                other => Err(ProtocolError::Schema(format!(
                    "countType must be an integer type, got {other:?}"
                ))),
            };
        }
        match opts.get("count") {
            Some(Json::Number(n)) => n
                .as_u64()
                .map(|n| Count::Fixed(n as usize))
                .ok_or_else(|| ProtocolError::Schema(format!("invalid fixed count {n}"))),
            Some(Json::String(path)) => scope.resolve(path).map(Count::Field),
            Some(other) => Err(ProtocolError::Schema(format!("invalid count {other}"))),
            None => Ok(Count::Remainder),
        }
    }

    fn compile_switch(&mut self, opts: &Json, scope: &mut Scope, flatten: bool) -> Result<TypeDescriptor> {
        let compare_to = opts
            .get("compareTo")
            .and_then(Json::as_str)
            .ok_or_else(|| ProtocolError::Schema("switch without compareTo".into()))?;
        let compare_to = scope.resolve(compare_to)?;

        let mut cases = HashMap::new();
        if let Some(fields) = opts.get("fields").and_then(Json::as_object) {
            for (key, def) in fields {
                cases.insert(key.clone(), self.compile_type(def, scope, flatten)?);
            }
        }
        let default = match opts.get("default") {
            Some(def) => Some(Box::new(self.compile_type(def, scope, flatten)?)),
            None => None,
        };
        Ok(TypeDescriptor::Switch(Switch {
            compare_to,
            cases,
            default,
        }))
    }

    fn compile_mapper(&mut self, opts: &Json, scope: &mut Scope) -> Result<TypeDescriptor> {
        let repr_def = opts
            .get("type")
            .ok_or_else(|| ProtocolError::Schema("mapper without type".into()))?;
        let repr = match self.compile_type(repr_def, scope, false)? {
            TypeDescriptor::Native(Native::Int(kind)) => kind,
            other => {
                return Err(ProtocolError::Schema(format!(
                    "mapper base must be an integer type, got {other:?}"
                )))
            }
        };
        let mappings = opts
            .get("mappings")
            .and_then(Json::as_object)
            .ok_or_else(|| ProtocolError::Schema("mapper without mappings".into()))?;

        let mut by_raw = HashMap::with_capacity(mappings.len());
        let mut by_name = HashMap::with_capacity(mappings.len());
        for (raw, name) in mappings {
            let raw_value = parse_raw_key(raw)?;
            let name = name
                .as_str()
                .ok_or_else(|| ProtocolError::Schema(format!("mapping for `{raw}` must be a string")))?;
            let (min, max) = repr.range();
            if raw_value < min || raw_value > max {
                return Err(ProtocolError::Schema(format!(
                    "mapping key `{raw}` does not fit the mapper type"
                )));
            }
            by_raw.insert(raw_value, name.to_string());
            by_name.insert(name.to_string(), raw_value);
        }
        let passthrough_unknown = opts
            .get("passthroughUnknown")
            .and_then(Json::as_bool)
            .unwrap_or(false);
        Ok(TypeDescriptor::Mapper(Mapper {
            repr,
            by_raw,
            by_name,
            passthrough_unknown,
        }))
    }
}

fn parse_raw_key(raw: &str) -> Result<i64> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => raw.parse::<i64>(),
    };
    parsed.map_err(|_| ProtocolError::Schema(format!("mapping key `{raw}` is not an integer")))
}

/// Built-in primitive by name
fn builtin_native(name: &str) -> Option<Native> {
    use Endian::{Big, Little};
    let native = match name {
        "u8" => Native::Int(IntKind::U8),
        "i8" => Native::Int(IntKind::I8),
        "u16" => Native::Int(IntKind::U16(Big)),
        "i16" => Native::Int(IntKind::I16(Big)),
        "u32" => Native::Int(IntKind::U32(Big)),
        "i32" => Native::Int(IntKind::I32(Big)),
        "u64" => Native::Int(IntKind::U64(Big)),
        "i64" => Native::Int(IntKind::I64(Big)),
        "lu16" => Native::Int(IntKind::U16(Little)),
        "li16" => Native::Int(IntKind::I16(Little)),
        "lu32" => Native::Int(IntKind::U32(Little)),
        "li32" => Native::Int(IntKind::I32(Little)),
        "lu64" => Native::Int(IntKind::U64(Little)),
        "li64" => Native::Int(IntKind::I64(Little)),
        "varint" => Native::Int(IntKind::Varint),
        "f32" => Native::Float(FloatKind::F32(Big)),
        "f64" => Native::Float(FloatKind::F64(Big)),
        "lf32" => Native::Float(FloatKind::F32(Little)),
        "lf64" => Native::Float(FloatKind::F64(Little)),
        "bool" => Native::Bool,
        "void" => Native::Void,
        "cstring" => Native::CString,
        "unimplemented" | "restBuffer" => Native::Opaque,
        _ => return None,
    };
    Some(native)
}
