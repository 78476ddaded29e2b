//! Compiled type descriptors.
//!
//! A [`TypeDescriptor`] is the immutable, fully resolved form of one entry of a
//! protocol definition. Named type references and sibling-field references are
//! resolved by the compiler, so the codec never looks anything up by type name.

use std::collections::HashMap;

/// Byte order of a fixed-width number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Integer encodings usable as values, length prefixes and mapper bases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    U8,
    I8,
    U16(Endian),
    I16(Endian),
    U32(Endian),
    I32(Endian),
    U64(Endian),
    I64(Endian),
    /// LEB128 over the two's complement bits of an `i32` (at most 5 bytes)
    Varint,
}

impl IntKind {
    /// Encoded width, `None` for variable-length encodings
    pub fn width(self) -> Option<usize> {
        match self {
            IntKind::U8 | IntKind::I8 => Some(1),
            IntKind::U16(_) | IntKind::I16(_) => Some(2),
            IntKind::U32(_) | IntKind::I32(_) => Some(4),
            IntKind::U64(_) | IntKind::I64(_) => Some(8),
            IntKind::Varint => None,
        }
    }

    /// Inclusive range of values this kind can carry
    pub fn range(self) -> (i64, i64) {
        match self {
            IntKind::U8 => (0, u8::MAX.into()),
            IntKind::I8 => (i8::MIN.into(), i8::MAX.into()),
            IntKind::U16(_) => (0, u16::MAX.into()),
            IntKind::I16(_) => (i16::MIN.into(), i16::MAX.into()),
            IntKind::U32(_) => (0, u32::MAX.into()),
            IntKind::I32(_) | IntKind::Varint => (i32::MIN.into(), i32::MAX.into()),
            // u64 values travel as reinterpreted i64 bits
            IntKind::U64(_) | IntKind::I64(_) => (i64::MIN, i64::MAX),
        }
    }
}

/// Floating point encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatKind {
    F32(Endian),
    F64(Endian),
}

impl FloatKind {
    pub fn width(self) -> usize {
        match self {
            FloatKind::F32(_) => 4,
            FloatKind::F64(_) => 8,
        }
    }
}

/// Reference to an earlier field, `up` container levels above the current one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub up: usize,
    pub name: String,
}

/// How many elements (or bytes) a counted type holds
#[derive(Debug, Clone, PartialEq)]
pub enum Count {
    /// Statically known count
    Fixed(usize),
    /// Count written as a prefix of the given integer kind
    Prefixed(IntKind),
    /// Count taken from an already decoded sibling field
    Field(FieldRef),
    /// Everything up to the end of the enclosing buffer
    Remainder,
}

/// Primitive types
#[derive(Debug, Clone, PartialEq)]
pub enum Native {
    Int(IntKind),
    Float(FloatKind),
    Bool,
    /// Zero bytes on the wire, decodes to `Value::Null`
    Void,
    /// NUL-terminated UTF-8
    CString,
    /// Counted UTF-8 string
    PString(Count),
    /// Counted byte blob
    Buffer(Count),
    /// Consumes the rest of the buffer verbatim
    Opaque,
}

/// One container field. Anonymous fields merge into the parent value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Option<String>,
    pub ty: TypeDescriptor,
}

impl Field {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }
}

/// Discriminated union keyed on an earlier sibling's stringified value
#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub compare_to: FieldRef,
    pub cases: HashMap<String, TypeDescriptor>,
    pub default: Option<Box<TypeDescriptor>>,
}

impl Switch {
    /// Variant selected by a stringified discriminant
    pub fn select(&self, key: &str) -> Option<&TypeDescriptor> {
        self.cases.get(key).or(self.default.as_deref())
    }
}

/// Bidirectional raw value ↔ symbolic name table
#[derive(Debug, Clone, PartialEq)]
pub struct Mapper {
    pub repr: IntKind,
    pub by_raw: HashMap<i64, String>,
    pub by_name: HashMap<String, i64>,
    /// Unknown raw values decode to the raw integer instead of failing
    pub passthrough_unknown: bool,
}

impl Mapper {
    /// Symbolic names in ascending raw-value order
    pub fn names(&self) -> Vec<&str> {
        let mut entries: Vec<_> = self.by_raw.iter().collect();
        entries.sort_by_key(|(raw, _)| **raw);
        entries.into_iter().map(|(_, name)| name.as_str()).collect()
    }
}

/// Fully resolved type descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Native(Native),
    Array {
        element: Box<TypeDescriptor>,
        count: Count,
    },
    Container(Vec<Field>),
    Switch(Switch),
    Mapper(Mapper),
}

impl TypeDescriptor {
    /// Named field of a container descriptor
    pub fn field(&self, name: &str) -> Option<&TypeDescriptor> {
        match self {
            TypeDescriptor::Container(fields) => fields.iter().find_map(|f| match &f.name {
                Some(n) if n == name => Some(&f.ty),
                _ => None,
            }),
            _ => None,
        }
    }
}
