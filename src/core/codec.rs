//! # Codec Engine
//!
//! Decode, size and encode operations over compiled [`TypeDescriptor`]s.
//!
//! All three operations walk the same descriptor tree in the same order, which
//! is what keeps `size_of(v) == encode(v).len()`. They are synchronous and
//! never perform I/O.
//!
//! ## Buffer Discipline
//! - `decode` never reads past the slice it is given; opaque natives and
//!   remainder-counted arrays stop at its end.
//! - `encode` writes into a caller-provided slice and fails with
//!   [`ProtocolError::Encode`] instead of writing past its end. Size the slice
//!   with `size_of` first, or use [`CompiledSchema::encode_to_vec`].

use crate::core::compiler::CompiledSchema;
use crate::core::types::{
    Count, Endian, Field, FieldRef, FloatKind, IntKind, Mapper, Native, Switch, TypeDescriptor,
};
use crate::core::value::{Map, Value};
use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;

static NULL: Value = Value::Null;

impl CompiledSchema {
    /// Decode message `name` starting at `offset`.
    ///
    /// Returns the value and the number of bytes consumed.
    pub fn decode(&self, buf: &[u8], offset: usize, name: &str) -> Result<(Value, usize)> {
        let ty = self.require(name)?;
        if offset > buf.len() {
            return Err(ProtocolError::Decode(constants::ERR_BUFFER_UNDERRUN.into()));
        }
        let mut pos = offset;
        let value = decode_value(ty, buf, &mut pos, None)?;
        Ok((value, pos - offset))
    }

    /// Encoded length of `value` as message `name`
    pub fn size_of(&self, value: &Value, name: &str) -> Result<usize> {
        let ty = self.require(name)?;
        size_of_value(ty, value, None)
    }

    /// Encode `value` as message `name` into `buf` at `offset`.
    ///
    /// Returns the offset just past the written bytes.
    pub fn encode(&self, value: &Value, buf: &mut [u8], offset: usize, name: &str) -> Result<usize> {
        let ty = self.require(name)?;
        let mut pos = offset;
        encode_value(ty, value, buf, &mut pos, None)?;
        Ok(pos)
    }

    /// Encode into a freshly allocated, exactly sized vector
    pub fn encode_to_vec(&self, value: &Value, name: &str) -> Result<Vec<u8>> {
        let size = self.size_of(value, name)?;
        let mut buf = vec![0u8; size];
        self.encode(value, &mut buf, 0, name)?;
        Ok(buf)
    }
}

/// Already decoded (or to-be-encoded) fields visible to field references
struct Scope<'s> {
    fields: &'s Map,
    parent: Option<&'s Scope<'s>>,
}

fn lookup<'s>(scope: Option<&'s Scope<'s>>, field: &FieldRef) -> Option<&'s Value> {
    let mut current = scope?;
    for _ in 0..field.up {
        current = current.parent?;
    }
    current.fields.get(&field.name)
}

fn missing_ref(field: &FieldRef) -> String {
    format!("referenced field `{}` is not available", field.name)
}

fn in_field(name: &str, err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::Decode(m) => ProtocolError::Decode(format!("{name}: {m}")),
        ProtocolError::Encode(m) => ProtocolError::Encode(format!("{name}: {m}")),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

fn take<'b>(buf: &'b [u8], pos: &mut usize, n: usize) -> Result<&'b [u8]> {
    let end = pos
        .checked_add(n)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| ProtocolError::Decode(constants::ERR_BUFFER_UNDERRUN.into()))?;
    let bytes = &buf[*pos..end];
    *pos = end;
    Ok(bytes)
}

fn array<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(buf, pos, N)?);
    Ok(out)
}

fn read_int(kind: IntKind, buf: &[u8], pos: &mut usize) -> Result<i64> {
    macro_rules! fixed {
        ($ty:ty, $n:expr, $endian:expr) => {{
            let raw = array::<$n>(buf, pos)?;
            let v = match $endian {
                Endian::Big => <$ty>::from_be_bytes(raw),
                Endian::Little => <$ty>::from_le_bytes(raw),
            };
            v as i64
        }};
    }
    let value = match kind {
        IntKind::U8 => take(buf, pos, 1)?[0] as i64,
        IntKind::I8 => take(buf, pos, 1)?[0] as i8 as i64,
        IntKind::U16(e) => fixed!(u16, 2, e),
        IntKind::I16(e) => fixed!(i16, 2, e),
        IntKind::U32(e) => fixed!(u32, 4, e),
        IntKind::I32(e) => fixed!(i32, 4, e),
        IntKind::U64(e) => fixed!(u64, 8, e),
        IntKind::I64(e) => fixed!(i64, 8, e),
        IntKind::Varint => read_varint(buf, pos)?,
    };
    Ok(value)
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<i64> {
    let mut result: u32 = 0;
    for i in 0..5 {
        let byte = take(buf, pos, 1)?[0];
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32 as i64);
        }
    }
    Err(ProtocolError::Decode("varint longer than 5 bytes".into()))
}

fn read_count(count: &Count, buf: &[u8], pos: &mut usize, scope: Option<&Scope>) -> Result<Option<usize>> {
    match count {
        Count::Fixed(n) => Ok(Some(*n)),
        Count::Prefixed(kind) => {
            let n = read_int(*kind, buf, pos)?;
            usize::try_from(n)
                .map(Some)
                .map_err(|_| ProtocolError::Decode(format!("negative count {n}")))
        }
        Count::Field(field) => {
            let value = lookup(scope, field).ok_or_else(|| ProtocolError::Decode(missing_ref(field)))?;
            value
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| ProtocolError::Decode(format!("`{}` is not a valid count", field.name)))
        }
        Count::Remainder => Ok(None),
    }
}

fn read_counted<'b>(count: &Count, buf: &'b [u8], pos: &mut usize, scope: Option<&Scope>) -> Result<&'b [u8]> {
    match read_count(count, buf, pos, scope)? {
        Some(n) => take(buf, pos, n),
        None => take(buf, pos, buf.len() - *pos),
    }
}

fn decode_native(native: &Native, buf: &[u8], pos: &mut usize, scope: Option<&Scope>) -> Result<Value> {
    let value = match native {
        Native::Int(kind) => Value::Int(read_int(*kind, buf, pos)?),
        Native::Float(FloatKind::F32(e)) => {
            let raw = array::<4>(buf, pos)?;
            let v = match e {
                Endian::Big => f32::from_be_bytes(raw),
                Endian::Little => f32::from_le_bytes(raw),
            };
            Value::Float(v.into())
        }
        Native::Float(FloatKind::F64(e)) => {
            let raw = array::<8>(buf, pos)?;
            Value::Float(match e {
                Endian::Big => f64::from_be_bytes(raw),
                Endian::Little => f64::from_le_bytes(raw),
            })
        }
        Native::Bool => Value::Bool(take(buf, pos, 1)?[0] != 0),
        Native::Void => Value::Null,
        Native::CString => {
            let rest = &buf[*pos..];
            let nul = rest
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| ProtocolError::Decode("unterminated cstring".into()))?;
            let s = std::str::from_utf8(&rest[..nul])
                .map_err(|e| ProtocolError::Decode(format!("invalid UTF-8: {e}")))?
                .to_string();
            *pos += nul + 1;
            Value::String(s)
        }
        Native::PString(count) => {
            let bytes = read_counted(count, buf, pos, scope)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| ProtocolError::Decode(format!("invalid UTF-8: {e}")))?;
            Value::String(s.to_string())
        }
        Native::Buffer(count) => Value::Bytes(Bytes::copy_from_slice(read_counted(count, buf, pos, scope)?)),
        Native::Opaque => Value::Bytes(Bytes::copy_from_slice(take(buf, pos, buf.len() - *pos)?)),
    };
    Ok(value)
}

fn decode_mapper(mapper: &Mapper, buf: &[u8], pos: &mut usize) -> Result<Value> {
    let raw = read_int(mapper.repr, buf, pos)?;
    match mapper.by_raw.get(&raw) {
        Some(name) => Ok(Value::String(name.clone())),
        None if mapper.passthrough_unknown => Ok(Value::Int(raw)),
        None => Err(ProtocolError::Decode(format!("unmapped value {raw}"))),
    }
}

fn select<'t>(switch: &'t Switch, scope: Option<&Scope>) -> Result<Option<&'t TypeDescriptor>> {
    let discriminant = lookup(scope, &switch.compare_to)
        .ok_or_else(|| ProtocolError::Decode(missing_ref(&switch.compare_to)))?;
    let key = discriminant.discriminant().ok_or_else(|| {
        ProtocolError::Decode(format!(
            "`{}` cannot act as a switch discriminant",
            switch.compare_to.name
        ))
    })?;
    Ok(switch.select(&key))
}

fn select_for_decode<'t>(switch: &'t Switch, scope: Option<&Scope>) -> Result<&'t TypeDescriptor> {
    select(switch, scope)?.ok_or_else(|| {
        let key = lookup(scope, &switch.compare_to).map(ToString::to_string).unwrap_or_default();
        ProtocolError::Decode(format!("no switch case for {key}"))
    })
}

fn decode_value(ty: &TypeDescriptor, buf: &[u8], pos: &mut usize, scope: Option<&Scope>) -> Result<Value> {
    match ty {
        TypeDescriptor::Native(native) => decode_native(native, buf, pos, scope),
        TypeDescriptor::Mapper(mapper) => decode_mapper(mapper, buf, pos),
        TypeDescriptor::Switch(switch) => {
            let case = select_for_decode(switch, scope)?;
            decode_value(case, buf, pos, scope)
        }
        TypeDescriptor::Array { element, count } => {
            let mut items = match read_count(count, buf, pos, scope)? {
                Some(n) => {
                    let remaining = buf.len().saturating_sub(*pos);
                    if !matches!(count, Count::Fixed(_)) && n > remaining {
                        return Err(ProtocolError::Decode(format!(
                            "array count {n} exceeds the {remaining} bytes left"
                        )));
                    }
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(decode_value(element, buf, pos, scope)?);
                    }
                    items
                }
                None => Vec::new(),
            };
            if matches!(count, Count::Remainder) {
                while *pos < buf.len() {
                    let before = *pos;
                    items.push(decode_value(element, buf, pos, scope)?);
                    if *pos == before {
                        return Err(ProtocolError::Decode(
                            "zero-width element in remainder array".into(),
                        ));
                    }
                }
            }
            Ok(Value::Array(items))
        }
        TypeDescriptor::Container(fields) => {
            let mut map = Map::new();
            decode_fields(fields, buf, pos, scope, &mut map)?;
            Ok(Value::Object(map))
        }
    }
}

/// Decodes `fields` into `out`; anonymous fields write into the same map.
fn decode_fields(
    fields: &[Field],
    buf: &[u8],
    pos: &mut usize,
    parent: Option<&Scope>,
    out: &mut Map,
) -> Result<()> {
    for field in fields {
        match &field.name {
            Some(name) => {
                let value = {
                    let scope = Scope { fields: out, parent };
                    decode_value(&field.ty, buf, pos, Some(&scope)).map_err(|e| in_field(name, e))?
                };
                out.insert(name.clone(), value);
            }
            None => decode_anonymous(&field.ty, buf, pos, parent, out)?,
        }
    }
    Ok(())
}

fn decode_anonymous(
    ty: &TypeDescriptor,
    buf: &[u8],
    pos: &mut usize,
    parent: Option<&Scope>,
    out: &mut Map,
) -> Result<()> {
    match ty {
        TypeDescriptor::Container(fields) => decode_fields(fields, buf, pos, parent, out),
        TypeDescriptor::Switch(switch) => {
            let case = {
                let scope = Scope { fields: out, parent };
                select_for_decode(switch, Some(&scope))?
            };
            match case {
                TypeDescriptor::Container(_) | TypeDescriptor::Switch(_) => {
                    decode_anonymous(case, buf, pos, parent, out)
                }
                other => {
                    let value = {
                        let scope = Scope { fields: out, parent };
                        decode_value(other, buf, pos, Some(&scope))?
                    };
                    merge(out, value)
                }
            }
        }
        other => {
            let value = decode_value(other, buf, pos, parent)?;
            merge(out, value)
        }
    }
}

fn merge(out: &mut Map, value: Value) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Object(map) => {
            out.extend(map);
            Ok(())
        }
        other => Err(ProtocolError::Decode(format!(
            "anonymous field produced a {} value",
            other.kind()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Size
// ---------------------------------------------------------------------------

fn mismatch(expected: &str, got: &Value) -> ProtocolError {
    ProtocolError::Encode(format!("expected {expected}, got {}", got.kind()))
}

fn int_value(kind: IntKind, value: &Value) -> Result<i64> {
    let v = value.as_i64().ok_or_else(|| mismatch("int", value))?;
    let (min, max) = kind.range();
    if v < min || v > max {
        return Err(ProtocolError::Encode(format!("{v} out of range for {kind:?}")));
    }
    Ok(v)
}

fn varint_len(v: i64) -> usize {
    let mut bits = v as i32 as u32;
    let mut len = 1;
    while bits >= 0x80 {
        bits >>= 7;
        len += 1;
    }
    len
}

fn int_len(kind: IntKind, v: i64) -> usize {
    kind.width().unwrap_or_else(|| varint_len(v))
}

fn mapper_raw(mapper: &Mapper, value: &Value) -> Result<i64> {
    match value {
        Value::String(name) => mapper
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| ProtocolError::Encode(format!("unmapped name `{name}`"))),
        Value::Int(_) if mapper.passthrough_unknown => int_value(mapper.repr, value),
        other => Err(mismatch("mapped name", other)),
    }
}

/// Element count for a counted value, checked against field-sourced counts
fn check_count(count: &Count, len: usize, scope: Option<&Scope>) -> Result<usize> {
    match count {
        Count::Fixed(n) if *n != len => Err(ProtocolError::Encode(format!(
            "expected exactly {n} elements, got {len}"
        ))),
        Count::Field(field) => {
            let declared = lookup(scope, field)
                .and_then(Value::as_i64)
                .ok_or_else(|| ProtocolError::Encode(missing_ref(field)))?;
            if usize::try_from(declared).ok() != Some(len) {
                return Err(ProtocolError::Encode(format!(
                    "`{}` is {declared} but {len} elements were given",
                    field.name
                )));
            }
            Ok(0)
        }
        Count::Prefixed(kind) => {
            let n = i64::try_from(len).map_err(|_| ProtocolError::Encode("count overflow".into()))?;
            int_value(*kind, &Value::Int(n))?;
            Ok(int_len(*kind, n))
        }
        _ => Ok(0),
    }
}

fn size_of_native(native: &Native, value: &Value, scope: Option<&Scope>) -> Result<usize> {
    match native {
        Native::Int(kind) => Ok(int_len(*kind, int_value(*kind, value)?)),
        Native::Float(kind) => match value {
            Value::Float(_) | Value::Int(_) => Ok(kind.width()),
            other => Err(mismatch("float", other)),
        },
        Native::Bool => value.as_bool().map(|_| 1).ok_or_else(|| mismatch("bool", value)),
        Native::Void => Ok(0),
        Native::CString => {
            let s = value.as_str().ok_or_else(|| mismatch("string", value))?;
            if s.as_bytes().contains(&0) {
                return Err(ProtocolError::Encode("cstring contains NUL".into()));
            }
            Ok(s.len() + 1)
        }
        Native::PString(count) => {
            let s = value.as_str().ok_or_else(|| mismatch("string", value))?;
            Ok(check_count(count, s.len(), scope)? + s.len())
        }
        Native::Buffer(count) => match value {
            Value::Bytes(b) => Ok(check_count(count, b.len(), scope)? + b.len()),
            other => Err(mismatch("bytes", other)),
        },
        Native::Opaque => match value {
            Value::Bytes(b) => Ok(b.len()),
            other => Err(mismatch("bytes", other)),
        },
    }
}

fn select_for_encode<'t>(switch: &'t Switch, scope: Option<&Scope>) -> Result<&'t TypeDescriptor> {
    let discriminant = lookup(scope, &switch.compare_to)
        .ok_or_else(|| ProtocolError::Encode(missing_ref(&switch.compare_to)))?;
    let key = discriminant
        .discriminant()
        .ok_or_else(|| mismatch("discriminant", discriminant))?;
    switch
        .select(&key)
        .ok_or_else(|| ProtocolError::Encode(format!("no switch case for {key}")))
}

fn size_of_value(ty: &TypeDescriptor, value: &Value, scope: Option<&Scope>) -> Result<usize> {
    match ty {
        TypeDescriptor::Native(native) => size_of_native(native, value, scope),
        TypeDescriptor::Mapper(mapper) => Ok(int_len(mapper.repr, mapper_raw(mapper, value)?)),
        TypeDescriptor::Switch(switch) => size_of_value(select_for_encode(switch, scope)?, value, scope),
        TypeDescriptor::Array { element, count } => {
            let items = match value {
                Value::Array(items) => items,
                other => return Err(mismatch("array", other)),
            };
            let mut size = check_count(count, items.len(), scope)?;
            for item in items {
                size += size_of_value(element, item, scope)?;
            }
            Ok(size)
        }
        TypeDescriptor::Container(fields) => {
            let map = value.as_object().ok_or_else(|| mismatch("object", value))?;
            size_of_fields(fields, map, scope)
        }
    }
}

fn size_of_fields(fields: &[Field], map: &Map, parent: Option<&Scope>) -> Result<usize> {
    let scope = Scope { fields: map, parent };
    let mut size = 0;
    for field in fields {
        size += match &field.name {
            Some(name) => {
                let value = map.get(name).unwrap_or(&NULL);
                size_of_value(&field.ty, value, Some(&scope)).map_err(|e| in_field(name, e))?
            }
            None => size_of_anonymous(&field.ty, map, parent)?,
        };
    }
    Ok(size)
}

fn size_of_anonymous(ty: &TypeDescriptor, map: &Map, parent: Option<&Scope>) -> Result<usize> {
    match ty {
        TypeDescriptor::Container(fields) => size_of_fields(fields, map, parent),
        TypeDescriptor::Switch(switch) => {
            let scope = Scope { fields: map, parent };
            let case = select_for_encode(switch, Some(&scope))?;
            match case {
                TypeDescriptor::Container(_) | TypeDescriptor::Switch(_) => size_of_anonymous(case, map, parent),
                other => size_of_value(other, &NULL, Some(&scope)),
            }
        }
        other => size_of_value(other, &NULL, parent),
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

fn put(buf: &mut [u8], pos: &mut usize, bytes: &[u8]) -> Result<()> {
    let end = pos
        .checked_add(bytes.len())
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| ProtocolError::Encode(constants::ERR_BUFFER_OVERRUN.into()))?;
    buf[*pos..end].copy_from_slice(bytes);
    *pos = end;
    Ok(())
}

fn write_int(kind: IntKind, v: i64, buf: &mut [u8], pos: &mut usize) -> Result<()> {
    macro_rules! fixed {
        ($ty:ty, $endian:expr) => {{
            let v = v as $ty;
            match $endian {
                Endian::Big => put(buf, pos, &v.to_be_bytes()),
                Endian::Little => put(buf, pos, &v.to_le_bytes()),
            }
        }};
    }
    match kind {
        IntKind::U8 | IntKind::I8 => put(buf, pos, &[v as u8]),
        IntKind::U16(e) | IntKind::I16(e) => fixed!(u16, e),
        IntKind::U32(e) | IntKind::I32(e) => fixed!(u32, e),
        IntKind::U64(e) | IntKind::I64(e) => fixed!(u64, e),
        IntKind::Varint => {
            let mut bits = v as i32 as u32;
            loop {
                let mut byte = (bits & 0x7F) as u8;
                bits >>= 7;
                if bits != 0 {
                    byte |= 0x80;
                }
                put(buf, pos, &[byte])?;
                if bits == 0 {
                    return Ok(());
                }
            }
        }
    }
}

fn write_count(count: &Count, len: usize, buf: &mut [u8], pos: &mut usize, scope: Option<&Scope>) -> Result<()> {
    check_count(count, len, scope)?;
    if let Count::Prefixed(kind) = count {
        write_int(*kind, len as i64, buf, pos)?;
    }
    Ok(())
}

fn encode_native(native: &Native, value: &Value, buf: &mut [u8], pos: &mut usize, scope: Option<&Scope>) -> Result<()> {
    match native {
        Native::Int(kind) => write_int(*kind, int_value(*kind, value)?, buf, pos),
        Native::Float(kind) => {
            let v = match value {
                Value::Float(f) => *f,
                Value::Int(i) => *i as f64,
                other => return Err(mismatch("float", other)),
            };
            match kind {
                FloatKind::F32(Endian::Big) => put(buf, pos, &(v as f32).to_be_bytes()),
                FloatKind::F32(Endian::Little) => put(buf, pos, &(v as f32).to_le_bytes()),
                FloatKind::F64(Endian::Big) => put(buf, pos, &v.to_be_bytes()),
                FloatKind::F64(Endian::Little) => put(buf, pos, &v.to_le_bytes()),
            }
        }
        Native::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch("bool", value))?;
            put(buf, pos, &[u8::from(b)])
        }
        Native::Void => Ok(()),
        Native::CString => {
            let s = value.as_str().ok_or_else(|| mismatch("string", value))?;
            if s.as_bytes().contains(&0) {
                return Err(ProtocolError::Encode("cstring contains NUL".into()));
            }
            put(buf, pos, s.as_bytes())?;
            put(buf, pos, &[0])
        }
        Native::PString(count) => {
            let s = value.as_str().ok_or_else(|| mismatch("string", value))?;
            write_count(count, s.len(), buf, pos, scope)?;
            put(buf, pos, s.as_bytes())
        }
        Native::Buffer(count) => match value {
            Value::Bytes(b) => {
                write_count(count, b.len(), buf, pos, scope)?;
                put(buf, pos, b)
            }
            other => Err(mismatch("bytes", other)),
        },
        Native::Opaque => match value {
            Value::Bytes(b) => put(buf, pos, b),
            other => Err(mismatch("bytes", other)),
        },
    }
}

fn encode_value(ty: &TypeDescriptor, value: &Value, buf: &mut [u8], pos: &mut usize, scope: Option<&Scope>) -> Result<()> {
    match ty {
        TypeDescriptor::Native(native) => encode_native(native, value, buf, pos, scope),
        TypeDescriptor::Mapper(mapper) => write_int(mapper.repr, mapper_raw(mapper, value)?, buf, pos),
        TypeDescriptor::Switch(switch) => encode_value(select_for_encode(switch, scope)?, value, buf, pos, scope),
        TypeDescriptor::Array { element, count } => {
            let items = match value {
                Value::Array(items) => items,
                other => return Err(mismatch("array", other)),
            };
            write_count(count, items.len(), buf, pos, scope)?;
            for item in items {
                encode_value(element, item, buf, pos, scope)?;
            }
            Ok(())
        }
        TypeDescriptor::Container(fields) => {
            let map = value.as_object().ok_or_else(|| mismatch("object", value))?;
            encode_fields(fields, map, buf, pos, scope)
        }
    }
}

fn encode_fields(fields: &[Field], map: &Map, buf: &mut [u8], pos: &mut usize, parent: Option<&Scope>) -> Result<()> {
    let scope = Scope { fields: map, parent };
    for field in fields {
        match &field.name {
            Some(name) => {
                let value = map.get(name).unwrap_or(&NULL);
                encode_value(&field.ty, value, buf, pos, Some(&scope)).map_err(|e| in_field(name, e))?;
            }
            None => encode_anonymous(&field.ty, map, buf, pos, parent)?,
        }
    }
    Ok(())
}

fn encode_anonymous(ty: &TypeDescriptor, map: &Map, buf: &mut [u8], pos: &mut usize, parent: Option<&Scope>) -> Result<()> {
    match ty {
        TypeDescriptor::Container(fields) => encode_fields(fields, map, buf, pos, parent),
        TypeDescriptor::Switch(switch) => {
            let scope = Scope { fields: map, parent };
            let case = select_for_encode(switch, Some(&scope))?;
            match case {
                TypeDescriptor::Container(_) | TypeDescriptor::Switch(_) => encode_anonymous(case, map, buf, pos, parent),
                other => encode_value(other, &NULL, buf, pos, Some(&scope)),
            }
        }
        other => encode_value(other, &NULL, buf, pos, parent),
    }
}
