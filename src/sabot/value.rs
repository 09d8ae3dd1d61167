//! Value (state) model
//!
//! The runtime counterpart of [`Type`]. Containers carry their element types
//! so that empty collections and absent optionals still know their shape.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SabotError};

use super::compare::{compare_states, total_state_order};
use super::{Kind, Type};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Char(char),
    Float(f32),
    Double(f64),
    /// Nanoseconds
    Duration(i64),
    /// Nanoseconds since the epoch
    TimePoint(i64),
    Uuid([u8; 16]),
    Blob(Vec<u8>),
    Str(String),
    Tombstone,
    Void,
    Desc(Box<Value>),
    /// A placeholder of the given inner type
    Free(Type),
    /// Element type, then the element if present
    Opt(Type, Option<Box<Value>>),
    /// Element type, then elements in state order without duplicates
    Set(Type, Vec<Value>),
    Vector(Type, Vec<Value>),
    /// Key type, value type, then pairs in key order without duplicate keys
    Map(Type, Type, Vec<(Value, Value)>),
    Record(Vec<(String, Value)>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Int8(_) => Kind::Int8,
            Value::Int16(_) => Kind::Int16,
            Value::Int32(_) => Kind::Int32,
            Value::Int64(_) => Kind::Int64,
            Value::UInt8(_) => Kind::UInt8,
            Value::UInt16(_) => Kind::UInt16,
            Value::UInt32(_) => Kind::UInt32,
            Value::UInt64(_) => Kind::UInt64,
            Value::Bool(_) => Kind::Bool,
            Value::Char(_) => Kind::Char,
            Value::Float(_) => Kind::Float,
            Value::Double(_) => Kind::Double,
            Value::Duration(_) => Kind::Duration,
            Value::TimePoint(_) => Kind::TimePoint,
            Value::Uuid(_) => Kind::Uuid,
            Value::Blob(_) => Kind::Blob,
            Value::Str(_) => Kind::Str,
            Value::Tombstone => Kind::Tombstone,
            Value::Void => Kind::Void,
            Value::Desc(_) => Kind::Desc,
            Value::Free(_) => Kind::Free,
            Value::Opt(_, _) => Kind::Opt,
            Value::Set(_, _) => Kind::Set,
            Value::Vector(_, _) => Kind::Vector,
            Value::Map(_, _, _) => Kind::Map,
            Value::Record(_) => Kind::Record,
            Value::Tuple(_) => Kind::Tuple,
        }
    }

    /// The type this value inhabits
    pub fn ty(&self) -> Type {
        match self {
            Value::Desc(inner) => Type::desc(inner.ty()),
            Value::Free(ty) => Type::free(ty.clone()),
            Value::Opt(ty, _) => Type::opt(ty.clone()),
            Value::Set(ty, _) => Type::set(ty.clone()),
            Value::Vector(ty, _) => Type::vector(ty.clone()),
            Value::Map(key, val, _) => Type::map(key.clone(), val.clone()),
            Value::Record(fields) => {
                Type::Record(fields.iter().map(|(name, v)| (name.clone(), v.ty())).collect())
            }
            Value::Tuple(elems) => Type::Tuple(elems.iter().map(Value::ty).collect()),
            scalar => Type::scalar(scalar.kind()).unwrap_or(Type::Void),
        }
    }

    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn desc(inner: Value) -> Value {
        Value::Desc(Box::new(inner))
    }

    pub fn free(ty: Type) -> Value {
        Value::Free(ty)
    }

    pub fn tuple(elems: impl IntoIterator<Item = Value>) -> Value {
        Value::Tuple(elems.into_iter().collect())
    }

    pub fn record<N: Into<String>>(fields: impl IntoIterator<Item = (N, Value)>) -> Value {
        Value::Record(fields.into_iter().map(|(name, v)| (name.into(), v)).collect())
    }

    pub fn opt(elem_ty: Type, elem: Option<Value>) -> Result<Value> {
        if let Some(v) = &elem {
            check_elem_type(&elem_ty, v)?;
        }
        Ok(Value::Opt(elem_ty, elem.map(Box::new)))
    }

    pub fn vector(elem_ty: Type, elems: Vec<Value>) -> Result<Value> {
        for v in &elems {
            check_elem_type(&elem_ty, v)?;
        }
        Ok(Value::Vector(elem_ty, elems))
    }

    /// Builds a set, sorting the elements and dropping duplicates
    pub fn set(elem_ty: Type, mut elems: Vec<Value>) -> Result<Value> {
        for v in &elems {
            check_elem_type(&elem_ty, v)?;
        }
        elems.sort_by(total_state_order);
        let mut out: Vec<Value> = Vec::with_capacity(elems.len());
        for v in elems {
            match out.last() {
                Some(prev) if compare_states(prev, &v)?.is_eq() => {}
                _ => out.push(v),
            }
        }
        Ok(Value::Set(elem_ty, out))
    }

    /// Builds a map sorted by key. A repeated key keeps its last value.
    pub fn map(key_ty: Type, val_ty: Type, pairs: Vec<(Value, Value)>) -> Result<Value> {
        for (k, v) in &pairs {
            check_elem_type(&key_ty, k)?;
            check_elem_type(&val_ty, v)?;
        }
        let mut indexed: Vec<(usize, (Value, Value))> = pairs.into_iter().enumerate().collect();
        indexed.sort_by(|(ia, (a, _)), (ib, (b, _))| total_state_order(a, b).then(ia.cmp(ib)));
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(indexed.len());
        for (_, (k, v)) in indexed {
            match out.last_mut() {
                Some(prev) if compare_states(&prev.0, &k)?.is_eq() => prev.1 = v,
                _ => out.push((k, v)),
            }
        }
        Ok(Value::Map(key_ty, val_ty, out))
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn is_free(&self) -> bool {
        matches!(self, Value::Free(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Value::Tuple(_))
    }

    pub fn tuple_elems(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(elems) => Some(elems),
            _ => None,
        }
    }

    /// Number of leading tuple fields that are not Free
    pub fn num_leading_defined(&self) -> Option<usize> {
        self.tuple_elems()
            .map(|elems| elems.iter().take_while(|e| !e.is_free()).count())
    }

    /// The first `len` fields of a tuple
    pub fn truncated(&self, len: usize) -> Option<Value> {
        match self {
            Value::Tuple(elems) if len <= elems.len() => Some(Value::Tuple(elems[..len].to_vec())),
            _ => None,
        }
    }

    /// Nesting depth. Anything stored inline or as raw bytes is 0, and a
    /// container is one deeper than its deepest child.
    pub fn depth(&self) -> u32 {
        match self {
            Value::Desc(inner) => inner.depth() + 1,
            Value::Opt(_, elem) => elem.as_ref().map_or(0, |v| v.depth()) + 1,
            Value::Set(_, elems) | Value::Vector(_, elems) | Value::Tuple(elems) => {
                elems.iter().map(Value::depth).max().unwrap_or(0) + 1
            }
            Value::Map(_, _, pairs) => {
                pairs
                    .iter()
                    .map(|(k, v)| k.depth().max(v.depth()))
                    .max()
                    .unwrap_or(0)
                    + 1
            }
            Value::Record(fields) => fields.iter().map(|(_, v)| v.depth()).max().unwrap_or(0) + 1,
            _ => 0,
        }
    }

    /// Little-endian payload of an inline scalar. `None` for anything stored
    /// out of line.
    pub(crate) fn inline_bytes(&self) -> Option<([u8; 16], usize)> {
        let mut out = [0u8; 16];
        let len = match self {
            Value::Int8(v) => put(&mut out, &v.to_le_bytes()),
            Value::Int16(v) => put(&mut out, &v.to_le_bytes()),
            Value::Int32(v) => put(&mut out, &v.to_le_bytes()),
            Value::Int64(v) => put(&mut out, &v.to_le_bytes()),
            Value::UInt8(v) => put(&mut out, &v.to_le_bytes()),
            Value::UInt16(v) => put(&mut out, &v.to_le_bytes()),
            Value::UInt32(v) => put(&mut out, &v.to_le_bytes()),
            Value::UInt64(v) => put(&mut out, &v.to_le_bytes()),
            Value::Bool(v) => put(&mut out, &[*v as u8]),
            Value::Char(v) => put(&mut out, &(*v as u32).to_le_bytes()),
            Value::Float(v) => put(&mut out, &v.to_bits().to_le_bytes()),
            Value::Double(v) => put(&mut out, &v.to_bits().to_le_bytes()),
            Value::Duration(v) | Value::TimePoint(v) => put(&mut out, &v.to_le_bytes()),
            Value::Uuid(v) => put(&mut out, v),
            Value::Tombstone | Value::Void => 0,
            _ => return None,
        };
        Some((out, len))
    }

    /// Rebuild an inline scalar from its kind and payload
    pub(crate) fn from_inline(kind: Kind, payload: &[u8; 16]) -> Result<Value> {
        let b = payload;
        let value = match kind {
            Kind::Int8 => Value::Int8(b[0] as i8),
            Kind::Int16 => Value::Int16(i16::from_le_bytes([b[0], b[1]])),
            Kind::Int32 => Value::Int32(i32::from_le_bytes(le4(b))),
            Kind::Int64 => Value::Int64(i64::from_le_bytes(le8(b))),
            Kind::UInt8 => Value::UInt8(b[0]),
            Kind::UInt16 => Value::UInt16(u16::from_le_bytes([b[0], b[1]])),
            Kind::UInt32 => Value::UInt32(u32::from_le_bytes(le4(b))),
            Kind::UInt64 => Value::UInt64(u64::from_le_bytes(le8(b))),
            Kind::Bool => Value::Bool(b[0] != 0),
            Kind::Char => {
                let code = u32::from_le_bytes(le4(b));
                Value::Char(char::from_u32(code).ok_or_else(|| {
                    SabotError::Serialization(format!("invalid char code point {:#x}", code))
                })?)
            }
            Kind::Float => Value::Float(f32::from_bits(u32::from_le_bytes(le4(b)))),
            Kind::Double => Value::Double(f64::from_bits(u64::from_le_bytes(le8(b)))),
            Kind::Duration => Value::Duration(i64::from_le_bytes(le8(b))),
            Kind::TimePoint => Value::TimePoint(i64::from_le_bytes(le8(b))),
            Kind::Uuid => Value::Uuid(*b),
            Kind::Tombstone => Value::Tombstone,
            Kind::Void => Value::Void,
            other => {
                return Err(SabotError::Invariant(format!(
                    "kind {} is not stored inline",
                    other
                )))
            }
        };
        Ok(value)
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn check_elem_type(expected: &Type, value: &Value) -> Result<()> {
    let actual = value.ty();
    if &actual != expected {
        return Err(SabotError::Invariant(format!(
            "element of type {} in a container of {}",
            actual, expected
        )));
    }
    Ok(())
}

fn put(out: &mut [u8; 16], bytes: &[u8]) -> usize {
    out[..bytes.len()].copy_from_slice(bytes);
    bytes.len()
}

fn le4(b: &[u8; 16]) -> [u8; 4] {
    [b[0], b[1], b[2], b[3]]
}

fn le8(b: &[u8; 16]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}
