//! Type model
//!
//! A closed set of kinds. Scalars carry no payload, unary wrappers carry one
//! inner type, `Map` carries two, `Record` an ordered list of named fields and
//! `Tuple` an ordered list of element types.

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::Kind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    Char,
    Float,
    Double,
    Duration,
    TimePoint,
    Uuid,
    Blob,
    Str,
    Tombstone,
    Void,
    /// Described (reverse-ordered) wrapper
    Desc(Box<Type>),
    /// Unbound placeholder used by partially specified queries
    Free(Box<Type>),
    Opt(Box<Type>),
    Set(Box<Type>),
    Vector(Box<Type>),
    Map(Box<Type>, Box<Type>),
    /// Fields in declaration order
    Record(Vec<(String, Type)>),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn kind(&self) -> Kind {
        match self {
            Type::Int8 => Kind::Int8,
            Type::Int16 => Kind::Int16,
            Type::Int32 => Kind::Int32,
            Type::Int64 => Kind::Int64,
            Type::UInt8 => Kind::UInt8,
            Type::UInt16 => Kind::UInt16,
            Type::UInt32 => Kind::UInt32,
            Type::UInt64 => Kind::UInt64,
            Type::Bool => Kind::Bool,
            Type::Char => Kind::Char,
            Type::Float => Kind::Float,
            Type::Double => Kind::Double,
            Type::Duration => Kind::Duration,
            Type::TimePoint => Kind::TimePoint,
            Type::Uuid => Kind::Uuid,
            Type::Blob => Kind::Blob,
            Type::Str => Kind::Str,
            Type::Tombstone => Kind::Tombstone,
            Type::Void => Kind::Void,
            Type::Desc(_) => Kind::Desc,
            Type::Free(_) => Kind::Free,
            Type::Opt(_) => Kind::Opt,
            Type::Set(_) => Kind::Set,
            Type::Vector(_) => Kind::Vector,
            Type::Map(_, _) => Kind::Map,
            Type::Record(_) => Kind::Record,
            Type::Tuple(_) => Kind::Tuple,
        }
    }

    /// The scalar type of a payload-free kind, if it is one
    pub fn scalar(kind: Kind) -> Option<Type> {
        let ty = match kind {
            Kind::Int8 => Type::Int8,
            Kind::Int16 => Type::Int16,
            Kind::Int32 => Type::Int32,
            Kind::Int64 => Type::Int64,
            Kind::UInt8 => Type::UInt8,
            Kind::UInt16 => Type::UInt16,
            Kind::UInt32 => Type::UInt32,
            Kind::UInt64 => Type::UInt64,
            Kind::Bool => Type::Bool,
            Kind::Char => Type::Char,
            Kind::Float => Type::Float,
            Kind::Double => Type::Double,
            Kind::Duration => Type::Duration,
            Kind::TimePoint => Type::TimePoint,
            Kind::Uuid => Type::Uuid,
            Kind::Blob => Type::Blob,
            Kind::Str => Type::Str,
            Kind::Tombstone => Type::Tombstone,
            Kind::Void => Type::Void,
            _ => return None,
        };
        Some(ty)
    }

    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    pub fn desc(inner: Type) -> Type {
        Type::Desc(Box::new(inner))
    }

    pub fn free(inner: Type) -> Type {
        Type::Free(Box::new(inner))
    }

    pub fn opt(inner: Type) -> Type {
        Type::Opt(Box::new(inner))
    }

    pub fn set(elem: Type) -> Type {
        Type::Set(Box::new(elem))
    }

    pub fn vector(elem: Type) -> Type {
        Type::Vector(Box::new(elem))
    }

    pub fn map(key: Type, val: Type) -> Type {
        Type::Map(Box::new(key), Box::new(val))
    }

    pub fn record<N: Into<String>>(fields: impl IntoIterator<Item = (N, Type)>) -> Type {
        Type::Record(fields.into_iter().map(|(name, ty)| (name.into(), ty)).collect())
    }

    pub fn tuple(elems: impl IntoIterator<Item = Type>) -> Type {
        Type::Tuple(elems.into_iter().collect())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn is_tuple(&self) -> bool {
        matches!(self, Type::Tuple(_))
    }

    pub fn tuple_len(&self) -> Option<usize> {
        match self {
            Type::Tuple(elems) => Some(elems.len()),
            _ => None,
        }
    }

    /// The first `len` element types of a tuple
    pub fn truncated(&self, len: usize) -> Option<Type> {
        match self {
            Type::Tuple(elems) if len <= elems.len() => Some(Type::Tuple(elems[..len].to_vec())),
            _ => None,
        }
    }

    /// Canonical bytes embedded in note headers
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Type> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Desc(t) | Type::Free(t) | Type::Opt(t) | Type::Set(t) | Type::Vector(t) => {
                write!(f, "{}<{}>", self.kind(), t)
            }
            Type::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            Type::Record(fields) => {
                f.write_str("{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                f.write_str("}")
            }
            Type::Tuple(elems) => {
                f.write_str("(")?;
                for (i, ty) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", ty)?;
                }
                f.write_str(")")
            }
            scalar => f.write_str(scalar.kind().name()),
        }
    }
}
