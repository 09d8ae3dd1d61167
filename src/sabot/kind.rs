//! Kind tags
//!
//! The discriminant doubles as the kind rank used by every cross-kind
//! comparison, and as the tag byte stored in a Core. Tag 0 is reserved for
//! an empty hash slot.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Kind {
    Int8 = 1,
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
    Desc,
    Free,
    Opt,
    Set,
    Vector,
    Map,
    Record,
    Tuple,
}

const ALL_KINDS: [Kind; 27] = [
    Kind::Int8,
    Kind::Int16,
    Kind::Int32,
    Kind::Int64,
    Kind::UInt8,
    Kind::UInt16,
    Kind::UInt32,
    Kind::UInt64,
    Kind::Bool,
    Kind::Char,
    Kind::Float,
    Kind::Double,
    Kind::Duration,
    Kind::TimePoint,
    Kind::Uuid,
    Kind::Blob,
    Kind::Str,
    Kind::Tombstone,
    Kind::Void,
    Kind::Desc,
    Kind::Free,
    Kind::Opt,
    Kind::Set,
    Kind::Vector,
    Kind::Map,
    Kind::Record,
    Kind::Tuple,
];

impl Kind {
    pub fn from_u8(tag: u8) -> Option<Kind> {
        match tag {
            1..=27 => Some(ALL_KINDS[tag as usize - 1]),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Position in the fixed kind order
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn all() -> &'static [Kind] {
        &ALL_KINDS
    }

    /// Kinds whose values live entirely inside a Core
    pub fn is_inline(self) -> bool {
        matches!(
            self,
            Kind::Int8
                | Kind::Int16
                | Kind::Int32
                | Kind::Int64
                | Kind::UInt8
                | Kind::UInt16
                | Kind::UInt32
                | Kind::UInt64
                | Kind::Bool
                | Kind::Char
                | Kind::Float
                | Kind::Double
                | Kind::Duration
                | Kind::TimePoint
                | Kind::Uuid
                | Kind::Tombstone
                | Kind::Void
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Int8 => "int8",
            Kind::Int16 => "int16",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::UInt8 => "uint8",
            Kind::UInt16 => "uint16",
            Kind::UInt32 => "uint32",
            Kind::UInt64 => "uint64",
            Kind::Bool => "bool",
            Kind::Char => "char",
            Kind::Float => "float",
            Kind::Double => "double",
            Kind::Duration => "duration",
            Kind::TimePoint => "time_point",
            Kind::Uuid => "uuid",
            Kind::Blob => "blob",
            Kind::Str => "str",
            Kind::Tombstone => "tombstone",
            Kind::Void => "void",
            Kind::Desc => "desc",
            Kind::Free => "free",
            Kind::Opt => "opt",
            Kind::Set => "set",
            Kind::Vector => "vector",
            Kind::Map => "map",
            Kind::Record => "record",
            Kind::Tuple => "tuple",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
