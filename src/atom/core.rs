//! Core - fixed-size value reference
//!
//! ```text
//! ┌──────┬───────┬──────────┬───────────┬──────────────────┬───────────┐
//! │ kind │ flags │ reserved │ count u32 │ payload (16)     │ hash u64  │
//! │  u8  │  u8   │   u16    │           │ inline | offset  │ (stored)  │
//! └──────┴───────┴──────────┴───────────┴──────────────────┴───────────┘
//!    0      1        2          4             8                 24
//! ```
//!
//! Inline scalars keep their little-endian bytes in the payload. Everything
//! else keeps the offset of its note in the owning arena, plus an element
//! count (byte length for `Str`/`Blob`). A Core is meaningless without the
//! arena its offset points into. A zero kind byte is the empty slot.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SabotError};
use crate::sabot::{Kind, Value};

/// Size of a Core on disk and in notes
pub const CORE_SIZE: usize = 32;

const KIND_AT: usize = 0;
const FLAGS_AT: usize = 1;
const COUNT_AT: usize = 4;
const PAYLOAD_AT: usize = 8;
const HASH_AT: usize = 24;

const FLAG_STORES_HASH: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Core {
    bytes: [u8; CORE_SIZE],
}

impl Core {
    /// Core for an inline scalar, `None` for out-of-line values
    pub fn inline(value: &Value) -> Option<Core> {
        let (payload, len) = value.inline_bytes()?;
        let mut bytes = [0u8; CORE_SIZE];
        bytes[KIND_AT] = value.kind().tag();
        bytes[PAYLOAD_AT..PAYLOAD_AT + len].copy_from_slice(&payload[..len]);
        Some(Core { bytes })
    }

    /// Core pointing at a note
    pub fn indirect(kind: Kind, offset: u64, count: u32) -> Core {
        let mut bytes = [0u8; CORE_SIZE];
        bytes[KIND_AT] = kind.tag();
        bytes[COUNT_AT..COUNT_AT + 4].copy_from_slice(&count.to_le_bytes());
        bytes[PAYLOAD_AT..PAYLOAD_AT + 8].copy_from_slice(&offset.to_le_bytes());
        Core { bytes }
    }

    pub fn kind(&self) -> Result<Kind> {
        Kind::from_u8(self.bytes[KIND_AT]).ok_or_else(|| {
            SabotError::Serialization(format!("invalid core kind tag {}", self.bytes[KIND_AT]))
        })
    }

    pub fn is_tuple(&self) -> bool {
        self.bytes[KIND_AT] == Kind::Tuple.tag()
    }

    /// Arena offset of the note, if this core has one
    pub fn offset(&self) -> Option<u64> {
        match self.kind() {
            Ok(kind) if !kind.is_inline() => Some(u64::from_le_bytes(self.payload8())),
            _ => None,
        }
    }

    /// Elements (or bytes) in the referenced note
    pub fn elem_count(&self) -> u32 {
        u32::from_le_bytes([
            self.bytes[COUNT_AT],
            self.bytes[COUNT_AT + 1],
            self.bytes[COUNT_AT + 2],
            self.bytes[COUNT_AT + 3],
        ])
    }

    pub fn payload(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.bytes[PAYLOAD_AT..PAYLOAD_AT + 16]);
        out
    }

    /// Point this core at a new offset. Inline cores are left alone.
    pub fn remap(&mut self, offset: u64) {
        if self.offset().is_some() {
            self.bytes[PAYLOAD_AT..PAYLOAD_AT + 8].copy_from_slice(&offset.to_le_bytes());
        }
    }

    pub fn stored_hash(&self) -> Option<u64> {
        if self.bytes[FLAGS_AT] & FLAG_STORES_HASH == 0 {
            return None;
        }
        let mut h = [0u8; 8];
        h.copy_from_slice(&self.bytes[HASH_AT..HASH_AT + 8]);
        Some(u64::from_le_bytes(h))
    }

    pub fn set_stored_hash(&mut self, hash: u64) {
        self.bytes[FLAGS_AT] |= FLAG_STORES_HASH;
        self.bytes[HASH_AT..HASH_AT + 8].copy_from_slice(&hash.to_le_bytes());
    }

    pub fn clear_stored_hash(&mut self) {
        self.bytes[FLAGS_AT] &= !FLAG_STORES_HASH;
        self.bytes[HASH_AT..HASH_AT + 8].fill(0);
    }

    /// Drop the last field of a tuple core. Only applies to tuples with more
    /// than one field; the stored hash no longer holds and is cleared.
    pub fn try_truncate_tuple(&mut self) -> bool {
        let count = self.elem_count();
        if !self.is_tuple() || count <= 1 {
            return false;
        }
        self.bytes[COUNT_AT..COUNT_AT + 4].copy_from_slice(&(count - 1).to_le_bytes());
        self.clear_stored_hash();
        true
    }

    pub fn to_bytes(&self) -> [u8; CORE_SIZE] {
        self.bytes
    }

    /// Encode an optional core; the empty slot is all zeroes
    pub fn encode(core: Option<&Core>) -> [u8; CORE_SIZE] {
        core.map_or([0u8; CORE_SIZE], Core::to_bytes)
    }

    /// Decode a core slot. A zero kind tag is the empty slot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Core>> {
        if bytes.len() < CORE_SIZE {
            return Err(SabotError::Serialization(format!(
                "core needs {} bytes, got {}",
                CORE_SIZE,
                bytes.len()
            )));
        }
        if bytes[KIND_AT] == 0 {
            return Ok(None);
        }
        let mut out = [0u8; CORE_SIZE];
        out.copy_from_slice(&bytes[..CORE_SIZE]);
        let core = Core { bytes: out };
        core.kind()?;
        Ok(Some(core))
    }

    fn payload8(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.bytes[PAYLOAD_AT..PAYLOAD_AT + 8]);
        out
    }
}
