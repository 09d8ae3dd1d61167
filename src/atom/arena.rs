//! Arena and Note views
//!
//! An arena is a growable byte buffer of notes. Notes are addressed by their
//! byte offset, never by pointer, and are only ever read through a borrowed
//! [`Note`] view.
//!
//! ## Note Layout (8-byte aligned)
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ note_len u32 │ kind u8 │ pad (3) │ type_len u32 │ count u32  │  header
//! ├──────────────────────────────────────────────────────────────┤
//! │ bincode(Type), padded to 8                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ payload: raw bytes (str, blob) padded to 8                   │
//! │       or child Cores (map: key, value per pair)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SabotError};
use crate::sabot::{Kind, Type, Value};

use super::core::{Core, CORE_SIZE};

/// Fixed note header size
pub const NOTE_HEADER_SIZE: usize = 16;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique arena identity, used to key offset remapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArenaId(u64);

/// Owning byte buffer of notes
#[derive(Debug)]
pub struct Arena {
    id: ArenaId,
    buf: Vec<u8>,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    pub fn new() -> Self {
        Self {
            id: ArenaId(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed)),
            buf: Vec::new(),
        }
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Bytes used by notes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Store a value, returning the Core that refers to it. Inline scalars
    /// take no arena space; containers store their children first.
    pub fn intern(&mut self, value: &Value) -> Result<Core> {
        if let Some(core) = Core::inline(value) {
            return Ok(core);
        }
        let ty_bytes = value.ty().to_bytes()?;
        let kind = value.kind();
        match value {
            Value::Str(s) => self.push_note(kind, &ty_bytes, s.len(), NotePayload::Raw(s.as_bytes())),
            Value::Blob(b) => self.push_note(kind, &ty_bytes, b.len(), NotePayload::Raw(b)),
            Value::Free(_) => self.push_note(kind, &ty_bytes, 0, NotePayload::Cores(&[])),
            Value::Desc(inner) => {
                let child = self.intern(inner)?;
                self.push_note(kind, &ty_bytes, 1, NotePayload::Cores(&[child]))
            }
            Value::Opt(_, elem) => {
                let children = match elem {
                    Some(v) => vec![self.intern(v)?],
                    None => Vec::new(),
                };
                self.push_note(kind, &ty_bytes, children.len(), NotePayload::Cores(&children))
            }
            Value::Set(_, elems) | Value::Vector(_, elems) | Value::Tuple(elems) => {
                let children = elems.iter().map(|e| self.intern(e)).collect::<Result<Vec<_>>>()?;
                self.push_note(kind, &ty_bytes, children.len(), NotePayload::Cores(&children))
            }
            Value::Record(fields) => {
                let children = fields
                    .iter()
                    .map(|(_, v)| self.intern(v))
                    .collect::<Result<Vec<_>>>()?;
                self.push_note(kind, &ty_bytes, children.len(), NotePayload::Cores(&children))
            }
            Value::Map(_, _, pairs) => {
                let mut children = Vec::with_capacity(pairs.len() * 2);
                for (k, v) in pairs {
                    children.push(self.intern(k)?);
                    children.push(self.intern(v)?);
                }
                self.push_note(kind, &ty_bytes, pairs.len(), NotePayload::Cores(&children))
            }
            other => Err(SabotError::Invariant(format!(
                "kind {} has no note representation",
                other.kind()
            ))),
        }
    }

    pub fn note(&self, offset: u64) -> Result<Note<'_>> {
        let start = usize::try_from(offset)
            .map_err(|_| SabotError::Invariant(format!("note offset {} out of range", offset)))?;
        let header = self.buf.get(start..start + NOTE_HEADER_SIZE).ok_or_else(|| {
            SabotError::Invariant(format!("note offset {} beyond arena of {} bytes", offset, self.buf.len()))
        })?;
        let len = note_len(header)?;
        let bytes = self.buf.get(start..start + len).ok_or_else(|| {
            SabotError::Invariant(format!("note at {} overruns the arena", offset))
        })?;
        Note::parse(bytes)
    }

    pub fn decode(&self, core: &Core) -> Result<Value> {
        decode_core(self, core)
    }

    fn push_note(&mut self, kind: Kind, ty_bytes: &[u8], count: usize, payload: NotePayload<'_>) -> Result<Core> {
        let count = u32::try_from(count)
            .map_err(|_| SabotError::Unsupported(format!("{} elements in one note", count)))?;
        let type_len = u32::try_from(ty_bytes.len())
            .map_err(|_| SabotError::Unsupported("note type too large".to_string()))?;
        let payload_len = match payload {
            NotePayload::Raw(raw) => pad8(raw.len()),
            NotePayload::Cores(cores) => cores.len() * CORE_SIZE,
        };
        let total = NOTE_HEADER_SIZE + pad8(ty_bytes.len()) + payload_len;
        let note_len = u32::try_from(total)
            .map_err(|_| SabotError::Unsupported(format!("note of {} bytes", total)))?;

        self.buf.try_reserve(total)?;
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(&note_len.to_le_bytes());
        self.buf.extend_from_slice(&[kind.tag(), 0, 0, 0]);
        self.buf.extend_from_slice(&type_len.to_le_bytes());
        self.buf.extend_from_slice(&count.to_le_bytes());
        self.buf.extend_from_slice(ty_bytes);
        self.pad_to_8();
        match payload {
            NotePayload::Raw(raw) => {
                self.buf.extend_from_slice(raw);
                self.pad_to_8();
            }
            NotePayload::Cores(cores) => {
                for core in cores {
                    self.buf.extend_from_slice(&core.to_bytes());
                }
            }
        }
        Ok(Core::indirect(kind, offset, count))
    }

    fn pad_to_8(&mut self) {
        let padded = pad8(self.buf.len());
        self.buf.resize(padded, 0);
    }
}

enum NotePayload<'a> {
    Raw(&'a [u8]),
    Cores(&'a [Core]),
}

// =============================================================================
// Note View
// =============================================================================

/// Borrowed view of one note's bytes
#[derive(Debug, Clone, Copy)]
pub struct Note<'a> {
    bytes: &'a [u8],
}

impl<'a> Note<'a> {
    /// Validate and wrap a complete note
    pub fn parse(bytes: &'a [u8]) -> Result<Note<'a>> {
        let len = note_len(bytes)?;
        if bytes.len() < len {
            return Err(SabotError::Serialization(format!(
                "note claims {} bytes, {} available",
                len,
                bytes.len()
            )));
        }
        let note = Note { bytes: &bytes[..len] };
        let kind = note.kind()?;
        let needed = note.payload_start() + note.payload_len(kind);
        if needed > len {
            return Err(SabotError::Serialization(format!(
                "{} note of {} bytes needs {}",
                kind, len, needed
            )));
        }
        Ok(note)
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn kind(&self) -> Result<Kind> {
        Kind::from_u8(self.bytes[4])
            .ok_or_else(|| SabotError::Serialization(format!("invalid note kind tag {}", self.bytes[4])))
    }

    pub fn elem_count(&self) -> u32 {
        read_u32(self.bytes, 12)
    }

    pub fn ty(&self) -> Result<Type> {
        let start = NOTE_HEADER_SIZE;
        Type::from_bytes(&self.bytes[start..start + self.type_len()])
    }

    /// Raw bytes of a `Str` or `Blob` note
    pub fn raw(&self) -> &'a [u8] {
        let start = self.payload_start();
        &self.bytes[start..start + self.elem_count() as usize]
    }

    /// Child cores held in the payload
    pub fn num_children(&self) -> usize {
        match self.kind() {
            Ok(Kind::Str) | Ok(Kind::Blob) | Err(_) => 0,
            Ok(Kind::Map) => self.elem_count() as usize * 2,
            Ok(_) => self.elem_count() as usize,
        }
    }

    pub fn child(&self, idx: usize) -> Result<Core> {
        if idx >= self.num_children() {
            return Err(SabotError::Invariant(format!(
                "child {} of a note with {}",
                idx,
                self.num_children()
            )));
        }
        let at = self.payload_start() + idx * CORE_SIZE;
        Core::from_bytes(&self.bytes[at..at + CORE_SIZE])?
            .ok_or_else(|| SabotError::Serialization("empty core inside a note".to_string()))
    }

    pub fn children(&self) -> impl Iterator<Item = Result<Core>> + '_ {
        (0..self.num_children()).map(move |i| self.child(i))
    }

    fn type_len(&self) -> usize {
        read_u32(self.bytes, 8) as usize
    }

    fn payload_start(&self) -> usize {
        NOTE_HEADER_SIZE + pad8(self.type_len())
    }

    fn payload_len(&self, kind: Kind) -> usize {
        match kind {
            Kind::Str | Kind::Blob => self.elem_count() as usize,
            _ => self.num_children() * CORE_SIZE,
        }
    }
}

/// Total length of the note whose header starts `header`
pub fn note_len(header: &[u8]) -> Result<usize> {
    if header.len() < NOTE_HEADER_SIZE {
        return Err(SabotError::Serialization("truncated note header".to_string()));
    }
    let len = read_u32(header, 0) as usize;
    if len < NOTE_HEADER_SIZE || len % 8 != 0 {
        return Err(SabotError::Serialization(format!("bad note length {}", len)));
    }
    Ok(len)
}

/// Rewrite every child core offset of a copied note
pub fn remap_children(bytes: &mut [u8], mut remap: impl FnMut(&Core) -> Result<u64>) -> Result<()> {
    let note = Note::parse(bytes)?;
    let start = note.payload_start();
    let count = note.num_children();
    for i in 0..count {
        let at = start + i * CORE_SIZE;
        let slot = &mut bytes[at..at + CORE_SIZE];
        if let Some(mut core) = Core::from_bytes(slot)? {
            if core.offset().is_some() {
                let offset = remap(&core)?;
                core.remap(offset);
                slot.copy_from_slice(&core.to_bytes());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Anything that can hand out a note's bytes by offset
pub trait NoteSource {
    fn note_bytes(&self, offset: u64) -> Result<Cow<'_, [u8]>>;
}

impl NoteSource for Arena {
    fn note_bytes(&self, offset: u64) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(self.note(offset)?.bytes()))
    }
}

/// Resolve a core through its arena into a value
pub fn decode_core<S: NoteSource + ?Sized>(source: &S, core: &Core) -> Result<Value> {
    let kind = core.kind()?;
    if kind.is_inline() {
        return Value::from_inline(kind, &core.payload());
    }
    let offset = core
        .offset()
        .ok_or_else(|| SabotError::Invariant(format!("{} core without an offset", kind)))?;
    let bytes = source.note_bytes(offset)?;
    let note = Note::parse(&bytes)?;
    if note.kind()? != kind {
        return Err(SabotError::Serialization(format!(
            "{} core points at a {} note",
            kind,
            note.kind()?
        )));
    }
    decode_note(source, &note, core.elem_count())
}

fn decode_note<S: NoteSource + ?Sized>(source: &S, note: &Note<'_>, count: u32) -> Result<Value> {
    let children = |n: usize| -> Result<Vec<Value>> {
        (0..n).map(|i| decode_core(source, &note.child(i)?)).collect()
    };
    let value = match note.ty()? {
        Type::Str => Value::Str(
            String::from_utf8(note.raw().to_vec())
                .map_err(|e| SabotError::Serialization(format!("invalid utf-8 in str note: {}", e)))?,
        ),
        Type::Blob => Value::Blob(note.raw().to_vec()),
        Type::Free(inner) => Value::Free(*inner),
        Type::Desc(_) => Value::Desc(Box::new(decode_core(source, &note.child(0)?)?)),
        Type::Opt(inner) => {
            let elem = match note.elem_count() {
                0 => None,
                _ => Some(Box::new(decode_core(source, &note.child(0)?)?)),
            };
            Value::Opt(*inner, elem)
        }
        Type::Set(elem) => Value::Set(*elem, children(note.elem_count() as usize)?),
        Type::Vector(elem) => Value::Vector(*elem, children(note.elem_count() as usize)?),
        Type::Map(key, val) => {
            let flat = children(note.num_children())?;
            let mut pairs = Vec::with_capacity(flat.len() / 2);
            let mut it = flat.into_iter();
            while let (Some(k), Some(v)) = (it.next(), it.next()) {
                pairs.push((k, v));
            }
            Value::Map(*key, *val, pairs)
        }
        Type::Record(fields) => {
            let values = children(note.elem_count() as usize)?;
            Value::Record(fields.into_iter().map(|(name, _)| name).zip(values).collect())
        }
        Type::Tuple(_) => {
            if count > note.elem_count() {
                return Err(SabotError::Serialization(format!(
                    "tuple core of {} fields on a note of {}",
                    count,
                    note.elem_count()
                )));
            }
            Value::Tuple(children(count as usize)?)
        }
        other => {
            return Err(SabotError::Serialization(format!(
                "{} stored as a note",
                other.kind()
            )))
        }
    };
    Ok(value)
}

// =============================================================================
// Private Helpers
// =============================================================================

pub(crate) fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
