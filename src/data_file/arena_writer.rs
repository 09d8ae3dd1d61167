//! Arena section writer
//!
//! Every note reachable from a group of cores is collected once, sorted so
//! that structurally equal notes are adjacent and children precede their
//! parents, then written with duplicates merged. The [`RemapIndex`] maps each
//! original `(arena, offset)` to the note's offset in the written section.
//!
//! ```text
//!   update arenas ──collect──► IndexManager<OrderedNote> ──sorted──► dedup ──► [ note | note | ... ]
//!                                (depth, state, type)                   │
//!                                                                        └─► RemapIndex
//! ```

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::atom::{decode_core, remap_children, Arena, ArenaId, Core};
use crate::config::Config;
use crate::disk::{BlockVec, CollisionBlocks, IndexManager, OrderFn, OutStream};
use crate::error::{Result, SabotError};
use crate::sabot::{canonical_order, compare_states, compare_types, same_encoding, Comparison, Type, Value};

use super::BuildCtx;

/// One note awaiting placement, with the decoded value it sorts by
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OrderedNote {
    depth: u32,
    value: Value,
    ty: Type,
    ty_bytes: Vec<u8>,
    arena: ArenaId,
    offset: u64,
    len: u64,
}

/// Depth first, then value, then type. Adjacent notes are merged only when
/// they compare `Equal` and share a canonical encoding.
pub(crate) fn note_order(lhs: &OrderedNote, rhs: &OrderedNote) -> Ordering {
    lhs.depth
        .cmp(&rhs.depth)
        .then_with(|| state_order(&lhs.value, &rhs.value))
        .then_with(|| compare_types(&lhs.ty, &rhs.ty).to_ordering().unwrap_or(Ordering::Equal))
        .then_with(|| lhs.ty_bytes.cmp(&rhs.ty_bytes))
        .then_with(|| canonical_order(&lhs.value, &rhs.value))
}

fn state_order(lhs: &Value, rhs: &Value) -> Ordering {
    match compare_states(lhs, rhs).ok().and_then(Comparison::to_ordering) {
        Some(ordering) => ordering,
        None => canonical_order(lhs, rhs),
    }
}

// =============================================================================
// Remap Index
// =============================================================================

/// `(arena, in-memory offset)` → offset within the written arena section
#[derive(Debug, Default)]
pub(crate) struct RemapIndex {
    map: HashMap<(ArenaId, u64), u64>,
}

impl RemapIndex {
    fn insert(&mut self, arena: ArenaId, offset: u64, disk_offset: u64) {
        self.map.insert((arena, offset), disk_offset);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn lookup(&self, arena: ArenaId, core: &Core) -> Result<u64> {
        let offset = core
            .offset()
            .ok_or_else(|| SabotError::Invariant("remap of an inline core".to_string()))?;
        self.map.get(&(arena, offset)).copied().ok_or_else(|| {
            SabotError::Invariant(format!("note at {} of arena {:?} was never written", offset, arena))
        })
    }

    /// A copy of `core` pointing into the written section
    pub fn remap_core(&self, arena: ArenaId, core: &Core) -> Result<Core> {
        let mut out = *core;
        if core.offset().is_some() {
            out.remap(self.lookup(arena, core)?);
        }
        Ok(out)
    }
}

// =============================================================================
// Collecting
// =============================================================================

/// Gathers every note reachable from the cores it is given, once each
pub(crate) struct NoteCollector {
    notes: IndexManager<OrderedNote>,
    seen: HashSet<(ArenaId, u64)>,
    max_bytes: u64,
}

impl NoteCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            notes: IndexManager::new(config, note_order as OrderFn<OrderedNote>),
            seen: HashSet::new(),
            max_bytes: 0,
        }
    }

    /// Bytes needed if no note turns out to be a duplicate
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn collect(&mut self, arena: &Arena, core: &Core) -> Result<()> {
        let Some(offset) = core.offset() else {
            return Ok(());
        };
        if !self.seen.insert((arena.id(), offset)) {
            return Ok(());
        }
        let note = arena.note(offset)?;
        for child in note.children() {
            self.collect(arena, &child?)?;
        }
        let kind = note.kind()?;
        let value = decode_core(arena, &Core::indirect(kind, offset, note.elem_count()))?;
        let ty = note.ty()?;
        self.max_bytes += note.len() as u64;
        self.notes.emplace(OrderedNote {
            depth: value.depth(),
            ty_bytes: ty.to_bytes()?,
            ty,
            value,
            arena: arena.id(),
            offset,
            len: note.len() as u64,
        })
    }
}

// =============================================================================
// Writing
// =============================================================================

/// A written arena section
#[derive(Debug, Default)]
pub(crate) struct ArenaSection {
    pub byte_offset: u64,
    pub note_count: u64,
    pub byte_count: u64,
    /// Section-relative offsets where the note type changes
    pub boundaries: Vec<u64>,
    pub remap: RemapIndex,
}

/// Write the collected notes as one arena section at the end of `blocks`
pub(crate) fn make_arena(
    ctx: &BuildCtx<'_>,
    blocks: &mut BlockVec,
    collector: NoteCollector,
    arenas: &HashMap<ArenaId, &Arena>,
) -> Result<ArenaSection> {
    let start_idx = blocks.len();
    let byte_offset = start_idx as u64 * ctx.block_size;
    let mut section = ArenaSection {
        byte_offset,
        ..ArenaSection::default()
    };
    if collector.len() == 0 {
        return Ok(section);
    }
    ctx.reserve(blocks, ctx.blocks_for(collector.max_bytes()))?;

    let collisions = CollisionBlocks::new(ctx.block_size as usize);
    let mut out = OutStream::new(&ctx.writer, &*blocks, &collisions, &ctx.trigger, byte_offset);
    let mut scratch: Vec<u8> = Vec::new();
    let mut prev: Option<(OrderedNote, u64)> = None;

    for note in collector.notes.cursor(ctx.config.merge_batch_size)? {
        let note = note?;
        if let Some((last, disk_offset)) = &prev {
            if note_order(last, &note) == Ordering::Equal && same_encoding(&last.value, &note.value)? {
                section.remap.insert(note.arena, note.offset, *disk_offset);
                continue;
            }
        }

        let source = arenas.get(&note.arena).ok_or_else(|| {
            SabotError::Invariant(format!("arena {:?} is not part of this layer", note.arena))
        })?;
        let bytes = source.note(note.offset)?.bytes();
        if bytes.len() as u64 != note.len {
            return Err(SabotError::Invariant(format!(
                "note at {} changed size from {} to {} bytes",
                note.offset,
                note.len,
                bytes.len()
            )));
        }
        scratch.clear();
        scratch.try_reserve(bytes.len())?;
        scratch.extend_from_slice(bytes);
        let remap = &section.remap;
        remap_children(&mut scratch, |child| remap.lookup(note.arena, child))?;

        let disk_offset = out.offset() - byte_offset;
        match &prev {
            None => section.boundaries.push(0),
            Some((last, _)) if compare_types(&last.ty, &note.ty) != Comparison::Eq => {
                section.boundaries.push(disk_offset)
            }
            Some(_) => {}
        }
        out.write(&scratch)?;
        section.remap.insert(note.arena, note.offset, disk_offset);
        section.note_count += 1;
        prev = Some((note, disk_offset));
    }
    section.byte_count = out.finish()? - byte_offset;

    ctx.trigger.wait()?;
    ctx.trim(blocks, start_idx + ctx.blocks_for(section.byte_count))?;
    tracing::debug!(
        notes = section.note_count,
        bytes = section.byte_count,
        remapped = section.remap.len(),
        boundaries = section.boundaries.len(),
        "Wrote arena section"
    );
    Ok(section)
}
