//! Per-index sections: index meta, key range, history and hash tables
//!
//! ## Key Range Layout
//! ```text
//!   ┌────────────┬──────────────────────────────┬─────────────────────────┐
//!   │ index meta │ current keys (88 bytes each) │ history (72 bytes each) │
//!   └────────────┴──────────────────────────────┴─────────────────────────┘
//!   ▲ collision block: meta is written last, after the hash tables
//!
//!   current key: seq u64 │ key Core │ val Core │ num_hist u64 │ hist_off u64
//!   history:     seq u64 │ key Core │ val Core
//! ```
//!
//! ## Hash Tables
//! One table per key prefix length, packed back to back in one region. A slot
//! is `key Core (prefix, with stored hash) │ key offset u64`, or all zeroes
//! when empty. Entries are placed in bucket order; those that run off the end
//! of the table are placed by a second pass into the first empty slots from
//! the start.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::mem;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::atom::Core;
use crate::config::Config;
use crate::disk::{
    BlockReader, BlockVec, CollisionBlocks, InStream, IndexManager, OrderFn, OutStream,
};
use crate::error::{Result, SabotError};
use crate::layer::{EntryRef, IndexId};
use crate::sabot::{get_hash, suggest_hash_size, total_state_order, Value};

use super::arena_writer::{ArenaSection, RemapIndex};
use super::update_index::UpdatePtr;
use super::{BuildCtx, HASH_ENTRY_SIZE, HISTORY_ENTRY_SIZE, INDEX_META_FIELDS, KEY_ENTRY_SIZE};

/// One slot's worth of a hash table
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct HashEntry {
    core: Core,
    hash: u64,
    key_offset: u64,
}

fn by_key_offset(lhs: &HashEntry, rhs: &HashEntry) -> Ordering {
    lhs.key_offset.cmp(&rhs.key_offset)
}

struct HistoryRecord {
    seq: u64,
    key: Core,
    val: Core,
}

/// State of the key pass over one index's sorted entries
struct KeyState {
    num_cur_keys: u64,
    num_hist_keys: u64,
    /// `num_hist_keys` when the open key was written
    open_key: Option<u64>,
    prev_key: Option<Value>,
    history: Vec<HistoryRecord>,
    /// Last prefix collected, per prefix length
    seen: Vec<Option<Value>>,
    collectors: Vec<IndexManager<HashEntry>>,
}

impl KeyState {
    fn new(num_fields: usize, config: &Config) -> Self {
        Self {
            num_cur_keys: 0,
            num_hist_keys: 0,
            open_key: None,
            prev_key: None,
            history: Vec::new(),
            seen: vec![None; num_fields],
            collectors: (0..num_fields)
                .map(|_| IndexManager::new(config, by_key_offset as OrderFn<HashEntry>))
                .collect(),
        }
    }

    fn push_key(
        &mut self,
        out: &mut OutStream<'_>,
        entry: &EntryRef<'_>,
        key_remap: &RemapIndex,
        main_remap: &RemapIndex,
        updates: &mut IndexManager<UpdatePtr>,
        index: u32,
    ) -> Result<()> {
        let arena = entry.arena.id();
        let mut key = key_remap.remap_core(arena, &entry.key_core)?;
        let val = main_remap.remap_core(arena, &entry.op_core)?;
        let meta = main_remap.remap_core(arena, &entry.meta_core)?;
        let id = main_remap.remap_core(arena, &entry.id_core)?;

        let is_new = match &self.prev_key {
            Some(prev) => total_state_order(prev, entry.key) != Ordering::Equal,
            None => true,
        };
        if !is_new {
            let ptr = self.num_hist_keys * HISTORY_ENTRY_SIZE;
            self.history.try_reserve(1)?;
            self.history.push(HistoryRecord {
                seq: entry.seq,
                key,
                val,
            });
            self.num_hist_keys += 1;
            return updates.emplace(UpdatePtr::history(entry.seq, meta, id, ptr, index));
        }

        self.write_pair(out)?;
        let offset = out.offset();
        key.set_stored_hash(get_hash(entry.key));
        out.write_u64(entry.seq)?;
        out.write_core(Some(&key))?;
        out.write_core(Some(&val))?;
        self.open_key = Some(self.num_hist_keys);
        self.num_cur_keys += 1;

        self.collect_prefixes(entry.key, key, offset)?;
        self.prev_key = Some(entry.key.clone());
        updates.emplace(UpdatePtr::current(entry.seq, meta, id, offset, index))
    }

    /// Queue every prefix of a new key, longest first, until one matches the
    /// previous key's prefix of the same length
    fn collect_prefixes(&mut self, key: &Value, mut core: Core, offset: u64) -> Result<()> {
        let fields = key
            .tuple_elems()
            .ok_or_else(|| SabotError::Invariant(format!("index key is a {}", key.kind())))?
            .len();
        if fields > self.collectors.len() {
            return Err(SabotError::Invariant(format!(
                "key of {} fields in an index of {}",
                fields,
                self.collectors.len()
            )));
        }
        for size in (1..=fields).rev() {
            if size < fields {
                core.try_truncate_tuple();
            }
            let prefix = key
                .truncated(size)
                .ok_or_else(|| SabotError::Invariant(format!("cannot truncate key to {}", size)))?;
            if let Some(seen) = &self.seen[size - 1] {
                if total_state_order(seen, &prefix) == Ordering::Equal {
                    break;
                }
            }
            let hash = get_hash(&prefix);
            let mut slot_core = core;
            slot_core.set_stored_hash(hash);
            self.collectors[size - 1].emplace(HashEntry {
                core: slot_core,
                hash,
                key_offset: offset,
            })?;
            self.seen[size - 1] = Some(prefix);
        }
        Ok(())
    }

    /// Close the open key with its history count and relative offset
    fn write_pair(&mut self, out: &mut OutStream<'_>) -> Result<()> {
        if let Some(first) = self.open_key.take() {
            out.write_u64(self.num_hist_keys - first)?;
            out.write_u64(first * HISTORY_ENTRY_SIZE)?;
        }
        Ok(())
    }

    /// Close the last key and write the buffered history. Returns the
    /// absolute offset of the history section.
    fn flush_history(&mut self, out: &mut OutStream<'_>) -> Result<u64> {
        self.write_pair(out)?;
        let history_offset = out.offset();
        for record in self.history.drain(..) {
            out.write_u64(record.seq)?;
            out.write_core(Some(&record.key))?;
            out.write_core(Some(&record.val))?;
        }
        Ok(history_offset)
    }
}

// =============================================================================
// Index File
// =============================================================================

pub(crate) struct IndexFile {
    id: IndexId,
    number: u32,
    entries: Range<usize>,
    max_key_count: u64,
    arena: ArenaSection,
    collisions: CollisionBlocks,
    keys: KeyState,
    meta_offset: u64,
    key_index_offset: u64,
    history_offset: u64,
    hash_tables: Vec<(u64, u64)>,
}

impl IndexFile {
    pub fn new(
        id: IndexId,
        number: u32,
        entries: Range<usize>,
        num_fields: usize,
        arena: ArenaSection,
        config: &Config,
    ) -> Self {
        Self {
            id,
            number,
            max_key_count: entries.len() as u64,
            entries,
            arena,
            collisions: CollisionBlocks::new(config.block_size),
            keys: KeyState::new(num_fields, config),
            meta_offset: 0,
            key_index_offset: 0,
            history_offset: 0,
            hash_tables: Vec::new(),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn meta_offset(&self) -> u64 {
        self.meta_offset
    }

    pub fn history_offset(&self) -> u64 {
        self.history_offset
    }

    pub fn num_cur_keys(&self) -> u64 {
        self.keys.num_cur_keys
    }

    pub fn num_hist_keys(&self) -> u64 {
        self.keys.num_hist_keys
    }

    fn meta_bytes(&self) -> u64 {
        INDEX_META_FIELDS * 8
            + self.keys.collectors.len() as u64 * 16
            + self.arena.boundaries.len() as u64 * 8
    }

    /// Write the meta placeholder, every current key and the history
    pub fn write_key_range(
        &mut self,
        ctx: &BuildCtx<'_>,
        blocks: &mut BlockVec,
        entries: &[EntryRef<'_>],
        main_remap: &RemapIndex,
        updates: &mut IndexManager<UpdatePtr>,
    ) -> Result<()> {
        let bs = ctx.block_size;
        let start_idx = blocks.len();
        let meta_bytes = self.meta_bytes();
        if meta_bytes >= bs {
            return Err(SabotError::Invariant(format!(
                "Index metadata >= 1 block ({} bytes, block size {})",
                meta_bytes, bs
            )));
        }
        let entries = entries.get(self.entries.clone()).ok_or_else(|| {
            SabotError::Invariant(format!("index {} entry range out of bounds", self.id))
        })?;

        self.meta_offset = start_idx as u64 * bs;
        self.key_index_offset = self.meta_offset + meta_bytes;
        self.collisions.register(start_idx);
        ctx.reserve(blocks, ctx.blocks_for(self.max_key_count * KEY_ENTRY_SIZE + meta_bytes))?;

        let mut out = OutStream::new(&ctx.writer, &*blocks, &self.collisions, &ctx.trigger, self.key_index_offset);
        for entry in entries {
            self.keys
                .push_key(&mut out, entry, &self.arena.remap, main_remap, updates, self.number)?;
        }
        self.history_offset = self.keys.flush_history(&mut out)?;
        let end = out.finish()?;

        ctx.trigger.wait()?;
        ctx.trim(blocks, ((end - 1) / bs + 1) as usize)?;
        tracing::debug!(
            index = %self.id,
            current = self.keys.num_cur_keys,
            history = self.keys.num_hist_keys,
            end,
            "Wrote key range"
        );
        Ok(())
    }

    /// Build every prefix hash table in one region at the end of `blocks`
    pub fn flush_hashes(&mut self, ctx: &BuildCtx<'_>, blocks: &mut BlockVec) -> Result<()> {
        let bs = ctx.block_size;
        let collectors = mem::take(&mut self.keys.collectors);
        let region = blocks.len() as u64 * bs;
        let collisions = CollisionBlocks::new(bs as usize);

        let mut offset = region;
        for collector in &collectors {
            let size = suggest_hash_size(collector.len() as u64);
            let end = offset + size * HASH_ENTRY_SIZE;
            collisions.register((offset / bs) as usize);
            if end % bs != 0 {
                collisions.register((end / bs) as usize);
            }
            self.hash_tables.push((offset, size));
            offset = end;
        }
        ctx.reserve(blocks, ctx.blocks_for(offset - region))?;

        for (collector, &(table, size)) in collectors.into_iter().zip(&self.hash_tables) {
            write_hash_table(ctx, blocks, &collisions, collector, table, size)?;
        }
        collisions.flush(&ctx.writer, blocks, &ctx.trigger)?;
        ctx.trigger.wait()
    }

    /// Fill in the meta placeholder at the start of the key range
    pub fn write_meta(&self, ctx: &BuildCtx<'_>, blocks: &BlockVec) -> Result<()> {
        let mut out = OutStream::new(&ctx.writer, blocks, &self.collisions, &ctx.trigger, self.meta_offset);
        for field in [
            self.arena.byte_offset,
            self.arena.note_count,
            self.arena.byte_count,
            self.arena.boundaries.len() as u64,
            self.keys.num_cur_keys,
            self.keys.num_hist_keys,
            self.key_index_offset,
            self.hash_tables.len() as u64,
        ] {
            out.write_u64(field)?;
        }
        for &(table, size) in &self.hash_tables {
            out.write_u64(table)?;
            out.write_u64(size)?;
        }
        for &boundary in &self.arena.boundaries {
            out.write_u64(boundary)?;
        }
        out.finish()?;
        self.collisions.flush(&ctx.writer, blocks, &ctx.trigger)
    }
}

// =============================================================================
// Hash Table Placement
// =============================================================================

fn write_slot(out: &mut OutStream<'_>, entry: Option<&HashEntry>) -> Result<()> {
    out.write_core(entry.map(|e| &e.core))?;
    out.write_u64(entry.map_or(0, |e| e.key_offset))
}

fn next_entry(entries: &mut impl Iterator<Item = Result<HashEntry>>) -> Result<Option<HashEntry>> {
    entries.next().transpose()
}

fn write_hash_table(
    ctx: &BuildCtx<'_>,
    blocks: &BlockVec,
    collisions: &CollisionBlocks,
    collector: IndexManager<HashEntry>,
    table: u64,
    size: u64,
) -> Result<()> {
    let bs = ctx.block_size;
    let batch = ctx.config.merge_batch_size;
    let mut by_bucket = IndexManager::new(ctx.config, move |a: &HashEntry, b: &HashEntry| {
        (a.hash % size)
            .cmp(&(b.hash % size))
            .then(a.key_offset.cmp(&b.key_offset))
    });
    for entry in collector.cursor(batch)? {
        by_bucket.emplace(entry?)?;
    }
    let count = by_bucket.len();
    let mut entries = by_bucket.cursor(batch)?;

    // First pass: each entry goes to the first slot at or after its bucket
    let mut pending = next_entry(&mut entries)?;
    let mut out = OutStream::new(&ctx.writer, blocks, collisions, &ctx.trigger, table);
    for slot in 0..size {
        match &pending {
            Some(entry) if entry.hash % size <= slot => {
                write_slot(&mut out, Some(entry))?;
                pending = next_entry(&mut entries)?;
            }
            _ => write_slot(&mut out, None)?,
        }
    }
    out.finish()?;
    if pending.is_none() {
        return Ok(());
    }

    // Second pass: re-read the table and drop the wrapped entries into the
    // first empty slots from the start
    let end = table + size * HASH_ENTRY_SIZE;
    collisions.flush_one((table / bs) as usize, &ctx.writer, blocks, &ctx.trigger)?;
    if end % bs != 0 {
        collisions.flush_one((end / bs) as usize, &ctx.writer, blocks, &ctx.trigger)?;
    }
    ctx.trigger.wait()?;

    let reader = BlockReader::new(
        ctx.writer.volume(),
        Cow::Borrowed(blocks.as_slice()),
        ctx.config.page_cache_blocks,
    );
    let mut input = InStream::new(&reader, table);
    let mut out = OutStream::new(&ctx.writer, blocks, collisions, &ctx.trigger, table);
    let mut wrapped = 0u64;
    while let Some(entry) = pending.as_ref() {
        if input.offset() >= end {
            return Err(SabotError::Invariant(format!(
                "hash table of {} slots is full with {} entries",
                size, count
            )));
        }
        let mut slot = [0u8; HASH_ENTRY_SIZE as usize];
        input.read(&mut slot)?;
        if Core::from_bytes(&slot)?.is_none() {
            write_slot(&mut out, Some(entry))?;
            wrapped += 1;
            pending = next_entry(&mut entries)?;
        } else {
            out.write(&slot)?;
        }
    }

    // The rest of the current block is rewritten unchanged
    let at = out.offset();
    if at % bs != 0 {
        let n = (bs - at % bs).min(reader.len() - at) as usize;
        let mut rest = vec![0u8; n];
        input.read(&mut rest)?;
        out.write(&rest)?;
    }
    out.finish()?;
    tracing::trace!(table, size, count, wrapped, "Placed wrapped hash entries");
    Ok(())
}
