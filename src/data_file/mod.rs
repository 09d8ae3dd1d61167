//! Data File Module
//!
//! Compacts one [`MemoryLayer`] into an immutable data file on fixed-size
//! blocks, and reads such files back.
//!
//! ## File Layout
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ per-index arena (deduplicated key notes)             × indexes       │
//! │ main arena (deduplicated value / metadata / id notes)                │
//! │ per-index key range: index meta │ current keys │ history  × indexes │
//! │ per-index hash region: one table per key prefix length  × indexes   │
//! │ update index: bucket headers │ key pointers                         │
//! │ meta trailer (starting block)                                        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every section starts on a block boundary. A block shared by two sections
//! is a collision block, buffered until both have written their part.
//!
//! ## Meta Trailer
//! ```text
//! block_count │ meta_block_count │ pairing_count │ update_count │ index_count │
//! main_notes │ main_bytes │ main_boundary_count │ main_arena_offset │
//! update_index_offset │ meta_block_ids[] │ (first_block, count)[] │
//! (index uuid 16B, index meta offset)[] │ main_boundaries[]
//! ```
//!
//! ## Build Phases
//! Initializing → GroupingByIndex → WritingArenas → WritingKeyRanges →
//! WritingHistoriesAndHashes → WritingUpdateIndex → WritingMeta →
//! SyncingToDisk → Committed. Any error ends the build as Failed: every
//! pending notifier hears `Failed` and the error is returned. Blocks
//! already reserved are abandoned.

mod arena_writer;
mod index_file;
mod reader;
mod update_index;

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use crate::atom::{Arena, ArenaId};
use crate::config::Config;
use crate::disk::{
    runs_of, BlockVec, BlockWriter, CollisionBlocks, CompletionTrigger, Engine, FileInfo,
    FileKind, IndexManager, OrderFn, OutStream,
};
use crate::error::{Result, SabotError};
use crate::layer::{notify_all, EntryRef, IndexId, MemoryLayer, Outcome};
use crate::sabot::{compare_types, Comparison, Value};

use arena_writer::{make_arena, ArenaSection, NoteCollector};
use index_file::IndexFile;
use update_index::{update_order, write_update_index, UpdateIndex, UpdatePtr};

pub use reader::{ArenaMeta, DataFileReader, HistoryItem, IndexReader, KeyItem, UpdateBucket};

// =============================================================================
// Record Sizes
// =============================================================================

/// Current key record: seq, key, value, history count, history offset
pub const KEY_ENTRY_SIZE: u64 = 88;

/// History record: seq, key, value
pub const HISTORY_ENTRY_SIZE: u64 = 72;

/// Hash slot: key prefix core, key record offset
pub const HASH_ENTRY_SIZE: u64 = 40;

/// Update bucket header: seq, metadata, id, bucket offset, count
pub const UPDATE_HEADER_SIZE: u64 = 88;

pub const UPDATE_POINTER_SIZE: u64 = 8;

/// Fixed u64 fields at the start of an index meta
pub const INDEX_META_FIELDS: u64 = 8;

/// Fixed u64 fields at the start of the meta trailer
pub const FILE_META_FIELDS: u64 = 10;

/// Per-index entry in the meta trailer: uuid, index meta offset
pub const INDEX_REF_SIZE: u64 = 24;

// =============================================================================
// Build Phases
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Initializing,
    GroupingByIndex,
    WritingArenas,
    WritingKeyRanges,
    WritingHistoriesAndHashes,
    WritingUpdateIndex,
    WritingMeta,
    SyncingToDisk,
    Committed,
    Failed,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Initializing => "initializing",
            BuildPhase::GroupingByIndex => "grouping by index",
            BuildPhase::WritingArenas => "writing arenas",
            BuildPhase::WritingKeyRanges => "writing key ranges",
            BuildPhase::WritingHistoriesAndHashes => "writing histories and hashes",
            BuildPhase::WritingUpdateIndex => "writing update index",
            BuildPhase::WritingMeta => "writing meta",
            BuildPhase::SyncingToDisk => "syncing to disk",
            BuildPhase::Committed => "committed",
            BuildPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Build Context
// =============================================================================

/// Collaborators shared by every phase of one build
pub(crate) struct BuildCtx<'e> {
    engine: &'e dyn Engine,
    writer: BlockWriter<'e>,
    trigger: CompletionTrigger,
    config: &'e Config,
    block_size: u64,
    file_id: u64,
}

impl<'e> BuildCtx<'e> {
    fn new(engine: &'e dyn Engine, config: &'e Config, file_id: u64) -> Self {
        Self {
            engine,
            writer: BlockWriter::new(engine.volume(), config.priority),
            trigger: CompletionTrigger::new(),
            config,
            block_size: config.block_size as u64,
            file_id,
        }
    }

    fn enter(&self, phase: BuildPhase, blocks: &BlockVec) {
        tracing::debug!(file_id = self.file_id, blocks = blocks.len(), "Data file build: {}", phase);
    }

    /// Blocks needed to hold `bytes`
    fn blocks_for(&self, bytes: u64) -> usize {
        bytes.div_ceil(self.block_size) as usize
    }

    fn reserve(&self, blocks: &mut BlockVec, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let before = blocks.len();
        self.engine
            .append_reserve_blocks(self.config.storage_speed, count, blocks)?;
        if blocks.len() != before + count {
            return Err(SabotError::Storage(format!(
                "asked for {} blocks, got {}",
                count,
                blocks.len() - before
            )));
        }
        Ok(())
    }

    /// Keep the first `keep` blocks and give the rest back to the engine
    fn trim(&self, blocks: &mut BlockVec, keep: usize) -> Result<()> {
        let freed = blocks.truncate_to(keep);
        for (start, count) in runs_of(&freed) {
            self.engine.free_seq_blocks(start, count)?;
        }
        if !freed.is_empty() {
            tracing::trace!(freed = freed.len(), keep, "Trimmed over-reserved blocks");
        }
        Ok(())
    }
}

// =============================================================================
// Data File
// =============================================================================

/// A committed data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    info: FileInfo,
    num_updates: u64,
    num_indexes: usize,
    num_hist_keys: u64,
}

impl DataFile {
    /// Write `layer` as a new data file and register it with `engine`.
    ///
    /// Every update's notifier is called exactly once, with `Completed` if
    /// the file was registered and `Failed` otherwise.
    pub fn write(
        engine: &dyn Engine,
        layer: &mut MemoryLayer,
        file_id: u64,
        gen_id: u64,
        config: &Config,
    ) -> Result<DataFile> {
        let notifiers = layer.take_notifiers();
        match build(engine, layer, file_id, gen_id, config) {
            Ok(file) => {
                notify_all(notifiers, Outcome::Completed);
                Ok(file)
            }
            Err(e) => {
                tracing::error!(file_id, phase = %BuildPhase::Failed, error = %e, "Data file build failed");
                notify_all(notifiers, Outcome::Failed);
                Err(e)
            }
        }
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn file_id(&self) -> u64 {
        self.info.file_id
    }

    pub fn starting_block_id(&self) -> u64 {
        self.info.starting_block_id
    }

    pub fn starting_block_offset(&self) -> u64 {
        self.info.starting_block_offset
    }

    /// Length in bytes
    pub fn len(&self) -> u64 {
        self.info.file_length
    }

    pub fn is_empty(&self) -> bool {
        self.info.file_length == 0
    }

    /// Current keys across all indexes
    pub fn num_keys(&self) -> u64 {
        self.info.num_keys
    }

    pub fn num_hist_keys(&self) -> u64 {
        self.num_hist_keys
    }

    pub fn num_updates(&self) -> u64 {
        self.num_updates
    }

    pub fn num_indexes(&self) -> usize {
        self.num_indexes
    }

    pub fn lowest_seq(&self) -> u64 {
        self.info.lowest_seq
    }

    pub fn highest_seq(&self) -> u64 {
        self.info.highest_seq
    }
}

/// Entries of one logical index, gathered while grouping
struct IndexGroup {
    id: IndexId,
    entries: Range<usize>,
    num_fields: usize,
    notes: NoteCollector,
}

fn build(
    engine: &dyn Engine,
    layer: &MemoryLayer,
    file_id: u64,
    gen_id: u64,
    config: &Config,
) -> Result<DataFile> {
    config.validate()?;
    let volume = engine.volume();
    if volume.block_size() != config.block_size {
        return Err(SabotError::Config(format!(
            "volume block size {} does not match configured {}",
            volume.block_size(),
            config.block_size
        )));
    }
    let ctx = BuildCtx::new(engine, config, file_id);
    let mut blocks = BlockVec::new();

    // Step 1: Count updates and sort the layer's entries
    ctx.enter(BuildPhase::Initializing, &blocks);
    let num_updates = layer.len() as u64;
    let entries = layer.sorted_entries();
    let arenas: HashMap<ArenaId, &Arena> = layer
        .updates()
        .iter()
        .map(|u| (u.arena().id(), u.arena()))
        .collect();

    // Step 2: Group key notes per index, everything else into the main arena
    ctx.enter(BuildPhase::GroupingByIndex, &blocks);
    let (groups, main_notes) = group_by_index(&entries, config)?;

    // Step 3: Arenas, per index then main
    ctx.enter(BuildPhase::WritingArenas, &blocks);
    let mut index_files = Vec::with_capacity(groups.len());
    for (number, group) in groups.into_iter().enumerate() {
        let arena = make_arena(&ctx, &mut blocks, group.notes, &arenas)?;
        let number = u32::try_from(number)
            .map_err(|_| SabotError::Unsupported(format!("{} indexes in one file", number)))?;
        index_files.push(IndexFile::new(
            group.id,
            number,
            group.entries,
            group.num_fields,
            arena,
            config,
        ));
    }
    let main = make_arena(&ctx, &mut blocks, main_notes, &arenas)?;

    // Step 4: Key ranges with their history
    ctx.enter(BuildPhase::WritingKeyRanges, &blocks);
    let mut updates = IndexManager::new(config, update_order as OrderFn<UpdatePtr>);
    for file in &mut index_files {
        file.write_key_range(&ctx, &mut blocks, &entries, &main.remap, &mut updates)?;
    }

    // Step 5: Hash tables, then each index's meta
    ctx.enter(BuildPhase::WritingHistoriesAndHashes, &blocks);
    for file in &mut index_files {
        file.flush_hashes(&ctx, &mut blocks)?;
        file.write_meta(&ctx, &blocks)?;
    }
    ctx.trigger.wait()?;

    // Step 6: Update index
    ctx.enter(BuildPhase::WritingUpdateIndex, &blocks);
    let history_offsets: Vec<u64> = index_files.iter().map(IndexFile::history_offset).collect();
    let update_index = write_update_index(&ctx, &mut blocks, num_updates, updates, &history_offsets)?;

    // Step 7: Meta trailer
    ctx.enter(BuildPhase::WritingMeta, &blocks);
    let (starting_block_id, starting_block_offset) =
        write_file_meta(&ctx, &mut blocks, num_updates, &index_files, &main, &update_index)?;
    ctx.writer.audit(blocks.as_slice())?;

    // Step 8: Sync and register
    ctx.enter(BuildPhase::SyncingToDisk, &blocks);
    volume.sync_to_disk(&blocks.seq_runs())?;
    let info = FileInfo {
        file_id,
        kind: FileKind::DataFile,
        gen_id,
        starting_block_id,
        starting_block_offset,
        file_length: blocks.len() as u64 * ctx.block_size,
        num_keys: index_files.iter().map(IndexFile::num_cur_keys).sum(),
        lowest_seq: update_index.lowest_seq,
        highest_seq: update_index.highest_seq,
    };
    engine.insert_file(info.clone(), &ctx.trigger)?;
    ctx.trigger.wait()?;

    ctx.enter(BuildPhase::Committed, &blocks);
    let file = DataFile {
        info,
        num_updates,
        num_indexes: index_files.len(),
        num_hist_keys: index_files.iter().map(IndexFile::num_hist_keys).sum(),
    };
    tracing::info!(
        file_id,
        blocks = blocks.len(),
        keys = file.num_keys(),
        history = file.num_hist_keys(),
        lowest_seq = file.lowest_seq(),
        highest_seq = file.highest_seq(),
        "Data file committed"
    );
    Ok(file)
}

/// Split the sorted entries into per-index groups and collect every note
/// they reference: key notes per index, the rest into one main collector.
fn group_by_index(entries: &[EntryRef<'_>], config: &Config) -> Result<(Vec<IndexGroup>, NoteCollector)> {
    let mut groups: Vec<IndexGroup> = Vec::new();
    let mut main = NoteCollector::new(config);
    for (i, entry) in entries.iter().enumerate() {
        let fields = entry.key.tuple_elems().map_or(0, <[Value]>::len);
        match groups.last_mut() {
            Some(group) if group.id == entry.index_id => {
                group.entries.end = i + 1;
                group.num_fields = group.num_fields.max(fields);
            }
            _ => groups.push(IndexGroup {
                id: entry.index_id,
                entries: i..i + 1,
                num_fields: fields,
                notes: NoteCollector::new(config),
            }),
        }
        if let Some(group) = groups.last_mut() {
            group.notes.collect(entry.arena, &entry.key_core)?;
        }
        main.collect(entry.arena, &entry.op_core)?;
        main.collect(entry.arena, &entry.meta_core)?;
        main.collect(entry.arena, &entry.id_core)?;
    }

    // Every key of an index shares the shape of its last key
    for group in &groups {
        let slice = &entries[group.entries.clone()];
        let Some(example) = slice.last() else { continue };
        let shape = example.key.ty();
        for entry in slice {
            if compare_types(&entry.key.ty(), &shape) != Comparison::Eq {
                return Err(SabotError::Invariant(format!(
                    "key at seq {} of type {} does not match index {} key type {}",
                    entry.seq,
                    entry.key.ty(),
                    group.id,
                    shape
                )));
            }
        }
    }
    Ok((groups, main))
}

/// Append the meta blocks and write the trailer into them. Returns the
/// first meta block and its position in the file.
fn write_file_meta(
    ctx: &BuildCtx<'_>,
    blocks: &mut BlockVec,
    num_updates: u64,
    index_files: &[IndexFile],
    main: &ArenaSection,
    update_index: &UpdateIndex,
) -> Result<(u64, u64)> {
    let pairings = blocks.seq_runs();
    let fixed = FILE_META_FIELDS * 8
        + pairings.len() as u64 * 16
        + index_files.len() as u64 * INDEX_REF_SIZE
        + main.boundaries.len() as u64 * 8;

    // The trailer lists its own blocks, so its size depends on their count
    let mut meta_blocks = ctx.blocks_for(fixed);
    for _ in 0..3 {
        meta_blocks = ctx.blocks_for(fixed + meta_blocks as u64 * 8);
    }
    if ctx.blocks_for(fixed + meta_blocks as u64 * 8) != meta_blocks {
        return Err(SabotError::Invariant(format!(
            "meta block count did not settle ({} blocks for {} bytes)",
            meta_blocks, fixed
        )));
    }

    let meta_idx = blocks.len();
    ctx.reserve(blocks, meta_blocks)?;
    let meta_ids = blocks.as_slice()[meta_idx..].to_vec();
    let starting_block_id = blocks.block_at(meta_idx)?;

    let collisions = CollisionBlocks::new(ctx.block_size as usize);
    let mut out = OutStream::new(&ctx.writer, &*blocks, &collisions, &ctx.trigger, meta_idx as u64 * ctx.block_size);
    for field in [
        blocks.len() as u64,
        meta_blocks as u64,
        pairings.len() as u64,
        num_updates,
        index_files.len() as u64,
        main.note_count,
        main.byte_count,
        main.boundaries.len() as u64,
        main.byte_offset,
        update_index.byte_offset,
    ] {
        out.write_u64(field)?;
    }
    for id in &meta_ids {
        out.write_u64(*id)?;
    }
    for &(first, count) in &pairings {
        out.write_u64(first)?;
        out.write_u64(count)?;
    }
    for file in index_files {
        out.write(file.id().as_bytes())?;
        out.write_u64(file.meta_offset())?;
    }
    for &boundary in &main.boundaries {
        out.write_u64(boundary)?;
    }
    out.finish()?;
    ctx.trigger.wait()?;

    tracing::debug!(
        meta_blocks,
        pairings = pairings.len(),
        starting_block_id,
        "Wrote meta trailer"
    );
    Ok((starting_block_id, meta_idx as u64))
}
