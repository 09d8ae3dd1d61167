//! Data file reader
//!
//! Opens a committed file from its starting (first meta) block and serves
//! point lookups, key scans and the update index straight off the volume.
//!
//! ```text
//!   starting block ──► meta trailer ──► block list (pairings + meta ids)
//!                          │
//!                          ├──► main arena        (values, metadata, ids)
//!                          ├──► index meta × N ──► IndexReader
//!                          │                         ├─ hash tables  (find_in_hash)
//!                          │                         ├─ current keys (binary_lower_bound)
//!                          │                         └─ history
//!                          └──► update index      (updates, seq range)
//! ```

use std::borrow::Cow;
use std::cmp::Ordering;

use bytes::Bytes;

use crate::atom::{decode_core, note_len, Core, NoteSource, CORE_SIZE, NOTE_HEADER_SIZE};
use crate::config::Config;
use crate::disk::{BlockId, BlockReader, FileInfo, InStream, VolumeManager};
use crate::error::{Result, SabotError};
use crate::layer::IndexId;
use crate::sabot::{get_hash, total_state_order, Value};

use super::{
    FILE_META_FIELDS, HASH_ENTRY_SIZE, HISTORY_ENTRY_SIZE, INDEX_META_FIELDS, INDEX_REF_SIZE,
    KEY_ENTRY_SIZE, UPDATE_HEADER_SIZE, UPDATE_POINTER_SIZE,
};

/// Location and shape of one arena section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaMeta {
    pub byte_offset: u64,
    pub note_count: u64,
    pub byte_count: u64,
    /// Section-relative offsets where the note type changes
    pub boundaries: Vec<u64>,
}

/// Notes of one arena section, read through the file's block list
struct FileArena<'r, 'a> {
    reader: &'r BlockReader<'a>,
    meta: &'r ArenaMeta,
}

impl NoteSource for FileArena<'_, '_> {
    fn note_bytes(&self, offset: u64) -> Result<Cow<'_, [u8]>> {
        if offset + NOTE_HEADER_SIZE as u64 > self.meta.byte_count {
            return Err(SabotError::Serialization(format!(
                "note offset {} outside an arena of {} bytes",
                offset, self.meta.byte_count
            )));
        }
        let at = self.meta.byte_offset + offset;
        let header = self.reader.read_vec(at, NOTE_HEADER_SIZE)?;
        let len = note_len(&header)?;
        Ok(Cow::Owned(self.reader.read_vec(at, len)?))
    }
}

#[derive(Debug, Clone)]
struct IndexMeta {
    id: IndexId,
    meta_offset: u64,
    arena: ArenaMeta,
    num_cur_keys: u64,
    num_hist_keys: u64,
    key_index_offset: u64,
    hash_tables: Vec<(u64, u64)>,
}

/// A current key record
#[derive(Debug, Clone, PartialEq)]
pub struct KeyItem {
    /// Absolute byte offset of the record
    pub offset: u64,
    pub seq: u64,
    pub key: Value,
    pub value: Value,
    pub num_hist: u64,
    /// Relative to the index's history section
    pub hist_offset: u64,
}

/// An older revision of a key
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub offset: u64,
    pub seq: u64,
    pub key: Value,
    pub value: Value,
}

/// One bucket of the update index: every key record an update touched
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBucket {
    pub seq: u64,
    pub meta: Value,
    pub id: Value,
    /// Absolute offsets of current and history key records
    pub pointers: Vec<u64>,
}

// =============================================================================
// Data File Reader
// =============================================================================

pub struct DataFileReader<'a> {
    reader: BlockReader<'a>,
    block_count: u64,
    starting_block_offset: u64,
    num_updates: u64,
    main: ArenaMeta,
    update_index_offset: u64,
    indexes: Vec<IndexMeta>,
}

impl<'a> DataFileReader<'a> {
    pub fn for_file(volume: &'a dyn VolumeManager, info: &FileInfo, config: &Config) -> Result<Self> {
        Self::open(volume, info.starting_block_id, info.starting_block_offset, config)
    }

    pub fn open(
        volume: &'a dyn VolumeManager,
        starting_block_id: BlockId,
        starting_block_offset: u64,
        config: &Config,
    ) -> Result<Self> {
        let bs = volume.block_size();
        if bs != config.block_size {
            return Err(SabotError::Config(format!(
                "volume block size {} does not match configured {}",
                bs, config.block_size
            )));
        }

        // Step 1: Meta blocks. Each block's id sits in an earlier block.
        let mut meta = MetaBlocks::new(volume, starting_block_id)?;
        let block_count = meta.u64_at(0)?;
        let meta_block_count = meta.u64_at(8)?;
        if meta_block_count == 0 || meta_block_count > block_count {
            return Err(SabotError::Serialization(format!(
                "meta trailer claims {} meta blocks in a file of {}",
                meta_block_count, block_count
            )));
        }
        for k in 1..meta_block_count {
            let id = meta.u64_at(FILE_META_FIELDS * 8 + k * 8)?;
            meta.load(id)?;
        }
        let trailer = meta.into_bytes();
        let mut cursor = TrailerCursor::new(&trailer);

        let mut fields = [0u64; FILE_META_FIELDS as usize];
        for field in fields.iter_mut() {
            *field = cursor.u64()?;
        }
        let [_, _, num_pairings, num_updates, num_indexes, main_notes, main_bytes, num_boundaries, main_offset, update_index_offset] =
            fields;
        cursor.check_records(meta_block_count, 8, "meta block ids")?;
        let meta_ids: Vec<BlockId> = (0..meta_block_count)
            .map(|_| cursor.u64())
            .collect::<Result<_>>()?;

        // Step 2: Rebuild the block list
        cursor.check_records(num_pairings, 16, "block pairings")?;
        let mut blocks: Vec<BlockId> = Vec::new();
        for _ in 0..num_pairings {
            let first = cursor.u64()?;
            let count = cursor.u64()?;
            if count > block_count.saturating_sub(blocks.len() as u64) {
                return Err(SabotError::Serialization(format!(
                    "block pairing ({}, {}) overruns a file of {} blocks",
                    first, count, block_count
                )));
            }
            let end = first.checked_add(count).ok_or_else(|| {
                SabotError::Serialization(format!("block pairing ({}, {}) overflows", first, count))
            })?;
            blocks.extend(first..end);
        }
        if blocks.len() as u64 != starting_block_offset {
            return Err(SabotError::Serialization(format!(
                "meta trailer starts at block {}, pairings cover {}",
                starting_block_offset,
                blocks.len()
            )));
        }
        blocks.extend_from_slice(&meta_ids);
        if blocks.len() as u64 != block_count {
            return Err(SabotError::Serialization(format!(
                "block list has {} blocks, trailer says {}",
                blocks.len(),
                block_count
            )));
        }

        cursor.check_records(num_indexes, INDEX_REF_SIZE, "index refs")?;
        let mut index_refs = Vec::with_capacity(num_indexes as usize);
        for _ in 0..num_indexes {
            let mut id = [0u8; 16];
            cursor.read(&mut id)?;
            index_refs.push((IndexId::new(id), cursor.u64()?));
        }
        cursor.check_records(num_boundaries, 8, "type boundaries")?;
        let boundaries: Vec<u64> = (0..num_boundaries)
            .map(|_| cursor.u64())
            .collect::<Result<_>>()?;

        let reader = BlockReader::new(volume, Cow::Owned(blocks), config.page_cache_blocks);

        // Step 3: Index metas
        let indexes = index_refs
            .into_iter()
            .map(|(id, offset)| read_index_meta(&reader, id, offset))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            starting_block_id,
            blocks = block_count,
            indexes = indexes.len(),
            updates = num_updates,
            "Opened data file"
        );
        Ok(Self {
            reader,
            block_count,
            starting_block_offset,
            num_updates,
            main: ArenaMeta {
                byte_offset: main_offset,
                note_count: main_notes,
                byte_count: main_bytes,
                boundaries,
            },
            update_index_offset,
            indexes,
        })
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn starting_block_offset(&self) -> u64 {
        self.starting_block_offset
    }

    pub fn num_updates(&self) -> u64 {
        self.num_updates
    }

    pub fn num_indexes(&self) -> usize {
        self.indexes.len()
    }

    pub fn main_arena(&self) -> &ArenaMeta {
        &self.main
    }

    /// Index ids in file order
    pub fn index_ids(&self) -> Vec<IndexId> {
        self.indexes.iter().map(|m| m.id).collect()
    }

    pub fn index(&self, id: &IndexId) -> Option<IndexReader<'_, 'a>> {
        self.indexes
            .iter()
            .find(|m| m.id == *id)
            .map(|meta| IndexReader { file: self, meta })
    }

    pub fn indexes(&self) -> Vec<IndexReader<'_, 'a>> {
        self.indexes
            .iter()
            .map(|meta| IndexReader { file: self, meta })
            .collect()
    }

    /// Total current keys across all indexes
    pub fn num_cur_keys(&self) -> u64 {
        self.indexes.iter().map(|m| m.num_cur_keys).sum()
    }

    pub fn num_hist_keys(&self) -> u64 {
        self.indexes.iter().map(|m| m.num_hist_keys).sum()
    }

    fn decode_main(&self, core: &Core) -> Result<Value> {
        decode_core(&FileArena { reader: &self.reader, meta: &self.main }, core)
    }

    /// Every update bucket, in ascending sequence order
    pub fn updates(&self) -> Result<Vec<UpdateBucket>> {
        let mut out = Vec::new();
        let mut input = InStream::new(&self.reader, self.update_index_offset);
        for _ in 0..self.num_updates {
            let seq = input.read_u64()?;
            let meta = input.read_core()?;
            let id = input.read_core()?;
            let ptr_offset = input.read_u64()?;
            let count = input.read_u64()?;
            let (Some(meta), Some(id)) = (meta, id) else {
                if count != 0 {
                    return Err(SabotError::Serialization(format!(
                        "update bucket @{} has {} pointers but no metadata",
                        seq, count
                    )));
                }
                continue;
            };
            let room = self.reader.len().saturating_sub(ptr_offset) / UPDATE_POINTER_SIZE;
            if count > room {
                return Err(SabotError::Serialization(format!(
                    "update bucket @{} claims {} pointers, {} fit in the file",
                    seq, count, room
                )));
            }
            let mut pointers = Vec::with_capacity(count as usize);
            for i in 0..count {
                pointers.push(self.reader.read_u64(ptr_offset + i * UPDATE_POINTER_SIZE)?);
            }
            out.push(UpdateBucket {
                seq,
                meta: self.decode_main(&meta)?,
                id: self.decode_main(&id)?,
                pointers,
            });
        }
        Ok(out)
    }

    /// 0 for a file without updates
    pub fn lowest_seq(&self) -> Result<u64> {
        Ok(self.seq_range()?.map_or(0, |(lo, _)| lo))
    }

    pub fn highest_seq(&self) -> Result<u64> {
        Ok(self.seq_range()?.map_or(0, |(_, hi)| hi))
    }

    fn seq_range(&self) -> Result<Option<(u64, u64)>> {
        let mut range: Option<(u64, u64)> = None;
        for slot in 0..self.num_updates {
            let at = self.update_index_offset + slot * UPDATE_HEADER_SIZE;
            let count = self.reader.read_u64(at + UPDATE_HEADER_SIZE - 8)?;
            if count == 0 {
                continue;
            }
            let seq = self.reader.read_u64(at)?;
            range = Some(match range {
                Some((lo, hi)) => (lo.min(seq), hi.max(seq)),
                None => (seq, seq),
            });
        }
        Ok(range)
    }
}

fn read_index_meta(reader: &BlockReader<'_>, id: IndexId, meta_offset: u64) -> Result<IndexMeta> {
    let mut input = InStream::new(reader, meta_offset);
    let mut fields = [0u64; INDEX_META_FIELDS as usize];
    for field in fields.iter_mut() {
        *field = input.read_u64()?;
    }
    let [arena_offset, note_count, byte_count, num_boundaries, num_cur_keys, num_hist_keys, key_index_offset, num_tables] =
        fields;
    let room = reader.len().saturating_sub(input.offset()) / 16;
    if num_tables > room {
        return Err(SabotError::Serialization(format!(
            "index {} claims {} hash tables, {} fit in the file",
            id, num_tables, room
        )));
    }
    let mut hash_tables = Vec::with_capacity(num_tables as usize);
    for _ in 0..num_tables {
        let offset = input.read_u64()?;
        let size = input.read_u64()?;
        if size == 0 {
            return Err(SabotError::Serialization(format!("index {} has an empty hash table", id)));
        }
        hash_tables.push((offset, size));
    }
    let boundaries = (0..num_boundaries)
        .map(|_| input.read_u64())
        .collect::<Result<Vec<_>>>()?;
    if input.offset() != key_index_offset {
        return Err(SabotError::Serialization(format!(
            "index {} meta ends at {}, keys start at {}",
            id,
            input.offset(),
            key_index_offset
        )));
    }
    Ok(IndexMeta {
        id,
        meta_offset,
        arena: ArenaMeta {
            byte_offset: arena_offset,
            note_count,
            byte_count,
            boundaries,
        },
        num_cur_keys,
        num_hist_keys,
        key_index_offset,
        hash_tables,
    })
}

// =============================================================================
// Index Reader
// =============================================================================

/// Read access to one logical index of a data file
#[derive(Clone, Copy)]
pub struct IndexReader<'r, 'a> {
    file: &'r DataFileReader<'a>,
    meta: &'r IndexMeta,
}

impl IndexReader<'_, '_> {
    pub fn id(&self) -> IndexId {
        self.meta.id
    }

    pub fn meta_offset(&self) -> u64 {
        self.meta.meta_offset
    }

    pub fn num_cur_keys(&self) -> u64 {
        self.meta.num_cur_keys
    }

    pub fn num_hist_keys(&self) -> u64 {
        self.meta.num_hist_keys
    }

    pub fn key_index_offset(&self) -> u64 {
        self.meta.key_index_offset
    }

    pub fn history_offset(&self) -> u64 {
        self.meta.key_index_offset + self.meta.num_cur_keys * KEY_ENTRY_SIZE
    }

    /// `(byte offset, slot count)` per prefix length, shortest first
    pub fn hash_tables(&self) -> &[(u64, u64)] {
        &self.meta.hash_tables
    }

    pub fn arena(&self) -> &ArenaMeta {
        &self.meta.arena
    }

    fn key_arena(&self) -> FileArena<'_, '_> {
        FileArena {
            reader: &self.file.reader,
            meta: &self.meta.arena,
        }
    }

    fn decode_key(&self, core: &Core) -> Result<Value> {
        decode_core(&self.key_arena(), core)
    }

    /// The current key record at absolute byte `offset`
    pub fn key_at(&self, offset: u64) -> Result<KeyItem> {
        let end = self.history_offset();
        if offset < self.meta.key_index_offset
            || offset >= end
            || (offset - self.meta.key_index_offset) % KEY_ENTRY_SIZE != 0
        {
            return Err(SabotError::NotFound(format!(
                "no key record at {} in index {}",
                offset, self.meta.id
            )));
        }
        let mut input = InStream::new(&self.file.reader, offset);
        let seq = input.read_u64()?;
        let key = required_core(&mut input, "key")?;
        let value = required_core(&mut input, "value")?;
        let num_hist = input.read_u64()?;
        let hist_offset = input.read_u64()?;
        Ok(KeyItem {
            offset,
            seq,
            key: self.decode_key(&key)?,
            value: self.file.decode_main(&value)?,
            num_hist,
            hist_offset,
        })
    }

    /// The `n`th current key in key order
    pub fn nth_key(&self, n: u64) -> Result<KeyItem> {
        self.key_at(self.meta.key_index_offset + n * KEY_ENTRY_SIZE)
    }

    pub fn current_keys(&self) -> Result<Vec<KeyItem>> {
        (0..self.meta.num_cur_keys).map(|n| self.nth_key(n)).collect()
    }

    /// Older revisions of `item`, newest first
    pub fn history_of(&self, item: &KeyItem) -> Result<Vec<HistoryItem>> {
        if item.hist_offset / HISTORY_ENTRY_SIZE + item.num_hist > self.meta.num_hist_keys {
            return Err(SabotError::Serialization(format!(
                "key at {} claims history records past the {} in index {}",
                item.offset, self.meta.num_hist_keys, self.meta.id
            )));
        }
        let base = self.history_offset() + item.hist_offset;
        let mut out = Vec::with_capacity(item.num_hist as usize);
        for i in 0..item.num_hist {
            let offset = base + i * HISTORY_ENTRY_SIZE;
            let mut input = InStream::new(&self.file.reader, offset);
            let seq = input.read_u64()?;
            let key = required_core(&mut input, "history key")?;
            let value = required_core(&mut input, "history value")?;
            out.push(HistoryItem {
                offset,
                seq,
                key: self.decode_key(&key)?,
                value: self.file.decode_main(&value)?,
            });
        }
        Ok(out)
    }

    /// Position of the first current key not less than `key`
    pub fn binary_lower_bound(&self, key: &Value) -> Result<u64> {
        let (mut lo, mut hi) = (0u64, self.meta.num_cur_keys);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let item = self.nth_key(mid)?;
            if total_state_order(&item.key, key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Exact lookup through the sorted key range
    pub fn find(&self, key: &Value) -> Result<Option<KeyItem>> {
        let pos = self.binary_lower_bound(key)?;
        if pos >= self.meta.num_cur_keys {
            return Ok(None);
        }
        let item = self.nth_key(pos)?;
        Ok((total_state_order(&item.key, key) == Ordering::Equal).then_some(item))
    }

    /// First key record whose leading fields equal the defined prefix of
    /// `key`. Trailing `Free` fields are ignored.
    pub fn find_in_hash(&self, key: &Value) -> Result<Option<KeyItem>> {
        let defined = key.num_leading_defined().ok_or_else(|| {
            SabotError::Unsupported(format!("hash lookup with a {} key", key.kind()))
        })?;
        if defined == 0 {
            if self.meta.num_cur_keys == 0 {
                return Ok(None);
            }
            return self.nth_key(0).map(Some);
        }
        let Some(&(table, size)) = self.meta.hash_tables.get(defined - 1) else {
            return Ok(None);
        };
        let prefix = key
            .truncated(defined)
            .ok_or_else(|| SabotError::Invariant(format!("cannot truncate key to {}", defined)))?;
        let hash = get_hash(&prefix);
        let bucket = hash % size;

        let mut slot = bucket;
        let mut wrapped = false;
        loop {
            let at = table + slot * HASH_ENTRY_SIZE;
            let mut raw = [0u8; CORE_SIZE];
            self.file.reader.read_range(at, &mut raw)?;
            let Some(core) = Core::from_bytes(&raw)? else {
                return Ok(None);
            };
            let stored = core.stored_hash().ok_or_else(|| {
                SabotError::Serialization(format!("hash slot at {} has no stored hash", at))
            })?;
            if !wrapped && stored % size > bucket {
                return Ok(None);
            }
            if stored == hash
                && total_state_order(&self.decode_key(&core)?, &prefix) == Ordering::Equal
            {
                let key_offset = self.file.reader.read_u64(at + CORE_SIZE as u64)?;
                return self.key_at(key_offset).map(Some);
            }

            slot += 1;
            if slot == size {
                slot = 0;
                wrapped = true;
            }
            if wrapped && slot == bucket {
                return Ok(None);
            }
        }
    }

    /// Every occupied slot of the table for `fields`-long prefixes, as
    /// `(slot, decoded prefix, key offset)`
    pub fn hash_slots(&self, fields: usize) -> Result<Vec<(u64, Value, u64)>> {
        let Some(&(table, size)) = fields.checked_sub(1).and_then(|i| self.meta.hash_tables.get(i)) else {
            return Err(SabotError::NotFound(format!(
                "index {} has no table for {} fields",
                self.meta.id, fields
            )));
        };
        let mut out = Vec::new();
        let mut input = InStream::new(&self.file.reader, table);
        for slot in 0..size {
            let core = input.read_core()?;
            let key_offset = input.read_u64()?;
            if let Some(core) = core {
                out.push((slot, self.decode_key(&core)?, key_offset));
            }
        }
        Ok(out)
    }
}

fn required_core(input: &mut InStream<'_, '_>, what: &str) -> Result<Core> {
    let at = input.offset();
    input
        .read_core()?
        .ok_or_else(|| SabotError::Serialization(format!("empty {} core at {}", what, at)))
}

// =============================================================================
// Meta Trailer Access
// =============================================================================

/// Meta blocks loaded so far, addressed as one byte range
struct MetaBlocks<'a> {
    volume: &'a dyn VolumeManager,
    blocks: Vec<Bytes>,
    block_size: u64,
}

impl<'a> MetaBlocks<'a> {
    fn new(volume: &'a dyn VolumeManager, first: BlockId) -> Result<Self> {
        let mut meta = Self {
            volume,
            blocks: Vec::new(),
            block_size: volume.block_size() as u64,
        };
        meta.load(first)?;
        Ok(meta)
    }

    fn load(&mut self, block_id: BlockId) -> Result<()> {
        let block = self.volume.read_block(block_id)?;
        if block.len() as u64 != self.block_size {
            return Err(SabotError::Storage(format!(
                "meta block {} returned {} bytes",
                block_id,
                block.len()
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    fn u64_at(&self, offset: u64) -> Result<u64> {
        let idx = (offset / self.block_size) as usize;
        let within = (offset % self.block_size) as usize;
        let block = self.blocks.get(idx).ok_or_else(|| {
            SabotError::Serialization(format!("meta offset {} is past the loaded meta blocks", offset))
        })?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&block[within..within + 8]);
        Ok(u64::from_le_bytes(buf))
    }

    fn into_bytes(self) -> Vec<u8> {
        self.blocks.iter().flat_map(|b| b.iter().copied()).collect()
    }
}

/// Sequential reads over the assembled trailer bytes
struct TrailerCursor<'t> {
    bytes: &'t [u8],
    pos: usize,
}

impl<'t> TrailerCursor<'t> {
    fn new(bytes: &'t [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read(&mut self, out: &mut [u8]) -> Result<()> {
        let end = self.pos + out.len();
        let src = self.bytes.get(self.pos..end).ok_or_else(|| {
            SabotError::Serialization(format!("meta trailer ends before byte {}", end))
        })?;
        out.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Fail unless `count` records of `size` bytes remain
    fn check_records(&self, count: u64, size: u64, what: &str) -> Result<()> {
        let left = (self.bytes.len() - self.pos) as u64;
        if count.checked_mul(size).map_or(true, |needed| needed > left) {
            return Err(SabotError::Serialization(format!(
                "meta trailer claims {} {} with {} bytes left",
                count, what, left
            )));
        }
        Ok(())
    }
}
