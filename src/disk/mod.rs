//! Disk Module
//!
//! Block-level collaborators of the data file writer and the utilities built
//! on top of them.
//!
//! ```text
//!   ┌──────────────────────────────┐        ┌─────────────────────────────┐
//!   │ Engine                       │        │ VolumeManager               │
//!   │  append_reserve_blocks       │───────►│  write_block (async,        │
//!   │  free_seq_blocks             │        │    signals a trigger)       │
//!   │  insert_file (catalog)       │        │  read_block                 │
//!   └──────────────────────────────┘        │  sync_to_disk               │
//!                                           └──────────────▲──────────────┘
//!   OutStream ──► BlockWriter (audit) ───────────────────────┘
//!   InStream  ──► BlockReader ──► PageCache ──► read_block
//! ```

mod allocator;
mod audit;
mod block_vec;
mod file;
mod in_stream;
mod index_manager;
mod memory;
mod out_stream;
mod page_cache;
mod trigger;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use allocator::BlockAllocator;
pub use audit::{BlockWriter, AUDIT_ENABLED};
pub use block_vec::{runs_of, BlockVec};
pub use file::{FileEngine, FileVolume};
pub use in_stream::InStream;
pub use index_manager::{Cursor, IndexManager, OrderFn};
pub use memory::{MemoryEngine, MemoryVolume};
pub use out_stream::{CollisionBlocks, OutStream};
pub use page_cache::{BlockReader, PageCache};
pub use trigger::CompletionTrigger;

/// Physical block address within a volume
pub type BlockId = u64;

/// Device class to allocate from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageSpeed {
    Fast,
    Slow,
}

/// Block write priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Whether a written block should stay cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    KeepInCache,
    ClearFromCache,
}

/// Kinds of files the catalog knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    DataFile,
}

/// Catalog entry for a committed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: u64,
    pub kind: FileKind,
    pub gen_id: u64,
    /// First meta block of the file
    pub starting_block_id: BlockId,
    /// Position of that block in the file's block list
    pub starting_block_offset: u64,
    /// Length in bytes (whole blocks)
    pub file_length: u64,
    pub num_keys: u64,
    pub lowest_seq: u64,
    pub highest_seq: u64,
}

/// Reads and writes fixed-size blocks.
///
/// `write_block` may complete asynchronously; it must call
/// `trigger.begin()` before returning and `trigger.complete(..)` exactly
/// once when the write lands.
pub trait VolumeManager: Send + Sync {
    fn block_size(&self) -> usize;

    fn write_block(
        &self,
        buf: Bytes,
        block_id: BlockId,
        priority: Priority,
        policy: CachePolicy,
        trigger: &CompletionTrigger,
    ) -> Result<()>;

    fn read_block(&self, block_id: BlockId) -> Result<Bytes>;

    /// Make the given `(first_block, count)` runs durable
    fn sync_to_disk(&self, ranges: &[(BlockId, u64)]) -> Result<()>;
}

/// Block allocation and the file catalog
pub trait Engine: Send + Sync {
    fn volume(&self) -> &dyn VolumeManager;

    /// Allocate `count` blocks and append their ids to `out`
    fn append_reserve_blocks(&self, speed: StorageSpeed, count: usize, out: &mut BlockVec) -> Result<()>;

    /// Return `count` blocks starting at `start` to the allocator
    fn free_seq_blocks(&self, start: BlockId, count: u64) -> Result<()>;

    /// Register a committed file; completes through `trigger`
    fn insert_file(&self, info: FileInfo, trigger: &CompletionTrigger) -> Result<()>;

    fn files(&self) -> Vec<FileInfo>;
}
