//! In-memory engine
//!
//! Blocks live in a map. Writes are applied by a background writer thread
//! fed through a channel, so they complete asynchronously exactly like
//! device writes do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SabotError};

use super::{
    BlockAllocator, BlockId, BlockVec, CachePolicy, CompletionTrigger, Engine, FileInfo, Priority,
    StorageSpeed, VolumeManager,
};

struct WriteJob {
    block_id: BlockId,
    buf: Bytes,
    trigger: CompletionTrigger,
}

/// Volume backed by a block map.
///
/// ## Concurrency:
/// - `blocks`: RwLock, written only by the writer thread
/// - `write_budget`: atomic; negative means unlimited
pub struct MemoryVolume {
    block_size: usize,
    blocks: Arc<RwLock<HashMap<BlockId, Bytes>>>,
    sender: Option<Sender<WriteJob>>,
    worker: Option<JoinHandle<()>>,
    writes: AtomicU64,
    syncs: AtomicU64,
    write_budget: AtomicI64,
}

impl MemoryVolume {
    pub fn new(block_size: usize) -> Self {
        let blocks: Arc<RwLock<HashMap<BlockId, Bytes>>> = Arc::default();
        let (sender, receiver) = channel::unbounded::<WriteJob>();
        let sink = Arc::clone(&blocks);
        let worker = std::thread::spawn(move || {
            for job in receiver {
                sink.write().insert(job.block_id, job.buf);
                job.trigger.complete(Ok(()));
            }
        });
        Self {
            block_size,
            blocks,
            sender: Some(sender),
            worker: Some(worker),
            writes: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
            write_budget: AtomicI64::new(-1),
        }
    }

    /// Fail every write after the next `writes` ones. `None` lifts the limit.
    pub fn set_write_budget(&self, writes: Option<u64>) {
        let budget = writes.map_or(-1, |w| w as i64);
        self.write_budget.store(budget, Ordering::SeqCst);
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn contains(&self, block_id: BlockId) -> bool {
        self.blocks.read().contains_key(&block_id)
    }

    fn discard(&self, block_id: BlockId) {
        self.blocks.write().remove(&block_id);
    }

    fn take_budget(&self) -> bool {
        self.write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| match b {
                b if b < 0 => Some(b),
                0 => None,
                b => Some(b - 1),
            })
            .is_ok()
    }
}

impl VolumeManager for MemoryVolume {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn write_block(
        &self,
        buf: Bytes,
        block_id: BlockId,
        _priority: Priority,
        _policy: CachePolicy,
        trigger: &CompletionTrigger,
    ) -> Result<()> {
        if buf.len() != self.block_size {
            return Err(SabotError::Storage(format!(
                "write of {} bytes to block {} (block size {})",
                buf.len(),
                block_id,
                self.block_size
            )));
        }
        if !self.take_budget() {
            return Err(SabotError::Storage(format!("write to block {} rejected", block_id)));
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SabotError::Storage("volume is shut down".to_string()))?;
        trigger.begin();
        let job = WriteJob {
            block_id,
            buf,
            trigger: trigger.clone(),
        };
        if sender.send(job).is_err() {
            let err = SabotError::Storage("block writer thread is gone".to_string());
            trigger.complete(Err(SabotError::Storage(err.to_string())));
            return Err(err);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_block(&self, block_id: BlockId) -> Result<Bytes> {
        self.blocks
            .read()
            .get(&block_id)
            .cloned()
            .ok_or(SabotError::BlockNotFound(block_id))
    }

    fn sync_to_disk(&self, _ranges: &[(BlockId, u64)]) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryVolume {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Engine over a [`MemoryVolume`] with an in-memory catalog
pub struct MemoryEngine {
    volume: MemoryVolume,
    allocator: BlockAllocator,
    catalog: Mutex<Vec<FileInfo>>,
}

impl MemoryEngine {
    pub fn new(block_size: usize) -> Self {
        Self {
            volume: MemoryVolume::new(block_size),
            allocator: BlockAllocator::new(),
            catalog: Mutex::new(Vec::new()),
        }
    }

    pub fn memory_volume(&self) -> &MemoryVolume {
        &self.volume
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    pub fn file(&self, file_id: u64) -> Option<FileInfo> {
        self.catalog.lock().iter().find(|f| f.file_id == file_id).cloned()
    }
}

impl Engine for MemoryEngine {
    fn volume(&self) -> &dyn VolumeManager {
        &self.volume
    }

    fn append_reserve_blocks(&self, _speed: StorageSpeed, count: usize, out: &mut BlockVec) -> Result<()> {
        out.extend(self.allocator.reserve(count));
        Ok(())
    }

    fn free_seq_blocks(&self, start: BlockId, count: u64) -> Result<()> {
        self.allocator.free(start, count)?;
        for id in start..start + count {
            self.volume.discard(id);
        }
        Ok(())
    }

    fn insert_file(&self, info: FileInfo, trigger: &CompletionTrigger) -> Result<()> {
        trigger.begin();
        tracing::debug!(
            file_id = info.file_id,
            starting_block = info.starting_block_id,
            length = info.file_length,
            "Registering file"
        );
        self.catalog.lock().push(info);
        trigger.complete(Ok(()));
        Ok(())
    }

    fn files(&self) -> Vec<FileInfo> {
        self.catalog.lock().clone()
    }
}
