//! Page cache and byte-range reads over a file's blocks

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, SabotError};

use super::{BlockId, VolumeManager};

/// FIFO cache of whole pages keyed by `(block_id, page_size)`.
///
/// ## Concurrency:
/// - `inner`: one mutex; loads happen outside the lock
#[derive(Debug)]
pub struct PageCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    pages: HashMap<(BlockId, usize), Bytes>,
    order: VecDeque<(BlockId, usize)>,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn get_or_load(
        &self,
        block_id: BlockId,
        page_size: usize,
        load: impl FnOnce() -> Result<Bytes>,
    ) -> Result<Bytes> {
        let key = (block_id, page_size);
        if let Some(page) = self.inner.lock().pages.get(&key) {
            return Ok(page.clone());
        }
        let page = load()?;
        let mut inner = self.inner.lock();
        if inner.pages.insert(key, page.clone()).is_none() {
            inner.order.push_back(key);
        }
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.pages.remove(&old);
            }
        }
        Ok(page)
    }

    pub fn invalidate(&self, block_id: BlockId, page_size: usize) {
        let mut inner = self.inner.lock();
        let key = (block_id, page_size);
        if inner.pages.remove(&key).is_some() {
            inner.order.retain(|k| *k != key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads byte ranges of a file, addressing blocks through its block list
pub struct BlockReader<'a> {
    volume: &'a dyn VolumeManager,
    blocks: Cow<'a, [BlockId]>,
    cache: PageCache,
    block_size: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(volume: &'a dyn VolumeManager, blocks: Cow<'a, [BlockId]>, cache_blocks: usize) -> Self {
        Self {
            block_size: volume.block_size(),
            volume,
            blocks,
            cache: PageCache::new(cache_blocks),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes addressable through the block list
    pub fn len(&self) -> u64 {
        (self.blocks.len() * self.block_size) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn read_range(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let end = offset + out.len() as u64;
        if end > self.len() {
            return Err(SabotError::Invariant(format!(
                "read of [{}, {}) beyond a file of {} bytes",
                offset,
                end,
                self.len()
            )));
        }
        let bs = self.block_size as u64;
        let mut pos = offset;
        let mut done = 0usize;
        while done < out.len() {
            let idx = (pos / bs) as usize;
            let within = (pos % bs) as usize;
            let n = (self.block_size - within).min(out.len() - done);
            let page = self.page(idx)?;
            out[done..done + n].copy_from_slice(&page[within..within + n]);
            done += n;
            pos += n as u64;
        }
        Ok(())
    }

    pub fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_range(offset, &mut out)?;
        Ok(out)
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_range(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn page(&self, idx: usize) -> Result<Bytes> {
        let block_id = self.blocks[idx];
        let page = self
            .cache
            .get_or_load(block_id, self.block_size, || self.volume.read_block(block_id))?;
        if page.len() < self.block_size {
            return Err(SabotError::Storage(format!(
                "block {} returned {} bytes, expected {}",
                block_id,
                page.len(),
                self.block_size
            )));
        }
        Ok(page)
    }
}
