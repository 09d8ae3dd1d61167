//! Sequential block writer with collision-block buffering
//!
//! An [`OutStream`] fills one block buffer at a time and hands each finished
//! block to the volume. A block shared by two sections (or written twice)
//! is registered in a [`CollisionBlocks`] map instead: every stream that
//! touches it writes into the shared buffer, and the map is flushed once the
//! last writer is done.
//!
//! ```text
//!   section A ──────────────┐┌────────────── section B
//!   [ block ][ block ][ collision ][ block ][ block ]
//!                        ▲ buffered, flushed explicitly
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::atom::Core;
use crate::error::Result;

use super::{BlockVec, BlockWriter, CompletionTrigger};

/// Buffers for blocks written by more than one stream, keyed by the block's
/// index in the file
pub struct CollisionBlocks {
    blocks: RefCell<BTreeMap<usize, BytesMut>>,
    block_size: usize,
}

impl CollisionBlocks {
    pub fn new(block_size: usize) -> Self {
        Self {
            blocks: RefCell::new(BTreeMap::new()),
            block_size,
        }
    }

    /// Start buffering block `idx` (zero-filled). No-op if already present.
    pub fn register(&self, idx: usize) {
        self.blocks
            .borrow_mut()
            .entry(idx)
            .or_insert_with(|| BytesMut::zeroed(self.block_size));
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.blocks.borrow().contains_key(&idx)
    }

    pub fn len(&self) -> usize {
        self.blocks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_at(&self, idx: usize, within: usize, bytes: &[u8]) {
        if let Some(buf) = self.blocks.borrow_mut().get_mut(&idx) {
            buf[within..within + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Write the current contents of block `idx`, keeping the buffer
    pub fn flush_one(
        &self,
        idx: usize,
        writer: &BlockWriter<'_>,
        blocks: &BlockVec,
        trigger: &CompletionTrigger,
    ) -> Result<()> {
        let snapshot = self
            .blocks
            .borrow()
            .get(&idx)
            .map(|buf| Bytes::copy_from_slice(buf));
        if let Some(buf) = snapshot {
            writer.write(buf, blocks.block_at(idx)?, trigger)?;
        }
        Ok(())
    }

    /// Write every buffered block
    pub fn flush(&self, writer: &BlockWriter<'_>, blocks: &BlockVec, trigger: &CompletionTrigger) -> Result<()> {
        let indexes: Vec<usize> = self.blocks.borrow().keys().copied().collect();
        for idx in indexes {
            self.flush_one(idx, writer, blocks, trigger)?;
        }
        Ok(())
    }
}

pub struct OutStream<'a> {
    writer: &'a BlockWriter<'a>,
    blocks: &'a BlockVec,
    collisions: &'a CollisionBlocks,
    trigger: &'a CompletionTrigger,
    block_size: usize,
    offset: u64,
    /// Buffer of the current non-collision block
    cur: Option<(usize, BytesMut)>,
}

impl<'a> OutStream<'a> {
    pub fn new(
        writer: &'a BlockWriter<'a>,
        blocks: &'a BlockVec,
        collisions: &'a CollisionBlocks,
        trigger: &'a CompletionTrigger,
        offset: u64,
    ) -> Self {
        Self {
            block_size: writer.block_size(),
            writer,
            blocks,
            collisions,
            trigger,
            offset,
            cur: None,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        let bs = self.block_size as u64;
        while !bytes.is_empty() {
            let idx = (self.offset / bs) as usize;
            let within = (self.offset % bs) as usize;
            let n = (self.block_size - within).min(bytes.len());
            if self.collisions.contains(idx) {
                self.collisions.write_at(idx, within, &bytes[..n]);
            } else {
                if !matches!(&self.cur, Some((cur_idx, _)) if *cur_idx == idx) {
                    self.flush_current()?;
                    self.cur = Some((idx, BytesMut::zeroed(self.block_size)));
                }
                if let Some((_, buf)) = self.cur.as_mut() {
                    buf[within..within + n].copy_from_slice(&bytes[..n]);
                }
            }
            self.offset += n as u64;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write(&value.to_le_bytes())
    }

    /// Writes an empty slot for `None`
    pub fn write_core(&mut self, core: Option<&Core>) -> Result<()> {
        self.write(&Core::encode(core))
    }

    pub fn write_zeros(&mut self, mut len: u64) -> Result<()> {
        const ZEROS: [u8; 512] = [0u8; 512];
        while len > 0 {
            let n = len.min(ZEROS.len() as u64) as usize;
            self.write(&ZEROS[..n])?;
            len -= n as u64;
        }
        Ok(())
    }

    /// Write out the current block and return the final offset
    pub fn finish(mut self) -> Result<u64> {
        self.flush_current()?;
        Ok(self.offset)
    }

    fn flush_current(&mut self) -> Result<()> {
        if let Some((idx, buf)) = self.cur.take() {
            let block_id = self.blocks.block_at(idx)?;
            self.writer.write(buf.freeze(), block_id, self.trigger)?;
        }
        Ok(())
    }
}
