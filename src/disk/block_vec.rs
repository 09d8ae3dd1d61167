//! Ordered list of the blocks that make up one file

use crate::error::{Result, SabotError};

use super::BlockId;

/// The file's blocks in logical order. Byte offset `o` of the file lives in
/// block `o / block_size`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockVec {
    blocks: Vec<BlockId>,
}

impl BlockVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(blocks: Vec<BlockId>) -> Self {
        Self { blocks }
    }

    /// Expand `(first_block, count)` runs
    pub fn from_runs(runs: &[(BlockId, u64)]) -> Self {
        let blocks = runs
            .iter()
            .flat_map(|&(start, count)| start..start + count)
            .collect();
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn as_slice(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn push(&mut self, block_id: BlockId) {
        self.blocks.push(block_id);
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = BlockId>) {
        self.blocks.extend(ids);
    }

    pub fn block_at(&self, idx: usize) -> Result<BlockId> {
        self.blocks.get(idx).copied().ok_or_else(|| {
            SabotError::Invariant(format!(
                "block index {} beyond a file of {} blocks",
                idx,
                self.blocks.len()
            ))
        })
    }

    /// Keep the first `keep` blocks, returning the rest
    pub fn truncate_to(&mut self, keep: usize) -> Vec<BlockId> {
        if keep >= self.blocks.len() {
            return Vec::new();
        }
        self.blocks.split_off(keep)
    }

    /// Runs of consecutive block ids, in file order
    pub fn seq_runs(&self) -> Vec<(BlockId, u64)> {
        runs_of(&self.blocks)
    }
}

/// Collapse ids into `(first_block, count)` runs of consecutive ids
pub fn runs_of(blocks: &[BlockId]) -> Vec<(BlockId, u64)> {
    let mut runs: Vec<(BlockId, u64)> = Vec::new();
    for &id in blocks {
        match runs.last_mut() {
            Some((start, count)) if *start + *count == id => *count += 1,
            _ => runs.push((id, 1)),
        }
    }
    runs
}
