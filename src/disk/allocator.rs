//! Block allocator shared by the engines

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::error::{Result, SabotError};

use super::BlockId;

/// Hands out the lowest free block ids first, then grows the volume.
///
/// ## Concurrency:
/// - One mutex around the free set and the high-water mark
#[derive(Debug, Default)]
pub struct BlockAllocator {
    state: Mutex<AllocState>,
}

#[derive(Debug, Default)]
struct AllocState {
    next: BlockId,
    free: BTreeSet<BlockId>,
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted high-water mark and free list
    pub fn from_parts(next: BlockId, free: impl IntoIterator<Item = BlockId>) -> Self {
        Self {
            state: Mutex::new(AllocState {
                next,
                free: free.into_iter().collect(),
            }),
        }
    }

    pub fn reserve(&self, count: usize) -> Vec<BlockId> {
        let mut state = self.state.lock();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            match state.free.pop_first() {
                Some(id) => out.push(id),
                None => break,
            }
        }
        while out.len() < count {
            out.push(state.next);
            state.next += 1;
        }
        out
    }

    pub fn free(&self, start: BlockId, count: u64) -> Result<()> {
        let mut state = self.state.lock();
        for id in start..start + count {
            if id >= state.next || !state.free.insert(id) {
                return Err(SabotError::Storage(format!("block {} freed but not allocated", id)));
            }
        }
        Ok(())
    }

    /// Blocks currently handed out
    pub fn in_use(&self) -> u64 {
        let state = self.state.lock();
        state.next - state.free.len() as u64
    }

    pub fn high_water(&self) -> BlockId {
        self.state.lock().next
    }

    pub fn free_list(&self) -> Vec<BlockId> {
        self.state.lock().free.iter().copied().collect()
    }
}
