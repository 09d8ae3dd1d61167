//! Block writes with written-block auditing
//!
//! Every block write of a file build goes through one [`BlockWriter`]. With
//! debug assertions (or the `block-audit` feature) it remembers each block id
//! it wrote, and [`BlockWriter::audit`] fails if any block of the finished
//! file was never written. Otherwise tracking compiles to nothing.

use bytes::Bytes;

use crate::error::Result;

use super::{BlockId, CachePolicy, CompletionTrigger, Priority, VolumeManager};

/// True when block writes are tracked
pub const AUDIT_ENABLED: bool = cfg!(any(debug_assertions, feature = "block-audit"));

pub struct BlockWriter<'a> {
    volume: &'a dyn VolumeManager,
    priority: Priority,
    written: tracking::WrittenBlocks,
}

impl<'a> BlockWriter<'a> {
    pub fn new(volume: &'a dyn VolumeManager, priority: Priority) -> Self {
        Self {
            volume,
            priority,
            written: tracking::WrittenBlocks::default(),
        }
    }

    pub fn volume(&self) -> &'a dyn VolumeManager {
        self.volume
    }

    pub fn block_size(&self) -> usize {
        self.volume.block_size()
    }

    pub fn write(&self, buf: Bytes, block_id: BlockId, trigger: &CompletionTrigger) -> Result<()> {
        self.written.record(block_id);
        self.volume
            .write_block(buf, block_id, self.priority, CachePolicy::KeepInCache, trigger)
    }

    /// Fail if any of `blocks` was never written through this writer
    pub fn audit(&self, blocks: &[BlockId]) -> Result<()> {
        self.written.check(blocks)
    }
}

#[cfg(any(debug_assertions, feature = "block-audit"))]
mod tracking {
    use std::collections::HashSet;

    use parking_lot::Mutex;

    use crate::disk::BlockId;
    use crate::error::{Result, SabotError};

    #[derive(Default)]
    pub struct WrittenBlocks(Mutex<HashSet<BlockId>>);

    impl WrittenBlocks {
        pub fn record(&self, block_id: BlockId) {
            self.0.lock().insert(block_id);
        }

        pub fn check(&self, blocks: &[BlockId]) -> Result<()> {
            let written = self.0.lock();
            match blocks.iter().find(|&id| !written.contains(id)) {
                Some(id) => Err(SabotError::Invariant(format!(
                    "block {} was allocated but never written",
                    id
                ))),
                None => Ok(()),
            }
        }
    }
}

#[cfg(not(any(debug_assertions, feature = "block-audit")))]
mod tracking {
    use crate::disk::BlockId;
    use crate::error::Result;

    #[derive(Default)]
    pub struct WrittenBlocks;

    impl WrittenBlocks {
        pub fn record(&self, _block_id: BlockId) {}

        pub fn check(&self, _blocks: &[BlockId]) -> Result<()> {
            Ok(())
        }
    }
}
