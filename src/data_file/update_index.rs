//! Global update index
//!
//! ```text
//!   ┌──────────────────────────────────────────────┬──────────────────────┐
//!   │ bucket headers (88 bytes × updates)          │ key pointers (u64)   │
//!   │ seq │ meta Core │ id Core │ bucket_ptr │ count│                      │
//!   └──────────────────────────────────────────────┴──────────────────────┘
//! ```
//!
//! One bucket per distinct sequence number, in ascending order. Header slots
//! left over when several updates share a sequence number are zero-filled;
//! a zero count marks them.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::atom::Core;
use crate::disk::{BlockVec, CollisionBlocks, IndexManager, OutStream};
use crate::error::{Result, SabotError};

use super::{BuildCtx, UPDATE_HEADER_SIZE, UPDATE_POINTER_SIZE};

/// A key record touched by an update
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct UpdatePtr {
    seq: u64,
    meta: Core,
    id: Core,
    /// Absolute for current keys, relative to the index's history section
    /// otherwise
    ptr: u64,
    current: bool,
    index: u32,
}

impl UpdatePtr {
    pub fn current(seq: u64, meta: Core, id: Core, ptr: u64, index: u32) -> Self {
        Self {
            seq,
            meta,
            id,
            ptr,
            current: true,
            index,
        }
    }

    pub fn history(seq: u64, meta: Core, id: Core, ptr: u64, index: u32) -> Self {
        Self {
            seq,
            meta,
            id,
            ptr,
            current: false,
            index,
        }
    }
}

pub(crate) fn update_order(lhs: &UpdatePtr, rhs: &UpdatePtr) -> Ordering {
    lhs.seq
        .cmp(&rhs.seq)
        .then(lhs.index.cmp(&rhs.index))
        .then(rhs.current.cmp(&lhs.current))
        .then(lhs.ptr.cmp(&rhs.ptr))
}

/// Where the update index landed and the sequence range it covers
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UpdateIndex {
    pub byte_offset: u64,
    pub num_buckets: u64,
    pub lowest_seq: u64,
    pub highest_seq: u64,
}

struct Bucket {
    first: UpdatePtr,
    ptr_offset: u64,
    count: u64,
}

fn write_header(out: &mut OutStream<'_>, bucket: &Bucket) -> Result<()> {
    out.write_u64(bucket.first.seq)?;
    out.write_core(Some(&bucket.first.meta))?;
    out.write_core(Some(&bucket.first.id))?;
    out.write_u64(bucket.ptr_offset)?;
    out.write_u64(bucket.count)
}

pub(crate) fn write_update_index(
    ctx: &BuildCtx<'_>,
    blocks: &mut BlockVec,
    num_updates: u64,
    updates: IndexManager<UpdatePtr>,
    history_offsets: &[u64],
) -> Result<UpdateIndex> {
    let bs = ctx.block_size;
    let start = blocks.len() as u64 * bs;
    let num_ptrs = updates.len() as u64;
    let mut index = UpdateIndex {
        byte_offset: start,
        ..UpdateIndex::default()
    };
    let total = num_updates * UPDATE_HEADER_SIZE + num_ptrs * UPDATE_POINTER_SIZE;
    if total == 0 {
        return Ok(index);
    }
    ctx.reserve(blocks, ctx.blocks_for(total))?;

    let ptr_start = start + num_updates * UPDATE_HEADER_SIZE;
    let collisions = CollisionBlocks::new(bs as usize);
    if ptr_start % bs != 0 {
        collisions.register((ptr_start / bs) as usize);
    }

    let mut headers = OutStream::new(&ctx.writer, &*blocks, &collisions, &ctx.trigger, start);
    let mut ptrs = OutStream::new(&ctx.writer, &*blocks, &collisions, &ctx.trigger, ptr_start);
    let mut open: Option<Bucket> = None;
    for item in updates.cursor(ctx.config.merge_batch_size)? {
        let item = item?;
        let target = if item.current {
            item.ptr
        } else {
            let base = history_offsets.get(item.index as usize).ok_or_else(|| {
                SabotError::Invariant(format!("update points into unknown index {}", item.index))
            })?;
            base + item.ptr
        };

        match open.as_mut() {
            Some(bucket) if bucket.first.seq == item.seq => bucket.count += 1,
            _ => {
                if let Some(done) = open.take() {
                    write_header(&mut headers, &done)?;
                    index.num_buckets += 1;
                }
                if index.num_buckets == 0 {
                    index.lowest_seq = item.seq;
                }
                index.highest_seq = item.seq;
                open = Some(Bucket {
                    first: item,
                    ptr_offset: ptrs.offset(),
                    count: 1,
                });
            }
        }
        ptrs.write_u64(target)?;
    }
    if let Some(done) = open.take() {
        write_header(&mut headers, &done)?;
        index.num_buckets += 1;
    }

    if headers.offset() > ptr_start {
        return Err(SabotError::Invariant(format!(
            "{} update buckets for {} updates",
            index.num_buckets, num_updates
        )));
    }
    headers.write_zeros(ptr_start - headers.offset())?;
    headers.finish()?;
    ptrs.finish()?;
    collisions.flush(&ctx.writer, blocks, &ctx.trigger)?;
    ctx.trigger.wait()?;

    tracing::debug!(
        buckets = index.num_buckets,
        pointers = num_ptrs,
        lowest_seq = index.lowest_seq,
        highest_seq = index.highest_seq,
        "Wrote update index"
    );
    Ok(index)
}
