//! Memory Layer
//!
//! One batch of versioned updates waiting to be written as a data file.
//!
//! ## Responsibilities
//! - Own each update's arena of interned keys and values
//! - Hand out entries sorted by index, key and descending sequence number
//! - Deliver exactly one terminal outcome to every update's notifier
//!
//! ```text
//!   MemoryLayer
//!     └─ Update { seq, meta, id, arena, notifier }
//!          └─ Entry { index_id, key, op }   (key and op interned in the arena)
//! ```

use std::fmt;

use crossbeam::channel::{self, Receiver};
use serde::{Deserialize, Serialize};

use crate::atom::{Arena, Core};
use crate::error::{Result, SabotError};
use crate::sabot::{total_state_order, Value};

/// Identity of a logical index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexId([u8; 16]);

impl IndexId {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Big-endian, so numeric order matches byte order
    pub fn from_u128(n: u128) -> Self {
        Self(n.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Terminal outcome of an update's file write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Completed,
    Failed,
}

/// Called exactly once with the update's outcome
pub type Notifier = Box<dyn FnOnce(Outcome) + Send>;

/// A notifier that forwards its outcome to the returned receiver
pub fn notification_channel() -> (Notifier, Receiver<Outcome>) {
    let (tx, rx) = channel::bounded(1);
    let notifier: Notifier = Box::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    (notifier, rx)
}

struct Entry {
    index_id: IndexId,
    key: Value,
    key_core: Core,
    op_core: Core,
}

/// One versioned mutation batch sharing a sequence number, metadata and id
pub struct Update {
    seq: u64,
    arena: Arena,
    meta: Core,
    id: Core,
    entries: Vec<Entry>,
    notifier: Option<Notifier>,
}

impl Update {
    pub fn new(seq: u64, meta: &Value, id: &Value) -> Result<Self> {
        let mut arena = Arena::new();
        let meta = arena.intern(meta)?;
        let id = arena.intern(id)?;
        Ok(Self {
            seq,
            arena,
            meta,
            id,
            entries: Vec::new(),
            notifier: None,
        })
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record `op` for `key` in the given index. Keys must be tuples.
    pub fn add_entry(&mut self, index_id: IndexId, key: &Value, op: &Value) -> Result<()> {
        if !key.is_tuple() {
            return Err(SabotError::Invariant(format!(
                "index {} key must be a tuple, got {}",
                index_id,
                key.kind()
            )));
        }
        let key_core = self.arena.intern(key)?;
        let op_core = self.arena.intern(op)?;
        self.entries.push(Entry {
            index_id,
            key: key.clone(),
            key_core,
            op_core,
        });
        Ok(())
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Borrowed view of one entry with its update's fields
#[derive(Clone, Copy)]
pub struct EntryRef<'a> {
    pub index_id: IndexId,
    pub seq: u64,
    pub key: &'a Value,
    pub key_core: Core,
    pub op_core: Core,
    pub meta_core: Core,
    pub id_core: Core,
    pub arena: &'a Arena,
}

/// The batch of updates a data file is built from
#[derive(Default)]
pub struct MemoryLayer {
    updates: Vec<Update>,
}

impl MemoryLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: Update) {
        self.updates.push(update);
    }

    /// Number of updates
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn num_entries(&self) -> usize {
        self.updates.iter().map(Update::len).sum()
    }

    pub fn updates(&self) -> &[Update] {
        &self.updates
    }

    /// Every entry, ordered by index id, then key, then newest first
    pub fn sorted_entries(&self) -> Vec<EntryRef<'_>> {
        let mut entries: Vec<EntryRef<'_>> = self
            .updates
            .iter()
            .flat_map(|update| {
                update.entries.iter().map(move |entry| EntryRef {
                    index_id: entry.index_id,
                    seq: update.seq,
                    key: &entry.key,
                    key_core: entry.key_core,
                    op_core: entry.op_core,
                    meta_core: update.meta,
                    id_core: update.id,
                    arena: &update.arena,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.index_id
                .cmp(&b.index_id)
                .then_with(|| total_state_order(a.key, b.key))
                .then_with(|| b.seq.cmp(&a.seq))
        });
        entries
    }

    /// Notifiers still pending, in update order
    pub(crate) fn take_notifiers(&mut self) -> Vec<Notifier> {
        self.updates.iter_mut().filter_map(|u| u.notifier.take()).collect()
    }
}

/// Deliver `outcome` to every notifier
pub(crate) fn notify_all(notifiers: Vec<Notifier>, outcome: Outcome) {
    for notify in notifiers {
        notify(outcome);
    }
}

impl fmt::Debug for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLayer")
            .field("updates", &self.updates.len())
            .field("entries", &self.num_entries())
            .finish()
    }
}
