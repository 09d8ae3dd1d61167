//! Atom Module
//!
//! The storage form of values: fixed-size [`Core`] references and the
//! [`Arena`] of notes they point into.
//!
//! ```text
//!   Core (32 bytes) ──offset──► Arena [ note | note | note ... ]
//!                                         │
//!                                         └─ child Cores ──► notes in the same arena
//! ```

mod arena;
mod core;

pub use self::arena::{
    decode_core, note_len, remap_children, Arena, ArenaId, Note, NoteSource, NOTE_HEADER_SIZE,
};
pub use self::core::{Core, CORE_SIZE};

pub(crate) use self::arena::pad8;
