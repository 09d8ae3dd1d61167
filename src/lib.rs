//! # Sabot
//!
//! A dynamically typed value runtime and the immutable, block-based data
//! file it serializes to:
//! - Kinds, types and values with total orders, prefix matching and hashing
//! - Fixed-size cores referencing deduplicated notes in an arena
//! - External sort for arenas, hash buckets and the update index
//! - Data files with sorted keys, history chains and prefix hash tables
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MemoryLayer                             │
//! │            (Updates: seq, meta, id, entries)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ sorted entries
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   DataFile::write                            │
//! │   arenas → key ranges → hashes → update index → meta         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ IndexManager│          │ OutStream / │
//!   │ (ext. sort) │          │ Collisions  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │   Engine    │
//!                           │  (Volume)   │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod sabot;
pub mod atom;
pub mod disk;
pub mod layer;
pub mod data_file;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{SabotError, Result};
pub use config::Config;
pub use data_file::{DataFile, DataFileReader};
pub use layer::{IndexId, MemoryLayer, Outcome, Update};
pub use sabot::{Comparison, Kind, Type, Value};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Sabot
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
