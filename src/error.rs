//! Error types for Sabot
//!
//! Provides a unified error type for the value runtime and the data file writer.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type alias using SabotError
pub type Result<T> = std::result::Result<T, SabotError>;

/// Unified error type for Sabot operations
#[derive(Debug, Error)]
pub enum SabotError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Logic Errors (abort the current file build)
    // -------------------------------------------------------------------------
    /// A kind pairing that no valid type can produce
    #[error("Unreachable dispatch: {0}")]
    Unreachable(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for SabotError {
    fn from(err: bincode::Error) -> Self {
        SabotError::Serialization(err.to_string())
    }
}

impl From<TryReserveError> for SabotError {
    fn from(err: TryReserveError) -> Self {
        SabotError::OutOfMemory(err.to_string())
    }
}
