//! Configuration for Sabot
//!
//! Centralized configuration with sensible defaults.

use crate::disk::{Priority, StorageSpeed};
use crate::error::{Result, SabotError};

/// Smallest logical block size we accept
pub const MIN_BLOCK_SIZE: usize = 256;

/// Main configuration for a data file build
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Block Layout
    // -------------------------------------------------------------------------
    /// Logical block size in bytes. Every section of a data file starts on a
    /// block boundary; partial blocks shared by two sections are buffered as
    /// collision blocks.
    pub block_size: usize,

    // -------------------------------------------------------------------------
    // External Sort
    // -------------------------------------------------------------------------
    /// Elements buffered in memory before a sorted run spills to a temp file
    pub sort_buf_size: usize,

    /// Runs at least this large are sorted on several threads
    pub sort_buf_min_parallel_size: usize,

    /// Worker threads for the parallel in-memory sort
    pub sort_threads: usize,

    /// Number of spilled runs that triggers a consolidating merge
    pub temp_file_consol_thresh: usize,

    /// Records fetched per read when merging spilled runs
    pub merge_batch_size: usize,

    // -------------------------------------------------------------------------
    // I/O
    // -------------------------------------------------------------------------
    /// Device class blocks are allocated from
    pub storage_speed: StorageSpeed,

    /// Priority of block writes
    pub priority: Priority,

    /// Blocks kept by each reader's page cache
    pub page_cache_blocks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024, // 64 KB
            sort_buf_size: 524_288,
            sort_buf_min_parallel_size: 32_768,
            sort_threads: 4,
            temp_file_consol_thresh: 8,
            merge_batch_size: 1024,
            storage_speed: StorageSpeed::Fast,
            priority: Priority::Medium,
            page_cache_blocks: 64,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the writer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(SabotError::Config(format!(
                "block_size {} is below the minimum of {}",
                self.block_size, MIN_BLOCK_SIZE
            )));
        }
        if self.block_size % 8 != 0 {
            return Err(SabotError::Config(format!(
                "block_size {} is not a multiple of 8",
                self.block_size
            )));
        }
        if self.sort_buf_size == 0 {
            return Err(SabotError::Config("sort_buf_size must be non-zero".to_string()));
        }
        if self.sort_threads == 0 {
            return Err(SabotError::Config("sort_threads must be non-zero".to_string()));
        }
        if self.merge_batch_size == 0 {
            return Err(SabotError::Config("merge_batch_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the logical block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the in-memory sort buffer size (in elements)
    pub fn sort_buf_size(mut self, size: usize) -> Self {
        self.config.sort_buf_size = size;
        self
    }

    /// Set the run size above which sorting goes parallel
    pub fn sort_buf_min_parallel_size(mut self, size: usize) -> Self {
        self.config.sort_buf_min_parallel_size = size;
        self
    }

    /// Set the number of sort worker threads
    pub fn sort_threads(mut self, count: usize) -> Self {
        self.config.sort_threads = count;
        self
    }

    /// Set the spilled-run count that triggers consolidation
    pub fn temp_file_consol_thresh(mut self, count: usize) -> Self {
        self.config.temp_file_consol_thresh = count;
        self
    }

    /// Set the merge read batch size
    pub fn merge_batch_size(mut self, size: usize) -> Self {
        self.config.merge_batch_size = size;
        self
    }

    /// Set the storage speed blocks are allocated from
    pub fn storage_speed(mut self, speed: StorageSpeed) -> Self {
        self.config.storage_speed = speed;
        self
    }

    /// Set the block write priority
    pub fn priority(mut self, priority: Priority) -> Self {
        self.config.priority = priority;
        self
    }

    /// Set the page cache capacity (in blocks)
    pub fn page_cache_blocks(mut self, count: usize) -> Self {
        self.config.page_cache_blocks = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
