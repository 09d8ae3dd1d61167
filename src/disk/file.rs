//! Single-file engine
//!
//! Block `n` lives at byte `n * block_size` of one volume file. The catalog
//! and allocator state are kept in a bincode sidecar (`<volume>.catalog`)
//! rewritten on every change.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SabotError};

use super::{
    BlockAllocator, BlockId, BlockVec, CachePolicy, CompletionTrigger, Engine, FileInfo, Priority,
    StorageSpeed, VolumeManager,
};

/// Volume over a single file; writes complete synchronously
pub struct FileVolume {
    file: Mutex<File>,
    block_size: usize,
}

impl FileVolume {
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            block_size,
        })
    }

    fn position(&self, block_id: BlockId) -> u64 {
        block_id * self.block_size as u64
    }
}

impl VolumeManager for FileVolume {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn write_block(
        &self,
        buf: Bytes,
        block_id: BlockId,
        _priority: Priority,
        _policy: CachePolicy,
        trigger: &CompletionTrigger,
    ) -> Result<()> {
        if buf.len() != self.block_size {
            return Err(SabotError::Storage(format!(
                "write of {} bytes to block {} (block size {})",
                buf.len(),
                block_id,
                self.block_size
            )));
        }
        trigger.begin();
        let result = (|| -> Result<()> {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.position(block_id)))?;
            file.write_all(&buf)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                trigger.complete(Ok(()));
                Ok(())
            }
            Err(e) => {
                trigger.complete(Err(SabotError::Storage(e.to_string())));
                Err(e)
            }
        }
    }

    fn read_block(&self, block_id: BlockId) -> Result<Bytes> {
        let mut file = self.file.lock();
        let end = self.position(block_id) + self.block_size as u64;
        if file.metadata()?.len() < end {
            return Err(SabotError::BlockNotFound(block_id));
        }
        let mut buf = vec![0u8; self.block_size];
        file.seek(SeekFrom::Start(self.position(block_id)))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn sync_to_disk(&self, _ranges: &[(BlockId, u64)]) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    block_size: u64,
    next_block: BlockId,
    free: Vec<BlockId>,
    files: Vec<FileInfo>,
}

/// Engine over a [`FileVolume`] with a persisted catalog
pub struct FileEngine {
    volume: FileVolume,
    allocator: BlockAllocator,
    files: Mutex<Vec<FileInfo>>,
    catalog_path: PathBuf,
}

impl FileEngine {
    /// Open (or create) a volume. An existing catalog must agree on the
    /// block size.
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let catalog_path = path.with_extension("catalog");
        let catalog = if catalog_path.exists() {
            let catalog: Catalog = bincode::deserialize(&fs::read(&catalog_path)?)?;
            if catalog.block_size != block_size as u64 {
                return Err(SabotError::Config(format!(
                    "volume {} uses {} byte blocks, not {}",
                    path.display(),
                    catalog.block_size,
                    block_size
                )));
            }
            catalog
        } else {
            Catalog {
                block_size: block_size as u64,
                ..Catalog::default()
            }
        };
        tracing::debug!(
            volume = %path.display(),
            files = catalog.files.len(),
            next_block = catalog.next_block,
            "Opened file volume"
        );
        Ok(Self {
            volume: FileVolume::open(path, block_size)?,
            allocator: BlockAllocator::from_parts(catalog.next_block, catalog.free),
            files: Mutex::new(catalog.files),
            catalog_path,
        })
    }

    fn persist(&self) -> Result<()> {
        let catalog = Catalog {
            block_size: self.volume.block_size as u64,
            next_block: self.allocator.high_water(),
            free: self.allocator.free_list(),
            files: self.files.lock().clone(),
        };
        let bytes = bincode::serialize(&catalog)?;
        let tmp = self.catalog_path.with_extension("catalog.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.catalog_path)?;
        Ok(())
    }
}

impl Engine for FileEngine {
    fn volume(&self) -> &dyn VolumeManager {
        &self.volume
    }

    fn append_reserve_blocks(&self, _speed: StorageSpeed, count: usize, out: &mut BlockVec) -> Result<()> {
        out.extend(self.allocator.reserve(count));
        Ok(())
    }

    fn free_seq_blocks(&self, start: BlockId, count: u64) -> Result<()> {
        self.allocator.free(start, count)
    }

    fn insert_file(&self, info: FileInfo, trigger: &CompletionTrigger) -> Result<()> {
        trigger.begin();
        tracing::debug!(
            file_id = info.file_id,
            starting_block = info.starting_block_id,
            length = info.file_length,
            "Registering file"
        );
        self.files.lock().push(info);
        let result = self.persist();
        let outcome = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(SabotError::Storage(e.to_string())),
        };
        trigger.complete(outcome);
        result
    }

    fn files(&self) -> Vec<FileInfo> {
        self.files.lock().clone()
    }
}
