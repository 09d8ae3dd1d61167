//! Index Manager - external sort
//!
//! Buffers elements in memory and spills each full buffer as a sorted run to
//! an anonymous temp file. A [`Cursor`] merges every spilled run with the
//! final in-memory run into one sorted, single-pass sequence.
//!
//! ## Spill Record Format
//! ```text
//! ┌───────────┬───────────┬──────────────────────┐
//! │ len (u32) │ crc (u32) │ bincode(element)     │
//! └───────────┴───────────┴──────────────────────┘
//! ```
//!
//! Runs are written completely and rewound before anything reads them, so a
//! failed spill never leaves a half-written run behind for a cursor.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::mem;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;
use crate::error::{Result, SabotError};

/// Comparator used when none is named
pub type OrderFn<T> = fn(&T, &T) -> Ordering;

pub struct IndexManager<T, C = OrderFn<T>> {
    run: Vec<T>,
    spilled: Vec<SpillRun>,
    cmp: C,
    len: usize,
    sort_buf_size: usize,
    min_parallel_size: usize,
    threads: usize,
    consol_thresh: usize,
}

struct SpillRun {
    file: File,
    records: usize,
}

impl<T, C> IndexManager<T, C>
where
    T: Serialize + DeserializeOwned + Send,
    C: Fn(&T, &T) -> Ordering + Sync,
{
    pub fn new(config: &Config, cmp: C) -> Self {
        Self {
            run: Vec::new(),
            spilled: Vec::new(),
            cmp,
            len: 0,
            sort_buf_size: config.sort_buf_size.max(1),
            min_parallel_size: config.sort_buf_min_parallel_size,
            threads: config.sort_threads.max(1),
            consol_thresh: config.temp_file_consol_thresh.max(2),
        }
    }

    /// Add one element. Spills when the in-memory run is full.
    pub fn emplace(&mut self, elem: T) -> Result<()> {
        self.run.try_reserve(1)?;
        self.run.push(elem);
        self.len += 1;
        if self.run.len() >= self.sort_buf_size {
            self.spill()?;
        }
        Ok(())
    }

    /// Elements emplaced so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_spilled_runs(&self) -> usize {
        self.spilled.len()
    }

    /// Sorted single-pass cursor over everything emplaced
    pub fn cursor(mut self, batch_size: usize) -> Result<Cursor<T, C>> {
        let mut run = mem::take(&mut self.run);
        sort_run(&mut run, &self.cmp, self.min_parallel_size, self.threads)?;
        let mut sources = Vec::with_capacity(self.spilled.len() + 1);
        for spilled in self.spilled.drain(..) {
            sources.push(Source::Spill(RunReader::new(spilled, batch_size)));
        }
        sources.push(Source::Memory(run.into_iter()));
        Ok(Cursor {
            merger: Merger::new(sources)?,
            cmp: self.cmp,
        })
    }

    fn spill(&mut self) -> Result<()> {
        let mut run = mem::take(&mut self.run);
        sort_run(&mut run, &self.cmp, self.min_parallel_size, self.threads)?;
        let records = run.len();
        let file = write_run(run.into_iter().map(Ok))?;
        self.spilled.push(SpillRun { file, records });
        tracing::debug!(records, runs = self.spilled.len(), "Spilled sorted run");

        if self.spilled.len() >= self.consol_thresh {
            self.consolidate()?;
        }
        Ok(())
    }

    /// Merge every spilled run into a single run
    fn consolidate(&mut self) -> Result<()> {
        let runs = mem::take(&mut self.spilled);
        let count = runs.len();
        let records: usize = runs.iter().map(|r| r.records).sum();
        let sources = runs
            .into_iter()
            .map(|r| Source::Spill(RunReader::new(r, 1024)))
            .collect();
        let mut merger = Merger::new(sources)?;
        let cmp = &self.cmp;
        let file = write_run(std::iter::from_fn(|| merger.next_by(cmp).transpose()))?;
        self.spilled.push(SpillRun { file, records });
        tracing::debug!(runs = count, records, "Consolidated spilled runs");
        Ok(())
    }
}

/// Merge-sorted, forward-only sequence over an index manager's contents
pub struct Cursor<T, C> {
    merger: Merger<T>,
    cmp: C,
}

impl<T, C> Iterator for Cursor<T, C>
where
    T: DeserializeOwned,
    C: Fn(&T, &T) -> Ordering,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        self.merger.next_by(&self.cmp).transpose()
    }
}

// =============================================================================
// Sorting
// =============================================================================

/// Sort in place; runs at or above `min_parallel` are split across threads
/// and the sorted chunks merged back together.
fn sort_run<T, C>(run: &mut Vec<T>, cmp: &C, min_parallel: usize, threads: usize) -> Result<()>
where
    T: Send + DeserializeOwned,
    C: Fn(&T, &T) -> Ordering + Sync,
{
    if threads <= 1 || run.len() < min_parallel.max(2) {
        run.sort_by(cmp);
        return Ok(());
    }
    let chunk = run.len().div_ceil(threads);
    crossbeam::scope(|s| {
        for part in run.chunks_mut(chunk) {
            s.spawn(move |_| part.sort_by(cmp));
        }
    })
    .map_err(|_| SabotError::Storage("sort worker panicked".to_string()))?;

    let total = run.len();
    let mut rest = mem::take(run);
    let mut parts = Vec::with_capacity(threads);
    while rest.len() > chunk {
        let tail = rest.split_off(chunk);
        parts.push(Source::Memory(rest.into_iter()));
        rest = tail;
    }
    parts.push(Source::Memory(rest.into_iter()));

    let mut merged = Vec::new();
    merged.try_reserve(total)?;
    let mut merger = Merger::new(parts)?;
    while let Some(elem) = merger.next_by(cmp)? {
        merged.push(elem);
    }
    *run = merged;
    Ok(())
}

// =============================================================================
// Merging
// =============================================================================

enum Source<T> {
    Memory(std::vec::IntoIter<T>),
    Spill(RunReader<T>),
}

impl<T: DeserializeOwned> Source<T> {
    fn next(&mut self) -> Result<Option<T>> {
        match self {
            Source::Memory(it) => Ok(it.next()),
            Source::Spill(reader) => reader.next(),
        }
    }
}

struct Merger<T> {
    sources: Vec<Source<T>>,
    heads: Vec<Option<T>>,
}

impl<T: DeserializeOwned> Merger<T> {
    fn new(mut sources: Vec<Source<T>>) -> Result<Self> {
        let heads = sources.iter_mut().map(Source::next).collect::<Result<Vec<_>>>()?;
        Ok(Self { sources, heads })
    }

    /// Smallest head across sources; ties go to the earliest source
    fn next_by<C: Fn(&T, &T) -> Ordering>(&mut self, cmp: &C) -> Result<Option<T>> {
        let mut best: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            if let Some(candidate) = head {
                best = match best.and_then(|b| self.heads[b].as_ref().map(|h| (b, h))) {
                    Some((b, current)) if cmp(candidate, current) != Ordering::Less => Some(b),
                    _ => Some(i),
                };
            }
        }
        let Some(idx) = best else {
            return Ok(None);
        };
        let next = self.sources[idx].next()?;
        Ok(mem::replace(&mut self.heads[idx], next))
    }
}

// =============================================================================
// Spill Files
// =============================================================================

fn write_run<T: Serialize>(elems: impl Iterator<Item = Result<T>>) -> Result<File> {
    let mut writer = BufWriter::new(tempfile::tempfile()?);
    for elem in elems {
        let bytes = bincode::serialize(&elem?)?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| SabotError::Unsupported(format!("spill record of {} bytes", bytes.len())))?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&crc32fast::hash(&bytes).to_le_bytes())?;
        writer.write_all(&bytes)?;
    }
    let mut file = writer
        .into_inner()
        .map_err(|e| SabotError::Storage(format!("Failed to flush spill run: {}", e)))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

struct RunReader<T> {
    reader: BufReader<File>,
    remaining: usize,
    batch: VecDeque<T>,
    batch_size: usize,
}

impl<T: DeserializeOwned> RunReader<T> {
    fn new(run: SpillRun, batch_size: usize) -> Self {
        Self {
            reader: BufReader::new(run.file),
            remaining: run.records,
            batch: VecDeque::new(),
            batch_size: batch_size.max(1),
        }
    }

    fn next(&mut self) -> Result<Option<T>> {
        if self.batch.is_empty() {
            self.refill()?;
        }
        Ok(self.batch.pop_front())
    }

    fn refill(&mut self) -> Result<()> {
        let n = self.batch_size.min(self.remaining);
        self.batch.try_reserve(n)?;
        for _ in 0..n {
            let mut header = [0u8; 8];
            self.reader.read_exact(&mut header)?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            let mut bytes = Vec::new();
            bytes.try_reserve(len)?;
            bytes.resize(len, 0);
            self.reader.read_exact(&mut bytes)?;
            if crc32fast::hash(&bytes) != crc {
                return Err(SabotError::Serialization("spill record checksum mismatch".to_string()));
            }
            self.batch.push_back(bincode::deserialize(&bytes)?);
        }
        self.remaining -= n;
        Ok(())
    }
}
