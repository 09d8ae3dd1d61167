//! Sequential reader over a file's byte offsets

use crate::atom::{Core, CORE_SIZE};
use crate::error::Result;

use super::BlockReader;

pub struct InStream<'r, 'a> {
    reader: &'r BlockReader<'a>,
    offset: u64,
}

impl<'r, 'a> InStream<'r, 'a> {
    pub fn new(reader: &'r BlockReader<'a>, offset: u64) -> Self {
        Self { reader, offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn go_to(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn read(&mut self, out: &mut [u8]) -> Result<()> {
        self.reader.read_range(self.offset, out)?;
        self.offset += out.len() as u64;
        Ok(())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// `None` for an empty slot
    pub fn read_core(&mut self) -> Result<Option<Core>> {
        let mut buf = [0u8; CORE_SIZE];
        self.read(&mut buf)?;
        Core::from_bytes(&buf)
    }
}
