//! Block file (C3) — random-access read/write/truncate of fixed-size blocks.
//!
//! Every operation is keyed by a block index `i`, referencing byte offset
//! `header_len + i * block_size`. No buffering beyond the OS page cache and
//! no file locking — this engine assumes a single owner, per the
//! concurrency model. Modeled on the teacher's low-level
//! seek-then-read_exact / seek-then-write_all idiom in `io_stream/mod.rs`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;
use crate::header::{Header, HEADER_SIZE};

pub struct BlockFile {
    file: File,
}

impl BlockFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn offset(block_size: u64, i: u64) -> u64 {
        HEADER_SIZE as u64 + i * block_size
    }

    /// Read exactly `block_size` bytes from block `i` into `buf`.
    pub fn read_block(&mut self, i: u64, block_size: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len() as u64, block_size);
        self.file.seek(SeekFrom::Start(Self::offset(block_size, i)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Write `buf` (exactly `block_size` bytes) at block `i`.
    pub fn write_block(&mut self, i: u64, block_size: u64, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len() as u64, block_size);
        self.file.seek(SeekFrom::Start(Self::offset(block_size, i)))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Truncate so the file holds exactly `blocks` blocks after the header.
    pub fn truncate_to(&mut self, blocks: u64, block_size: u64) -> Result<()> {
        let new_len = HEADER_SIZE as u64 + blocks * block_size;
        self.file.set_len(new_len)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn seek_to_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn inner_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn read_header(&mut self) -> Result<Header> {
        self.seek_to_header()?;
        Header::read(&mut self.file)
    }

    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.seek_to_header()?;
        header.write(&mut self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn write_then_read_block() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bf = BlockFile::new(tmp.reopen().unwrap());
        bf.truncate_to(3, 16).unwrap();

        let payload = [b'x'; 16];
        bf.write_block(1, 16, &payload).unwrap();

        let mut out = [0u8; 16];
        bf.read_block(1, 16, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn truncate_shrinks_file() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bf = BlockFile::new(tmp.reopen().unwrap());
        bf.truncate_to(10, 8).unwrap();
        assert_eq!(bf.len().unwrap(), HEADER_SIZE as u64 + 80);
        bf.truncate_to(2, 8).unwrap();
        assert_eq!(bf.len().unwrap(), HEADER_SIZE as u64 + 16);
    }
}
