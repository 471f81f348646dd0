//! File header — format anchor at offset 0.
//!
//! # On-disk layout (22 bytes, all multi-byte fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic       = "jinn" (4 ASCII bytes, not LE)
//!    4      1   version     = 1
//!    5      1   flags       bit 0 = compressed
//!    6      8   block_size  (LE u64)
//!   14      8   blocks      (LE u64)
//! ```
//!
//! This header carries no checksum — corruption of the header itself
//! surfaces as a bad magic or bad version on the next `load`, per the
//! engine's error taxonomy; there is no recovery path for a damaged header.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{JinnError, Result};

pub const MAGIC: &[u8; 4] = b"jinn";
pub const CURRENT_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 22;

/// Header flag: block payloads are SMAZ-compressed.
pub const FLAG_COMPRESSED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
    pub block_size: u64,
    pub blocks: u64,
}

impl Header {
    pub fn new(block_size: u64, compressed: bool) -> Self {
        Self {
            version: CURRENT_VERSION,
            flags: if compressed { FLAG_COMPRESSED } else { 0 },
            block_size,
            blocks: 0,
        }
    }

    #[inline]
    pub fn compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    #[inline]
    pub fn set_compressed(&mut self, compressed: bool) {
        if compressed {
            self.flags |= FLAG_COMPRESSED;
        } else {
            self.flags &= !FLAG_COMPRESSED;
        }
    }

    pub fn write<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_u8(self.version)?;
        w.write_u8(self.flags)?;
        w.write_u64::<LittleEndian>(self.block_size)?;
        w.write_u64::<LittleEndian>(self.blocks)?;
        Ok(())
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(JinnError::BadMagic);
        }

        let version = r.read_u8()?;
        if version != CURRENT_VERSION {
            return Err(JinnError::UnsupportedVersion(version));
        }

        let flags = r.read_u8()?;
        let block_size = r.read_u64::<LittleEndian>()?;
        let blocks = r.read_u64::<LittleEndian>()?;

        Ok(Self {
            version,
            flags,
            block_size,
            blocks,
        })
    }
}
