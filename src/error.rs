//! Error taxonomy for the store. One variant per failure named in the
//! format/engine contract; every public operation returns `Result<T>`.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JinnError {
    #[error("Invalid magic number — not a jinn database file")]
    BadMagic,

    #[error("Unsupported file format version {0}")]
    UnsupportedVersion(u8),

    #[error("Corrupt block at index {block}: {reason}")]
    CorruptBlock { block: u64, reason: String },

    #[error("Legacy newline-delimited file has non-uniform block sizes")]
    BlockSizeMismatch,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, JinnError>;
