// Error types for the RAM test engine.
//
// Verification mismatches are never errors: they are counted in a
// `TestOutcome`. Everything in here is
// unrecoverable for the run and ends up as exit code 2.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RamTestError>;

/// Failures of the scratch memory itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// An access fell (partly) outside the block.
    #[error("access of {len} bytes at offset {offset:#x} is outside a block of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Block sizes must be non-zero multiples of 8.
    #[error("invalid block size {0}: must be a non-zero multiple of 8")]
    InvalidSize(usize),

    /// The allocator refused the request.
    #[error("failed to allocate {0} bytes")]
    Allocation(usize),
}

/// Top-level error for a test run.
#[derive(Debug, Error)]
pub enum RamTestError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("failed to write report to {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
