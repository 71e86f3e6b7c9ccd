//! Error types for cache operations.

use std::io;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while loading or saving snapshots.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The snapshot could not be encoded or decoded.
    #[error("snapshot corrupted: {0}")]
    Corrupted(String),

    /// The snapshot was written by an incompatible schema.
    #[error("snapshot schema mismatch: found {found}, expected {expected}")]
    SchemaMismatch {
        /// Schema found on disk.
        found: u32,
        /// Schema this build understands.
        expected: u32,
    },

    /// The backing store is not available.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
