//! CLI command implementations.

pub mod clear;
pub mod dump;
pub mod inspect;

use finsync_storage::CacheError;
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No cache directory was given.
    #[error("cache directory required for {0} (use --dir)")]
    MissingDir(&'static str),

    /// The cache directory does not exist.
    #[error("no cache found at {0:?}")]
    NoCache(PathBuf),

    /// The cache could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Output could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Output could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Prints version information.
pub fn print_version(out: &mut impl Write) -> CliResult<()> {
    writeln!(out, "finsync CLI v{}", env!("CARGO_PKG_VERSION"))?;
    writeln!(
        out,
        "Cache schema v{}",
        finsync_storage::CACHE_SCHEMA_VERSION
    )?;
    Ok(())
}
