//! finsync CLI
//!
//! Offline tools for a finsync snapshot cache directory.
//!
//! # Commands
//!
//! - `inspect` - Summarize every collection snapshot
//! - `dump` - Print the entities of one snapshot as JSON lines
//! - `clear` - Remove snapshots
//! - `version` - Show version information

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;

use clap::{Parser, Subcommand};
use commands::{CliError, CliResult, OutputFormat};
use finsync_model::CollectionType;
use finsync_storage::FileCache;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// finsync snapshot cache tools.
#[derive(Parser)]
#[command(name = "finsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache directory
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize every collection snapshot
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the entities of one snapshot as JSON lines
    Dump {
        /// Collection to dump (wallets, cards, transactions, notifications)
        collection: CollectionType,

        /// Maximum number of entities to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Remove snapshots
    Clear {
        /// Only clear this collection
        #[arg(short, long)]
        collection: Option<CollectionType>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))?;
    Ok(())
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut out = io::stdout().lock();
    match cli.command {
        Commands::Inspect { format } => {
            let cache = open(cli.dir, "inspect")?;
            commands::inspect::run(&cache, format, &mut out).await
        }
        Commands::Dump { collection, limit } => {
            let cache = open(cli.dir, "dump")?;
            commands::dump::run(&cache, collection, limit, &mut out).await.map(|_| ())
        }
        Commands::Clear { collection } => {
            let cache = open(cli.dir, "clear")?;
            commands::clear::run(&cache, collection, &mut out).await
        }
        Commands::Version => commands::print_version(&mut out),
    }
}

fn open(dir: Option<PathBuf>, command: &'static str) -> CliResult<FileCache> {
    let dir = dir.ok_or(CliError::MissingDir(command))?;
    if !dir.is_dir() {
        return Err(CliError::NoCache(dir));
    }
    Ok(FileCache::open(&dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_dump_with_collection_name() {
        let cli = Cli::try_parse_from(["finsync", "--dir", "/tmp/c", "dump", "cards", "--limit", "3"]).unwrap();
        match cli.command {
            Commands::Dump { collection, limit } => {
                assert_eq!(collection, CollectionType::Cards);
                assert_eq!(limit, Some(3));
            }
            _ => panic!("expected dump"),
        }
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/c")));
    }

    #[test]
    fn rejects_unknown_collection() {
        assert!(Cli::try_parse_from(["finsync", "dump", "loans"]).is_err());
    }

    #[test]
    fn missing_dir_is_reported() {
        let err = open(None, "inspect").unwrap_err();
        assert!(matches!(err, CliError::MissingDir("inspect")));
    }

    #[test]
    fn absent_dir_is_not_created() {
        let parent = tempfile::tempdir().unwrap();
        let missing = parent.path().join("nope");
        assert!(matches!(open(Some(missing.clone()), "clear"), Err(CliError::NoCache(_))));
        assert!(!missing.exists());
    }
}
