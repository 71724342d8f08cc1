//! caskkv CLI
//!
//! Opens a cask directory, runs one command against it and closes it.

use std::path::Path;
use std::process::ExitCode;

use caskkv::{Config, Engine, Lookup, RecoveryLoader};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// caskkv CLI
#[derive(Parser, Debug)]
#[command(name = "caskkv-cli")]
#[command(about = "CLI for the caskkv key-value store")]
#[command(version)]
struct Args {
    /// Cask directory
    #[arg(short, long, default_value = "./caskkv_data")]
    data_dir: String,

    /// Skip the merge normally run when the cask is closed
    #[arg(long)]
    no_merge_on_close: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List every live key
    List,

    /// Compact the cask
    Merge,

    /// Print cask statistics
    Stats,

    /// Check every record checksum without opening the cask for writing
    Verify,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> caskkv::Result<()> {
    if let Commands::Verify = args.command {
        let result = RecoveryLoader::verify(Path::new(&args.data_dir))?;
        println!(
            "ok: {} segments, {} records, {} truncated",
            result.segments_loaded, result.entries_loaded, result.truncated_segments
        );
        return Ok(());
    }

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .merge_on_close(!args.no_merge_on_close)
        .build();
    let cask = Engine::open(config)?;

    match args.command {
        Commands::Get { key } => match cask.get(key.as_bytes())? {
            Lookup::Value(value) => println!("{}", String::from_utf8_lossy(&value)),
            Lookup::Tombstone => println!("(deleted)"),
            Lookup::NotFound => println!("(not found)"),
        },
        Commands::Put { key, value } => cask.put(key.as_bytes(), value.as_bytes())?,
        Commands::Del { key } => cask.delete(key.as_bytes())?,
        Commands::List => {
            for key in cask.list_keys()? {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Merge => {
            let stats = cask.merge()?;
            println!(
                "merged {} segments: {} records kept, {} deletions dropped, {} -> {} bytes",
                stats.segments_merged,
                stats.records_written,
                stats.tombstones_dropped,
                stats.bytes_before,
                stats.bytes_after
            );
        }
        Commands::Stats => {
            let stats = cask.stats()?;
            println!("live keys:  {}", stats.live_keys);
            println!("tombstones: {}", stats.tombstones);
            println!("segments:   {}", stats.segment_count);
            println!("disk bytes: {}", stats.disk_bytes);
        }
        Commands::Verify => {}
    }

    cask.close()
}
