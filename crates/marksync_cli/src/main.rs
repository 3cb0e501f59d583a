//! marksync CLI
//!
//! Command-line tools for looking at persisted bookmark sync state.
//!
//! # Commands
//!
//! - `inspect` - Summarize a metadata blob
//! - `verify` - Check a metadata blob for inconsistencies
//! - `dump-store` - Print the records of a file-backed record store
//! - `compact` - Rewrite a record store log as a single snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// marksync command-line tools.
#[derive(Parser)]
#[command(name = "marksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a metadata blob
    Inspect {
        /// Path to the encoded metadata blob
        blob: PathBuf,

        /// List every entity record
        #[arg(short, long)]
        entities: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check a metadata blob for inconsistencies
    Verify {
        /// Path to the encoded metadata blob
        blob: PathBuf,
    },

    /// Print the records of a file-backed record store
    DumpStore {
        /// Store log file, or a directory holding `records.log`
        #[arg(short, long)]
        path: PathBuf,

        /// Include entity payloads
        #[arg(short, long)]
        data: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite a record store log as a single snapshot
    Compact {
        /// Store log file, or a directory holding `records.log`
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            blob,
            entities,
            format,
        } => commands::inspect::run(&blob, entities, &format)?,
        Commands::Verify { blob } => commands::verify::run(&blob)?,
        Commands::DumpStore { path, data, format } => {
            commands::dump_store::run(&path, data, &format)?;
        }
        Commands::Compact { path } => commands::compact::run(&path)?,
        Commands::Version => {
            println!("marksync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Metadata format v{}",
                marksync_engine::METADATA_FORMAT_VERSION
            );
        }
    }

    Ok(())
}
