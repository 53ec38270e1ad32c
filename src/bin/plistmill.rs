//! plistmill: parse plist files into a queryable SQLite database
//!
//! Reads XML and binary plist files, attempts to deserialize
//! NSKeyedArchiver plists, and parses key/value combinations into a
//! SQLite database. Boolean values are stored as True/False.
//!
//! Usage:
//!   # Single file
//!   plistmill -i Info.plist -o plists.db
//!
//!   # Whole directory tree
//!   plistmill -i ./Backups/extracted -o plists.db
//!
//! Per-file problems never stop a run; query the ERRORS_VIEW of the
//! output database to see them.

// Use MiMalloc allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use clap::Parser;
use plistmill::extract::{run_extraction, ExtractConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plistmill")]
#[command(about = "Flatten plist files into a SQLite database", long_about = None)]
struct Args {
    /// Input plist file or folder (required)
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    input: PathBuf,

    /// Output database filename (required; replaced if it exists)
    #[arg(short = 'o', long = "output", value_name = "DB")]
    output: PathBuf,

    /// Separator between key-path segments (default: "\")
    #[arg(long)]
    separator: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ExtractConfig::default();
    if let Some(separator) = args.separator {
        config.separator = separator;
    }

    let summary = run_extraction(&args.input, &args.output, &config)?;

    println!("\nPlist data parsing complete.");
    println!("Input data: {}", args.input.display());
    println!("Output database: {}", args.output.display());
    println!(
        "Processed {} file(s): {} data row(s), {} error row(s).",
        summary.files, summary.data_rows, summary.error_rows
    );
    if summary.archiver_anomaly {
        println!(
            "\nSome NSKeyedArchiver plists may not have deserialized completely.\n\
             See the error table of the database to identify affected files."
        );
    }

    Ok(())
}
