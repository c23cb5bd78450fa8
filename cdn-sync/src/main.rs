//! cdn-sync - Main entry point
//!
//! Uploads changed build assets to the CDN bucket and inspects its manifest.

use anyhow::Result;
use cdn_sync::commands::{self, upload::UploadArgs};
use cdn_sync::{config::Config, utils};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload new and changed files, then save the manifest
    Upload(UploadArgs),

    /// Show manifest statistics and entries
    Manifest {
        /// Number of entries to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Compare the manifest with the bucket contents
    Verify {
        /// Only check keys under this prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// HEAD keys through the CDN domain
    Probe {
        /// Keys to check (defaults to the first manifest entries)
        keys: Vec<String>,

        /// Number of manifest entries to check when no keys are given
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Command::Upload(upload) = &args.command {
        upload.apply(&mut config);
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("cdn-sync v{}", env!("CARGO_PKG_VERSION"));

    match &args.command {
        Command::Upload(upload) => commands::upload::run(&config, upload).await?,
        Command::Manifest { limit } => commands::manifest::run(&config, *limit).await?,
        Command::Verify { prefix } => commands::verify::run(&config, prefix.as_deref()).await?,
        Command::Probe { keys, limit } => commands::probe::run(&config, keys, *limit).await?,
    }

    Ok(())
}
