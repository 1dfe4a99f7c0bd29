// src/main.rs

//! Rehome command line interface

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "rehome")]
#[command(author, version, about = "Rewrites filesystem paths and path-derived identifiers across a media library", long_about = None)]
struct Cli {
    /// Also write the log to this file, without colors
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a migration plan
    Migrate {
        /// Path to the TOML migration plan
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Report which identifier encodings occur where in a database
    Scan {
        /// The library database the identifiers come from
        #[arg(long, value_name = "FILE")]
        library_db: PathBuf,
        /// The database to scan
        #[arg(long, value_name = "FILE")]
        scan_db: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &cli.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    match cli.command {
        Some(Commands::Migrate { config }) => commands::cmd_migrate(&config),
        Some(Commands::Scan {
            library_db,
            scan_db,
        }) => commands::cmd_scan(&library_db, &scan_db),
        None => {
            println!("Rehome v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'rehome --help' for usage information");
            Ok(())
        }
    }
}
