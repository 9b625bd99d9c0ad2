//! filedrop command-line client.

mod app;
mod config;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Resumable, content-addressed file uploads
#[derive(Parser)]
#[command(name = "filedrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ~/.config/filedrop/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload a file
    Upload {
        /// File to upload
        path: PathBuf,

        /// Business category of the file
        #[arg(long)]
        biz_type: Option<String>,

        /// Owning entity within the category
        #[arg(long, default_value = "")]
        biz_id: String,

        /// Storage service base URL
        #[arg(long)]
        server: Option<String>,

        /// Bearer token
        #[arg(long, env = "FILEDROP_TOKEN")]
        token: Option<String>,

        /// Chunks in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Chunk size (e.g. 5MiB, 512KiB, 1048576)
        #[arg(long, value_parser = output::parse_size)]
        chunk_size: Option<u64>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the content digest of a file
    Hash {
        /// File to hash
        path: PathBuf,
    },

    /// Show how a file would be split into chunks
    Plan {
        /// File to plan
        path: PathBuf,

        /// Chunk size (e.g. 5MiB, 512KiB, 1048576)
        #[arg(long, value_parser = output::parse_size)]
        chunk_size: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging. Stdout is reserved for results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };
    tracing::debug!(server = %config.server, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let code = rt.block_on(app::run(cli.command, config))?;

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
