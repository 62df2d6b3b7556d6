//! driveport: resumable uploads and downloads against a Drive-style API.
//!
//! The bearer token is read from `DRIVEPORT_ACCESS_TOKEN`. Ctrl-C stops a
//! transfer at the next chunk boundary; an interrupted upload leaves a resume
//! file next to the source and is picked up by the next identical `upload`.

mod commands;
mod progress;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use driveport_client::{DriveClient, DriveConfig};
use tracing_subscriber::EnvFilter;

const TOKEN_ENV: &str = "DRIVEPORT_ACCESS_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "driveport", version, about = "Resumable Drive transfers")]
struct Args {
    /// Configuration file (defaults to ~/.config/driveport/driveport.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Override the configured chunk size, in bytes (0 = single request)
    #[arg(long, value_name = "BYTES", global = true)]
    chunk_size: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file into a folder
    Upload {
        /// Local file
        local: PathBuf,

        /// Destination folder id
        #[arg(long, value_name = "ID", default_value = "root")]
        parent: String,

        /// Remote name (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Where to keep the resume point (defaults to <local>.driveport-resume)
        #[arg(long, value_name = "PATH")]
        resume_file: Option<PathBuf>,
    },

    /// Download a file, resuming into an existing partial copy
    Download {
        /// Remote file id
        file_id: String,

        /// Local destination
        local: PathBuf,
    },

    /// Print an item's metadata as JSON
    Stat {
        /// Remote item id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path(),
    };
    let mut config = DriveConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(chunk_size) = args.chunk_size {
        config.upload_chunk_size = chunk_size;
        config.download_chunk_size = chunk_size;
    }
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    let token = std::env::var(TOKEN_ENV).with_context(|| format!("{TOKEN_ENV} is not set"))?;
    let drive = DriveClient::new(config, &token)?;
    let interrupted = progress::interrupt_flag();

    match args.command {
        Command::Upload {
            local,
            parent,
            name,
            resume_file,
        } => commands::upload(&drive, &local, &parent, name, resume_file, interrupted).await,
        Command::Download { file_id, local } => {
            commands::download(&drive, &file_id, &local, interrupted).await
        }
        Command::Stat { id } => commands::stat(&drive, &id).await,
    }
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("driveport")
        .join("driveport.toml")
}
