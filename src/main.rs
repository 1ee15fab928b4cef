//! Scholarship Ingest: crawl, extract, validate, deduplicate and score
//! scholarship listings.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scholarship_ingest::config::{Config, LogFormat};
use std::path::PathBuf;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "scholarship-ingest")]
#[command(about = "Scholarship listing ingestion pipeline")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Data directory (overrides [storage].data_dir)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon: worker pool and HTTP API
    Serve {
        /// HTTP listen address (overrides [http].listen_addr)
        #[arg(short, long)]
        listen: Option<String>,

        /// Number of scrape workers (overrides [scheduler].workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Run a single job in the foreground and print the final job
    RunOnce {
        /// Source URL to crawl
        url: String,

        /// Source name (defaults to the URL's host)
        #[arg(short, long)]
        name: Option<String>,

        /// Overwrite existing records from the same source
        #[arg(long)]
        force_update: bool,

        /// Stop at the first page with nothing new
        #[arg(long)]
        incremental: bool,
    },

    /// Write a commented default configuration file
    InitConfig {
        /// Output path
        #[arg(default_value = "config.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show a job from the persisted job store
    Status {
        /// Job ID
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { path, force } = &cli.command {
        return commands::init::init_config(path, *force);
    }

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    let log_level = config.logging.max_level(cli.verbose);
    match config.logging.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    match cli.command {
        Commands::Serve { listen, workers } => commands::serve::serve(config, listen, workers).await,
        Commands::RunOnce {
            url,
            name,
            force_update,
            incremental,
        } => commands::run_once::run_once(config, url, name, force_update, incremental).await,
        Commands::Status { job_id } => commands::status::show_status(&config, &job_id),
        Commands::InitConfig { .. } => Ok(()),
    }
}
