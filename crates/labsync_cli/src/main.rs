use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labsync::{ConfigManager, FileStorage, OfflineQueue, SystemClock};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Inspect and repair a persisted offline action queue
#[derive(Parser, Debug)]
#[command(name = "labsync", version, about)]
struct Cli {
    /// Directory holding the queue slot files
    #[arg(long, env = "LABSYNC_DATA_DIR", default_value = ".labsync", global = true)]
    data_dir: PathBuf,

    /// Configuration file (defaults to <data-dir>/config.json)
    #[arg(long, env = "LABSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List queued entries in replay order
    Show {
        /// Only entries of this type (e.g. message, task)
        #[arg(long = "type", value_name = "TYPE")]
        kind: Option<String>,

        /// Print raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Count entries per type and entries with failed replays
    Stats,
    /// Remove one entry by id
    Drop { id: String },
    /// Remove every entry
    Purge,
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("config.json"));
    let mut manager = ConfigManager::new(&config_path);
    manager
        .load()
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let storage = FileStorage::new(&cli.data_dir)
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?;
    let queue: OfflineQueue<serde_json::Value, FileStorage> = OfflineQueue::with_config(
        storage,
        manager.get().queue.clone(),
        SystemClock::shared(),
    );

    let output = match cli.command {
        Commands::Show { kind, json } => commands::show(&queue, kind.as_deref(), json)?,
        Commands::Stats => commands::stats(&queue)?,
        Commands::Drop { id } => commands::drop_entry(&queue, &id)?,
        Commands::Purge => commands::purge(&queue)?,
        Commands::Config => commands::config(manager.get())?,
    };

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
