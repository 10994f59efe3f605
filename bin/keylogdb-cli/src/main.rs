//! keylogdb CLI - Admin Command Line Interface
//!
//! Inspects and edits a keylog index store on local disk. Every command opens
//! the store without the background maintenance thread and closes it, which
//! flushes all open indexes, before exiting.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keylogdb_common::{EntryId, IndexConfig, display_key};
use keylogdb_store::{IndexStore, KeylogIndex};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "keylogdb-cli")]
#[command(about = "keylogdb Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "keylogdb.toml")]
    config: String,

    /// Data directory (overrides config)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show store statistics
    Stats,
    /// List all keys
    List,
    /// Show one key's keylog
    Show {
        /// Key
        key: String,
    },
    /// Create an empty keylog
    Create {
        /// Key
        key: String,
    },
    /// Set a key's marker, creating the key if needed
    Mark {
        /// Key
        key: String,
        /// Marker value
        marker: String,
    },
    /// Append an entry id to a key's chain
    Append {
        /// Key
        key: String,
        /// Entry id (64 hex characters)
        id: String,
        /// Current chain tail (64 hex characters, all zeros for an empty chain)
        prev: String,
        /// Logical time of the append
        ltime: u64,
    },
    /// Remove the tail entry appended at the given logical time
    Rollback {
        /// Key
        key: String,
        /// Logical time of the tail entry
        ltime: u64,
    },
    /// Remove a key
    Remove {
        /// Key
        key: String,
    },
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    index: IndexConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./keylog-data")
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file if it exists
    let config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .with_context(|| format!("failed to read {}", args.config))?;
        toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", args.config))?
    } else {
        Config::default()
    };

    // CLI takes precedence over the config file
    let data_dir = args.data_dir.unwrap_or(config.storage.data_dir);
    let log_level = args.log_level.unwrap_or(config.logging.level);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Data directory: {}", data_dir.display());

    let index_config = IndexConfig {
        background_flush: false,
        ..config.index
    };
    let store = IndexStore::open(&data_dir, index_config)
        .with_context(|| format!("failed to open index store in {}", data_dir.display()))?;

    let result = run(&store, args.command);
    let closed = store.close().context("failed to close index store");
    result.and(closed)
}

fn run(store: &IndexStore, command: Commands) -> Result<()> {
    match command {
        Commands::Stats => {
            let stats = store.stats()?;
            println!("Index Store ({})", store.name());
            println!("  Keys:      {}", stats.keys);
            println!("  Open keys: {}", stats.open_keys);
        }
        Commands::List => {
            let mut total = 0;
            store.iterate(|key, index| {
                println!(
                    "{:<32} height={:<6} last={}",
                    display_key(key),
                    index.height(),
                    index.last()
                );
                total += 1;
                Ok(())
            })?;
            println!("{} keys", total);
        }
        Commands::Show { key } => {
            let index = store.get_key(key.as_bytes())?;
            print_index(&index);
            index.close()?;
        }
        Commands::Create { key } => {
            let index = store.new_key(key.as_bytes())?;
            println!("Created key {}", key);
            index.close()?;
        }
        Commands::Mark { key, marker } => {
            let index = store.mark_key(key.as_bytes(), marker.as_bytes())?;
            println!("Marked key {} with {}", key, marker);
            index.close()?;
        }
        Commands::Append {
            key,
            id,
            prev,
            ltime,
        } => {
            let id = EntryId::from_hex(&id).context("invalid entry id")?;
            let prev = EntryId::from_hex(&prev).context("invalid previous id")?;

            let index = store.get_key(key.as_bytes())?;
            let appended = index.append(id, prev, ltime);
            let height = index.height();
            index.close()?;
            appended?;
            println!("Appended {} to {} (height {})", id, key, height);
        }
        Commands::Rollback { key, ltime } => {
            let index = store.get_key(key.as_bytes())?;
            let (height, removed) = index.rollback(ltime);
            index.close()?;
            if removed {
                println!("Rolled back {} to height {}", key, height);
            } else {
                println!("Nothing to roll back for {} at ltime {}", key, ltime);
            }
        }
        Commands::Remove { key } => {
            store.remove_key(key.as_bytes())?;
            println!("Removed key {}", key);
        }
    }

    debug!("Command finished");
    Ok(())
}

fn print_index(index: &KeylogIndex) {
    let record = index.record();
    println!("Key:    {}", display_key(&record.key));
    println!("Height: {}", record.height);
    println!("Last:   {}", record.last());
    match record.ltime {
        Some(ltime) => println!("Ltime:  {}", ltime),
        None => println!("Ltime:  -"),
    }
    println!("Marker: {}", display_key(&record.marker));
    for (i, id) in record.entries.iter().enumerate() {
        println!("  {:>6}  {}", i + 1, id);
    }
}
