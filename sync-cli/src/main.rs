//! # novaclub-sync
//!
//! Operator CLI for the novaclub offline sync client.
//!
//! ## Commands
//!
//! - `init`: Write a default configuration
//! - `login` / `logout`: Sign in (online or from the cached login) and out
//! - `put` / `delete`: Optimistic local writes, queued for sync
//! - `get` / `list`: Read records (remote when reachable, local otherwise)
//! - `sync`: Run one push-then-pull cycle
//! - `run`: Sync in the background until Ctrl-C
//! - `status`: Queue depth, watermarks and session
//! - `dead-letters` / `requeue`: Inspect and retry evicted mutations
//!
//! ## Example
//!
//! ```bash
//! # Point the client at the service
//! novaclub-sync init --base-url https://club.example.org/api/v1
//!
//! # Sign in (prompts for the password)
//! novaclub-sync login --email sensei@dojo.fr
//!
//! # Works offline: stored locally and queued
//! novaclub-sync put members '{"first_name": "Aiko", "last_name": "Tanaka"}'
//!
//! # Replicate
//! novaclub-sync sync
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{auth, init, records, status, sync};
use config::Paths;

/// Operator CLI for novaclub offline sync.
#[derive(Parser, Debug)]
#[command(name = "novaclub-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: novaclub.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the local store and configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// API base URL of the club service
        #[arg(long)]
        base_url: Option<String>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Sign in, online if the service is reachable
    Login {
        /// Account email
        #[arg(long, short)]
        email: String,

        /// Password (will prompt if not provided)
        #[arg(long, short)]
        password: Option<String>,
    },

    /// Sign out and forget the cached login
    Logout,

    /// Create or replace a record
    Put {
        /// Entity type (e.g. members, payments)
        entity: String,

        /// Record fields as a JSON object
        json: String,

        /// Record id (default: the "id" field, or a fresh one)
        #[arg(long)]
        id: Option<String>,
    },

    /// Delete a record
    Delete {
        /// Entity type
        entity: String,

        /// Record id
        id: String,
    },

    /// Show one record
    Get {
        /// Entity type
        entity: String,

        /// Record id
        id: String,
    },

    /// Show every record of an entity type
    List {
        /// Entity type
        entity: String,
    },

    /// Run one sync cycle now
    Sync,

    /// Show sync status
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync in the background until interrupted
    Run,

    /// List mutations the service kept rejecting
    DeadLetters,

    /// Put a dead-lettered mutation back in the queue
    Requeue {
        /// Queue entry id, as shown by dead-letters
        entry_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    config::set_dir_permissions_0700(&data_dir).await?;

    let paths = Paths::new(data_dir, cli.config);

    match cli.command {
        Commands::Init { base_url, force } => {
            init::run(&paths, base_url.as_deref(), force).await?;
        }
        Commands::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => rpassword::prompt_password("Password: ")
                    .context("Failed to read password")?,
            };
            auth::login(&paths, &email, &password).await?;
        }
        Commands::Logout => {
            auth::logout(&paths).await?;
        }
        Commands::Put { entity, json, id } => {
            records::put(&paths, &entity, &json, id.as_deref()).await?;
        }
        Commands::Delete { entity, id } => {
            records::delete(&paths, &entity, &id).await?;
        }
        Commands::Get { entity, id } => {
            records::get(&paths, &entity, &id).await?;
        }
        Commands::List { entity } => {
            records::list(&paths, &entity).await?;
        }
        Commands::Sync => {
            sync::once(&paths).await?;
        }
        Commands::Status { json } => {
            status::run(&paths, json).await?;
        }
        Commands::Run => {
            sync::run(&paths).await?;
        }
        Commands::DeadLetters => {
            status::dead_letters(&paths).await?;
        }
        Commands::Requeue { entry_id } => {
            status::requeue(&paths, entry_id).await?;
        }
    }

    Ok(())
}

/// Install the log subscriber; logs go to stderr so stdout stays parseable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("novaclub_sync=info,novaclub_sync_client=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Get the default data directory for novaclub-sync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "novaclub", "novaclub-sync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
