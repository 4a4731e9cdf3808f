//! # proper-sync
//!
//! Diagnostics CLI for Proper Sync.
//!
//! ## Commands
//!
//! - `tail`: Print every event published on a topic
//! - `call`: Call a procedure and print the decoded result
//! - `watch-route`: Follow a route model and its canonical itinerary
//! - `routes`: List the agency's routes
//!
//! ## Example
//!
//! ```bash
//! # Follow a vehicle
//! proper-sync tail vehicles.4004
//!
//! # Ask for the last event on a topic
//! proper-sync call meta.last_event '"routes.10"' '"routes.10"'
//!
//! # Watch a route against a local config
//! proper-sync --config proper.toml watch-route 10
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{call, routes, tail, watch_route};

/// Diagnostics CLI for Proper Sync.
#[derive(Parser, Debug)]
#[command(name = "proper-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./proper.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Router URL, overriding the configuration
    #[arg(long, global = true)]
    server: Option<String>,

    /// Realm, overriding the configuration
    #[arg(long, global = true)]
    realm: Option<String>,

    /// Use the in-memory mock router instead of a real one (for testing/demo)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every event published on a topic
    Tail {
        /// Topic, e.g. `vehicles.4004`
        topic: String,
    },

    /// Call a procedure and print the decoded result
    Call {
        /// Procedure, e.g. `meta.last_event`
        procedure: String,

        /// Positional arguments as JSON (bare words are sent as strings)
        args: Vec<String>,
    },

    /// Follow a route model and its canonical itinerary
    WatchRoute {
        /// Route short name, e.g. `10`
        short_name: String,
    },

    /// List the agency's routes
    Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref(), cli.server, cli.realm)?;

    match cli.command {
        Commands::Tail { topic } => {
            tail::run(config, &topic, cli.mock).await?;
        }
        Commands::Call { procedure, args } => {
            call::run(config, &procedure, &args, cli.mock).await?;
        }
        Commands::WatchRoute { short_name } => {
            watch_route::run(config, &short_name, cli.mock).await?;
        }
        Commands::Routes => {
            routes::run(config, cli.mock).await?;
        }
    }

    Ok(())
}
