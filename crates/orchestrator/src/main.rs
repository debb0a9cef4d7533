//! # Orchestrator service
//!
//! Runs the lease deployment health loop against a Docker daemon
//! and a ledger node, both taken from the configuration file.
//!
//! The service keeps all lease, deployment and payment state in memory,
//! so restarting it forgets every deployment it supervised.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

/// CLI configuration and available subcommands.
mod cli;

/// Subcommand implementations.
mod commands;

use clap::Parser;
use cli::{Cli, Command};
use common::{config::Config, logging};
use tracing::info;

/// Orchestrator entrypoint.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let config = Config::new(cli.config)?;

    logging::init(&config);

    info!("configuration loaded");

    match cli.command {
        Command::Serve => commands::serve(config).await?,
    }

    Ok(())
}
