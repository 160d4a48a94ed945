//! Keel CLI library

pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};

/// Keel - local cluster substrate provisioning
#[derive(Parser, Debug)]
#[command(name = "keelctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision a cluster substrate and its control plane material
    Bootstrap(commands::bootstrap::BootstrapArgs),
    /// Tear down a previously bootstrapped substrate
    Delete(commands::delete::DeleteArgs),
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Bootstrap(args) => commands::bootstrap::run(args).await,
            Commands::Delete(args) => commands::delete::run(args).await,
        }
    }
}
