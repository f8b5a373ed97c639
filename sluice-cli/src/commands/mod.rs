//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod execution;
mod status;

pub use execution::ExecutionCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Check that the engine is reachable
    Health,
    /// Show worker pool status
    Status,
    /// Execution record inspection
    Execution {
        #[command(subcommand)]
        command: ExecutionCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        Commands::Health => status::check_health(&client).await,
        Commands::Status => status::show_status(&client).await,
        Commands::Execution { command } => {
            execution::handle_execution_command(command, &client).await
        }
    }
}
