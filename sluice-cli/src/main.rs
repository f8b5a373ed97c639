//! Sluice CLI
//!
//! Command-line interface for inspecting a running Sluice engine.
//!
//! Talks to the supervisor's status API:
//! - `sluice health` checks that the engine answers
//! - `sluice status` shows both worker pools and each worker's liveness
//! - `sluice execution get <id>` prints one execution record with its events
//! - `sluice execution list <pipeline-id> [--limit N]` lists a pipeline's
//!   recent executions, newest first
//!
//! The engine URL comes from `--engine-url` or `SLUICE_ENGINE_URL`.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice pipeline engine CLI", long_about = None)]
struct Cli {
    /// Engine status API URL
    #[arg(long, env = "SLUICE_ENGINE_URL", default_value = "http://localhost:8090")]
    engine_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        engine_url: cli.engine_url,
    };

    handle_command(cli.command, &config).await
}
