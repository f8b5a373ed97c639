//! Sluice Engine
//!
//! Distributed pipeline-triggering and task-execution engine.
//!
//! Architecture:
//! - Supervisor: spawns and health-checks both worker pools, serves the status API
//! - Source workers: run due pipelines' discovery under a lease and enqueue tasks
//! - Processing workers: pull tasks from the queue and run the rest of the pipeline
//!
//! Every role is the same binary; the supervisor re-executes itself with a
//! worker subcommand for each child. Processes share no memory and coordinate
//! only through the lock store and the task queue.

mod api;
mod config;
mod context;
mod retry;
mod runner;
mod scheduler;
mod shutdown;
mod supervisor;
mod worker;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sluice_store::{ExecutionStore, PgStore, db};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;
use crate::context::EngineContext;
use crate::scheduler::{SchedulerSettings, SourceScheduler};
use crate::supervisor::{StatusBoard, Supervisor, SupervisorSettings, WorkerCommand};
use crate::worker::{ProcessingWorker, TracingFailureSink, WorkerSettings};

/// Connections per worker process; each loop blocks on one call at a time
const WORKER_POOL_CONNECTIONS: u32 = 2;

/// Connections for the supervisor's status API
const SUPERVISOR_POOL_CONNECTIONS: u32 = 5;

#[derive(Parser)]
#[command(name = "sluice-engine")]
#[command(about = "Sluice pipeline engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor, both worker pools and the status API (default)
    Supervise,
    /// Run a single source scheduler process
    SourceWorker {
        #[arg(long)]
        worker_id: String,
    },
    /// Run a single processing worker process
    ProcessingWorker {
        #[arg(long)]
        worker_id: String,
    },
    /// Create the database schema and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_engine=info,sluice_store=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = load_config().inspect_err(|e| error!("Invalid configuration: {:#}", e))?;

    match cli.command.unwrap_or(Command::Supervise) {
        Command::Supervise => supervise(config).await,
        Command::SourceWorker { worker_id } => run_source_worker(config, worker_id).await,
        Command::ProcessingWorker { worker_id } => run_processing_worker(config, worker_id).await,
        Command::Migrate => migrate(&config).await,
    }
}

/// Loads and validates configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env()?;
    config.validate()?;
    Ok(config)
}

async fn migrate(config: &Config) -> Result<()> {
    info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url, 1)
        .await
        .context("Failed to connect to database")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    Ok(())
}

async fn supervise(config: Config) -> Result<()> {
    info!("Starting Sluice Engine");
    info!(
        "Loaded configuration: source_workers={}, processing_workers={}, runner_url={}",
        config.num_source_workers, config.num_processing_workers, config.pipeline_runner_url
    );

    // Schema must exist before any child touches it
    let pool = db::create_pool(&config.database_url, SUPERVISOR_POOL_CONNECTIONS)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let shutdown = CancellationToken::new();
    shutdown::cancel_on_signal(shutdown.clone());

    let status = StatusBoard::new(config.num_source_workers, config.num_processing_workers);
    let executions: Arc<dyn ExecutionStore> = Arc::new(PgStore::new(pool));
    let app = api::create_router(AppState {
        status: status.clone(),
        executions,
    });

    let listener = tokio::net::TcpListener::bind(&config.status_bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.status_bind_addr))?;
    info!("Status API listening on {}", config.status_bind_addr);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let supervisor = Supervisor::new(
        SupervisorSettings::from(&config),
        WorkerCommand::current_exe()?,
        status,
    );
    supervisor.run(shutdown.clone()).await;

    shutdown.cancel();
    server
        .await
        .context("Status API task panicked")?
        .context("Status API failed")?;

    info!("Sluice Engine stopped");
    Ok(())
}

async fn run_source_worker(config: Config, worker_id: String) -> Result<()> {
    let shutdown = worker_shutdown();
    let ctx = EngineContext::connect(&config, WORKER_POOL_CONNECTIONS).await?;

    let scheduler = SourceScheduler::new(worker_id, SchedulerSettings::from(&config), ctx);
    scheduler.run(shutdown).await;
    Ok(())
}

async fn run_processing_worker(config: Config, worker_id: String) -> Result<()> {
    let shutdown = worker_shutdown();
    let ctx = EngineContext::connect(&config, WORKER_POOL_CONNECTIONS).await?;

    let worker = ProcessingWorker::new(
        worker_id,
        WorkerSettings::from(&config),
        ctx,
        Arc::new(TracingFailureSink),
    );
    worker.run(shutdown).await;
    Ok(())
}

/// Worker children stop on signals and when the supervisor closes their stdin
fn worker_shutdown() -> CancellationToken {
    let shutdown = CancellationToken::new();
    shutdown::cancel_on_signal(shutdown.clone());
    shutdown::cancel_on_stdin_eof(shutdown.clone());
    shutdown
}
