//! Health and status command handlers

use anyhow::Result;
use colored::*;
use sluice_client::EngineClient;
use sluice_core::dto::status::{PoolStatus, WorkerStatus};

/// Check engine liveness
pub async fn check_health(client: &EngineClient) -> Result<()> {
    client.health().await?;
    println!("{} Engine at {} is healthy", "✓".green(), client.base_url());
    Ok(())
}

/// Display both worker pools
pub async fn show_status(client: &EngineClient) -> Result<()> {
    let status = client.status().await?;

    let state = if status.running {
        "running".green()
    } else {
        "stopped".red()
    };
    println!("{} {}", "Engine:".bold(), state);
    println!();

    print_pool("Source workers", &status.source_workers);
    print_pool("Processing workers", &status.processing_workers);

    Ok(())
}

fn print_pool(title: &str, pool: &PoolStatus) {
    let counts = format!("{}/{} active", pool.active, pool.configured);
    let counts = if pool.active == pool.configured {
        counts.green()
    } else {
        counts.yellow()
    };
    println!("{} ({})", title.bold(), counts);

    for worker in &pool.workers {
        print_worker(worker);
    }
    println!();
}

fn print_worker(worker: &WorkerStatus) {
    let liveness = if worker.alive {
        "alive".green()
    } else {
        "down".red()
    };
    let pid = worker
        .pid
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "  {} {:<14} {:<6} pid {:<8} restarts {}",
        "▸".cyan(),
        worker.id,
        liveness,
        pid.dimmed(),
        worker.restarts
    );
    if let Some(started) = worker.started_at {
        println!(
            "    Started: {}",
            started.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
}
