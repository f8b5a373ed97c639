//! Execution command handlers
//!
//! Handles viewing single execution records and listing a pipeline's
//! recent executions.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sluice_client::EngineClient;
use sluice_core::domain::execution::{ExecutionRecord, ExecutionStatus};
use uuid::Uuid;

/// Execution subcommands
#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Get execution details, including the event log
    Get {
        /// Execution ID
        id: String,
    },
    /// List recent executions of a pipeline
    List {
        /// Pipeline ID
        pipeline_id: String,

        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Handle execution commands
pub async fn handle_execution_command(
    command: ExecutionCommands,
    client: &EngineClient,
) -> Result<()> {
    match command {
        ExecutionCommands::Get { id } => get_execution(client, &id).await,
        ExecutionCommands::List { pipeline_id, limit } => {
            list_executions(client, &pipeline_id, limit).await
        }
    }
}

fn parse_id(kind: &str, input: &str) -> Result<Uuid> {
    Uuid::parse_str(input).with_context(|| format!("Invalid {} ID '{}'", kind, input))
}

async fn get_execution(client: &EngineClient, id: &str) -> Result<()> {
    let id = parse_id("execution", id)?;

    match client.get_execution(id).await {
        Ok(record) => {
            print_execution_details(&record);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!("{}", format!("Execution {} not found.", id).yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_executions(
    client: &EngineClient,
    pipeline_id: &str,
    limit: Option<usize>,
) -> Result<()> {
    let pipeline_id = parse_id("pipeline", pipeline_id)?;
    let records = client.list_executions(pipeline_id, limit).await?;

    if records.is_empty() {
        println!(
            "{}",
            format!("No executions found for pipeline {}.", pipeline_id).yellow()
        );
    } else {
        println!(
            "{}",
            format!(
                "Found {} execution(s) for pipeline {}:",
                records.len(),
                pipeline_id
            )
            .bold()
        );
        println!();
        for record in records {
            print_execution_summary(&record);
        }
    }

    Ok(())
}

fn print_execution_summary(record: &ExecutionRecord) {
    println!(
        "  {} Execution {}",
        "▸".cyan(),
        record.execution_id.to_string().dimmed()
    );
    println!("    Content:  {}", record.content_id);
    println!("    Status:   {}", colorize_status(&record.status));
    println!("    Attempt:  {}", record.attempt);
    println!(
        "    Updated:  {}",
        record
            .updated_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_execution_details(record: &ExecutionRecord) {
    println!("{}", "Execution Details:".bold());
    println!("  ID:          {}", record.execution_id.to_string().cyan());
    println!("  Task ID:     {}", record.task_id.to_string().dimmed());
    println!("  Pipeline ID: {}", record.pipeline_id.to_string().dimmed());
    println!("  Content:     {}", record.content_id);
    println!("  Status:      {}", colorize_status(&record.status));
    println!("  Attempt:     {}", record.attempt);
    if let Some(worker) = &record.worker_id {
        println!("  Worker:      {}", worker);
    }
    println!(
        "  Created:     {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated:     {}",
        record.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    if record.status.is_terminal() {
        let duration = record.updated_at.signed_duration_since(record.created_at);
        println!("  Duration:    {}s", duration.num_seconds());
    }

    if let Some(error) = &record.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }

    if !record.events.is_empty() {
        println!("\n{}", "Events:".bold());
        println!("{}", "─".repeat(80).dimmed());
        for event in &record.events {
            println!(
                "{} [{}] {}",
                event.timestamp.format("%H:%M:%S").to_string().dimmed(),
                colorize_status(&event.status),
                event.message.as_deref().unwrap_or("")
            );
        }
        println!("{}", "─".repeat(80).dimmed());
    }
}

/// Colorize execution status for display
fn colorize_status(status: &ExecutionStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        ExecutionStatus::Pending => status_str.yellow(),
        ExecutionStatus::Running => status_str.cyan(),
        ExecutionStatus::Completed => status_str.green(),
        ExecutionStatus::Failed => status_str.red(),
        ExecutionStatus::Cancelled => status_str.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_rejects_garbage() {
        let err = parse_id("execution", "abc").unwrap_err();
        assert!(err.to_string().contains("Invalid execution ID 'abc'"));
    }

    #[test]
    fn test_parse_id_accepts_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id("pipeline", &id.to_string()).unwrap(), id);
    }
}
