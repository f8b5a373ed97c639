//! Worker slots
//!
//! A slot is a stable position in a pool ("processing-1"). It owns the
//! current child process, if any, the write end of the child's stdin, and the
//! slot's restart backoff.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sluice_core::dto::status::{WorkerKind, WorkerStatus};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

/// How worker children are launched
///
/// The child command line is `program base_args.. <subcommand> --worker-id <id>`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    base_args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Re-executes the running binary
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate engine executable")?;
        Ok(Self::new(program, Vec::new()))
    }

    fn build(&self, kind: WorkerKind, worker_id: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .arg(kind.subcommand())
            .arg("--worker-id")
            .arg(worker_id)
            .stdin(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// One position in a worker pool
pub struct WorkerSlot {
    pub id: String,
    pub kind: WorkerKind,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    spawned: u32,
    consecutive_failures: u32,
    next_spawn_at: Option<Instant>,
}

impl WorkerSlot {
    pub fn new(kind: WorkerKind, index: usize) -> Self {
        Self {
            id: format!("{}-{}", kind.slot_prefix(), index),
            kind,
            child: None,
            stdin: None,
            pid: None,
            started_at: None,
            started: None,
            spawned: 0,
            consecutive_failures: 0,
            next_spawn_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Whether the slot is empty and its backoff has elapsed
    pub fn spawn_due(&self, now: Instant) -> bool {
        !self.is_running() && self.next_spawn_at.is_none_or(|at| now >= at)
    }

    /// Starts a new child in this slot
    pub fn spawn(&mut self, command: &WorkerCommand, now: Instant) -> Result<()> {
        let mut child = command
            .build(self.kind, &self.id)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.id))?;

        self.stdin = child.stdin.take();
        self.pid = child.id();
        self.child = Some(child);
        self.started = Some(now);
        self.started_at = Some(Utc::now());
        self.next_spawn_at = None;
        self.spawned += 1;

        info!(worker_id = %self.id, pid = ?self.pid, "{} worker started", self.kind);
        Ok(())
    }

    /// Returns the exit status if the child has exited since the last check
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child
                .try_wait()
                .with_context(|| format!("Failed to check {}", self.id)),
            None => Ok(None),
        }
    }

    /// Clears the dead child and schedules the next spawn; returns the delay
    ///
    /// The backoff resets once a child has stayed up for the backoff cap.
    pub fn mark_exited(&mut self, now: Instant, backoff: &RetryPolicy) -> Duration {
        let uptime = self
            .started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();

        if uptime >= backoff.max_delay {
            self.consecutive_failures = 0;
        }

        let delay = backoff.delay_for(self.consecutive_failures);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_spawn_at = Some(now + delay);
        self.clear();
        delay
    }

    /// Closes the child's stdin, the cooperative stop signal
    pub fn request_stop(&mut self) {
        self.stdin.take();
    }

    /// Waits for the child until `deadline`, then kills it
    pub async fn wait_or_kill(&mut self, deadline: Instant) {
        let Some(child) = self.child.as_mut() else {
            return;
        };

        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => info!(worker_id = %self.id, "Worker stopped ({})", status),
            Ok(Err(e)) => warn!(worker_id = %self.id, "Failed to wait for worker: {}", e),
            Err(_) => {
                warn!(worker_id = %self.id, "Worker did not stop within grace period, killing");
                if let Err(e) = child.kill().await {
                    warn!(worker_id = %self.id, "Failed to kill worker: {}", e);
                }
            }
        }

        self.clear();
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id.clone(),
            pid: self.pid,
            alive: self.is_running(),
            restarts: self.spawned.saturating_sub(1),
            started_at: self.started_at,
        }
    }

    fn clear(&mut self) {
        self.child = None;
        self.stdin = None;
        self.pid = None;
        self.started = None;
        self.started_at = None;
    }
}
