//! Engine supervisor
//!
//! Owns the lifecycle of every worker process: spawns both pools, checks
//! liveness on a fixed interval, respawns crashed children with per-slot
//! backoff, and on shutdown closes every child's stdin, waits out the grace
//! period and kills whatever is left.

pub mod slot;
pub mod status;

pub use slot::{WorkerCommand, WorkerSlot};
pub use status::StatusBoard;

use sluice_core::dto::status::{EngineStatus, PoolStatus, WorkerKind};
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::retry::RetryPolicy;

/// Pool sizes and lifecycle timing
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub num_source_workers: usize,
    pub num_processing_workers: usize,
    pub health_check_interval: Duration,
    pub shutdown_grace_period: Duration,
    pub restart_backoff_initial: Duration,
    pub restart_backoff_max: Duration,
}

impl From<&Config> for SupervisorSettings {
    fn from(config: &Config) -> Self {
        Self {
            num_source_workers: config.num_source_workers,
            num_processing_workers: config.num_processing_workers,
            health_check_interval: config.health_check_interval,
            shutdown_grace_period: config.shutdown_grace_period,
            restart_backoff_initial: config.restart_backoff_initial,
            restart_backoff_max: config.restart_backoff_max,
        }
    }
}

/// Process supervisor for both worker pools
pub struct Supervisor {
    settings: SupervisorSettings,
    command: WorkerCommand,
    status: StatusBoard,
    backoff: RetryPolicy,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, command: WorkerCommand, status: StatusBoard) -> Self {
        let backoff = RetryPolicy {
            max_attempts: u32::MAX,
            initial_delay: settings.restart_backoff_initial,
            max_delay: settings.restart_backoff_max,
        };

        Self {
            settings,
            command,
            status,
            backoff,
        }
    }

    /// Supervises the pools until `shutdown` is cancelled, then stops every child
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut slots = self.build_slots();
        info!(
            "Starting {} source worker(s) and {} processing worker(s)",
            self.settings.num_source_workers, self.settings.num_processing_workers
        );

        let now = Instant::now();
        for slot in slots.iter_mut() {
            self.start(slot, now);
        }
        self.publish(&slots, true);

        let mut ticker = time::interval(self.settings.health_check_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.check(&mut slots);
                    self.publish(&slots, true);
                }
            }
        }

        info!(
            "Stopping workers (grace period: {:?})",
            self.settings.shutdown_grace_period
        );
        self.stop_all(&mut slots).await;
        self.publish(&slots, false);
        info!("All workers stopped");
    }

    fn build_slots(&self) -> Vec<WorkerSlot> {
        let source = (0..self.settings.num_source_workers).map(|i| WorkerSlot::new(WorkerKind::Source, i));
        let processing = (0..self.settings.num_processing_workers)
            .map(|i| WorkerSlot::new(WorkerKind::Processing, i));
        source.chain(processing).collect()
    }

    fn start(&self, slot: &mut WorkerSlot, now: Instant) {
        if let Err(e) = slot.spawn(&self.command, now) {
            let delay = slot.mark_exited(now, &self.backoff);
            error!(worker_id = %slot.id, "{:#}, retrying in {:?}", e, delay);
        }
    }

    /// Liveness pass: reaps exited children and respawns slots whose backoff elapsed
    fn check(&self, slots: &mut [WorkerSlot]) {
        let now = Instant::now();

        for slot in slots.iter_mut() {
            match slot.try_exit() {
                Ok(Some(status)) => {
                    let delay = slot.mark_exited(now, &self.backoff);
                    warn!(
                        worker_id = %slot.id,
                        "Worker exited unexpectedly ({}), respawning in {:?}",
                        status,
                        delay
                    );
                }
                Ok(None) => {}
                Err(e) => warn!(worker_id = %slot.id, "{:#}", e),
            }

            if slot.spawn_due(now) {
                self.start(slot, now);
            }
        }
    }

    async fn stop_all(&self, slots: &mut [WorkerSlot]) {
        for slot in slots.iter_mut() {
            slot.request_stop();
        }

        let deadline = Instant::now() + self.settings.shutdown_grace_period;
        for slot in slots.iter_mut() {
            slot.wait_or_kill(deadline).await;
        }
    }

    fn publish(&self, slots: &[WorkerSlot], running: bool) {
        let pool = |kind: WorkerKind, configured: usize| {
            let workers = slots
                .iter()
                .filter(|s| s.kind == kind)
                .map(WorkerSlot::status)
                .collect();
            PoolStatus::new(configured, workers)
        };

        self.status.publish(EngineStatus {
            running,
            processing_workers: pool(WorkerKind::Processing, self.settings.num_processing_workers),
            source_workers: pool(WorkerKind::Source, self.settings.num_source_workers),
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn settings(grace: Duration) -> SupervisorSettings {
        SupervisorSettings {
            num_source_workers: 1,
            num_processing_workers: 2,
            health_check_interval: Duration::from_millis(20),
            shutdown_grace_period: grace,
            restart_backoff_initial: Duration::from_millis(10),
            restart_backoff_max: Duration::from_millis(40),
        }
    }

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "worker".to_string()],
        )
    }

    async fn wait_for(board: &StatusBoard, check: impl Fn(&EngineStatus) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check(&board.snapshot()) {
            assert!(Instant::now() < deadline, "status never reached expected state");
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_pools_start_and_stop_cooperatively() {
        let board = StatusBoard::new(1, 2);
        let supervisor = Supervisor::new(
            settings(Duration::from_secs(10)),
            shell("cat > /dev/null"),
            board.clone(),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move { supervisor.run(token).await }
        });

        wait_for(&board, |s| {
            s.running && s.processing_workers.active == 2 && s.source_workers.active == 1
        })
        .await;

        let status = board.snapshot();
        let ids: Vec<_> = status.processing_workers.workers.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["processing-0", "processing-1"]);
        assert!(status.source_workers.workers.iter().all(|w| w.pid.is_some()));

        let start = Instant::now();
        token.cancel();
        handle.await.unwrap();

        // Children exit on stdin EOF, well before the grace period
        assert!(start.elapsed() < Duration::from_secs(5));
        let status = board.snapshot();
        assert!(!status.running);
        assert_eq!(status.processing_workers.active, 0);
        assert_eq!(status.processing_workers.configured, 2);
    }

    #[tokio::test]
    async fn test_crashed_workers_are_respawned() {
        let board = StatusBoard::new(1, 2);
        let supervisor = Supervisor::new(
            settings(Duration::from_secs(1)),
            shell("sleep 0.05; exit 3"),
            board.clone(),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move { supervisor.run(token).await }
        });

        wait_for(&board, |s| {
            s.processing_workers
                .workers
                .iter()
                .chain(s.source_workers.workers.iter())
                .all(|w| w.restarts >= 2)
        })
        .await;

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unresponsive_workers_are_killed_after_grace() {
        let board = StatusBoard::new(1, 2);
        let supervisor = Supervisor::new(
            settings(Duration::from_millis(100)),
            shell("exec sleep 30"),
            board.clone(),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move { supervisor.run(token).await }
        });

        wait_for(&board, |s| s.processing_workers.active == 2).await;

        let start = Instant::now();
        token.cancel();
        handle.await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(board.snapshot().source_workers.active, 0);
    }
}
