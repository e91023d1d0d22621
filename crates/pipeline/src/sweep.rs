//! Parked-task sweep.
//!
//! Runs on a much lower frequency than the poller. Each pass moves a batch
//! of `background` tasks back to `processing` and attaches a fresh poller,
//! which gets a new stall and timeout budget.

use std::sync::Arc;
use std::time::Duration;

use synth_core::task::{TaskPatch, TaskStatus};
use synth_db::{StoreError, TaskStore};
use tokio_util::sync::CancellationToken;

use crate::scheduler::PollingScheduler;

pub struct ParkedSweep {
    store: Arc<dyn TaskStore>,
    scheduler: PollingScheduler,
    batch_size: usize,
}

impl ParkedSweep {
    pub fn new(store: Arc<dyn TaskStore>, scheduler: PollingScheduler, batch_size: usize) -> Self {
        Self {
            store,
            scheduler,
            batch_size,
        }
    }

    /// Resume one batch of parked tasks. Returns how many were resumed.
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        let parked = self
            .store
            .list_by_status(TaskStatus::Background, self.batch_size)
            .await?;

        let mut resumed = 0;
        for mut task in parked {
            let moved = self
                .store
                .compare_and_transition(
                    &task.task_id,
                    &[TaskStatus::Background],
                    TaskStatus::Processing,
                    TaskPatch::new().with_counters(task.poll_attempts, 0),
                )
                .await?;
            if !moved {
                continue;
            }
            task.status = TaskStatus::Processing;
            task.stall_count = 0;
            if self.scheduler.attach(&task) {
                resumed += 1;
            } else {
                tracing::warn!(task_id = %task.task_id, "Resumed task already had a poller");
            }
        }
        Ok(resumed)
    }

    /// Run the sweep loop until `cancel` is triggered.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "Parked-task sweep started");

        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; recovery already covered
        // parked tasks at startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Parked-task sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => tracing::debug!("Parked-task sweep: nothing to resume"),
                        Ok(resumed) => tracing::info!(resumed, "Parked-task sweep: resumed tasks"),
                        Err(e) => tracing::error!(error = %e, "Parked-task sweep failed"),
                    }
                }
            }
        }
    }
}
