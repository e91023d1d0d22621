//! Startup recovery.
//!
//! [`RecoveryManager::run`] scans for tasks a previous process left
//! incomplete, checks each once with the vendor, and either resolves it
//! immediately or re-attaches a poller. Nothing is re-submitted; the
//! vendor job already exists under the task id. Tasks older than the
//! recovery window are left for the retention sweep.

use std::sync::Arc;

use synth_core::clock::Clock;
use synth_core::task::{Task, TaskPatch, TaskStatus};
use synth_core::vendor_status::TerminalSignal;
use synth_db::{StoreError, TaskStore};
use synth_vendor::{VendorClient, VendorError};

use crate::resolver::CompletionResolver;
use crate::scheduler::PollingScheduler;

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    /// Finalized by the synchronous status check.
    pub resolved: usize,
    /// Returned to `processing` with a poller attached.
    pub reattached: usize,
    /// Changed state under us or could not be reopened.
    pub skipped: usize,
}

pub struct RecoveryManager {
    store: Arc<dyn TaskStore>,
    vendor: Arc<dyn VendorClient>,
    resolver: Arc<CompletionResolver>,
    scheduler: PollingScheduler,
    clock: Arc<dyn Clock>,
    max_age: chrono::Duration,
}

impl RecoveryManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        vendor: Arc<dyn VendorClient>,
        resolver: Arc<CompletionResolver>,
        scheduler: PollingScheduler,
        clock: Arc<dyn Clock>,
        max_age: chrono::Duration,
    ) -> Self {
        Self {
            store,
            vendor,
            resolver,
            scheduler,
            clock,
            max_age,
        }
    }

    pub async fn run(&self) -> Result<RecoveryReport, StoreError> {
        let cutoff = self.clock.now() - self.max_age;
        let tasks = self.store.list_incomplete(cutoff).await?;
        let mut report = RecoveryReport {
            scanned: tasks.len(),
            ..Default::default()
        };

        tracing::info!(count = tasks.len(), cutoff = %cutoff, "Recovering incomplete tasks");

        for task in tasks {
            match self.recover_one(task).await {
                Ok(Recovered::Resolved) => report.resolved += 1,
                Ok(Recovered::Reattached) => report.reattached += 1,
                Ok(Recovered::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Task recovery failed");
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            resolved = report.resolved,
            reattached = report.reattached,
            skipped = report.skipped,
            "Recovery complete",
        );
        Ok(report)
    }

    async fn recover_one(&self, mut task: Task) -> Result<Recovered, StoreError> {
        let signal = match self.vendor.fetch_status(&task.task_id).await {
            Ok(status) => status.terminal(),
            Err(VendorError::Permanent(reason)) => Some(TerminalSignal::Failed { reason }),
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "Recovery status check failed, polling instead");
                None
            }
        };

        if let Some(signal) = signal {
            self.resolver.resolve(&task.task_id, signal).await?;
            return Ok(Recovered::Resolved);
        }

        let reopened = self
            .store
            .compare_and_transition(
                &task.task_id,
                &TaskStatus::NON_TERMINAL,
                TaskStatus::Processing,
                TaskPatch::new().with_counters(task.poll_attempts, 0),
            )
            .await?;
        if !reopened {
            return Ok(Recovered::Skipped);
        }

        task.status = TaskStatus::Processing;
        task.stall_count = 0;
        if self.scheduler.attach(&task) {
            tracing::info!(task_id = %task.task_id, kind = %task.kind(), "Poller re-attached");
            Ok(Recovered::Reattached)
        } else {
            Ok(Recovered::Skipped)
        }
    }
}

enum Recovered {
    Resolved,
    Reattached,
    Skipped,
}
