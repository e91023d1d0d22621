//! Process-lifetime job outcome counters.
//!
//! [`JobLog`] is the built-in [`JobObserver`]: it writes one structured log
//! line per lifecycle event and keeps totals for the health endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use synth_core::task::{Artifact, Task, TaskKind};
use synth_events::JobObserver;

#[derive(Debug, Default)]
pub struct JobLog {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    parked: AtomicU64,
}

/// Snapshot of [`JobLog`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub parked: u64,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl JobObserver for JobLog {
    async fn on_job_submitted(&self, task: &Task) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(task_id = %task.task_id, owner_id = %task.owner_id, kind = %task.kind(), "Job submitted");
    }

    async fn on_job_completed(&self, task_id: &str, kind: TaskKind, result: &[Artifact]) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let merged = result.iter().filter(|a| a.is_merged).count();
        tracing::info!(task_id, kind = %kind, artifacts = result.len(), merged, "Job completed");
    }

    async fn on_job_failed(&self, task_id: &str, reason: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(task_id, reason, "Job failed");
    }

    async fn on_job_parked(&self, task_id: &str) {
        self.parked.fetch_add(1, Ordering::Relaxed);
        tracing::info!(task_id, "Job parked");
    }
}
