//! The Job Store contract.
//!
//! `compare_and_transition` is the only primitive that changes a task's
//! status. Every finalizing path (poller, webhook, recovery) calls it with
//! an explicit list of expected statuses; the first caller wins and every
//! later caller observes `false`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use synth_core::task::{Artifact, Task, TaskPatch, TaskStatus};
use synth_core::types::{TaskId, Timestamp};

pub use memory::InMemoryTaskStore;
pub use postgres::PgTaskStore;

/// Errors from a [`TaskStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task {0} already exists")]
    Duplicate(TaskId),

    #[error("Failed to decode task {task_id}: {reason}")]
    Decode { task_id: TaskId, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for tasks with atomic conditional status transitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn create(&self, task: &Task) -> Result<TaskId, StoreError>;

    /// Fetch a task by id.
    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// Atomically set `new_status` and apply `patch` if the stored status
    /// is one of `expected`. Terminal tasks never match.
    ///
    /// Returns `Ok(false)` when the condition does not hold, including when
    /// the task does not exist.
    async fn compare_and_transition(
        &self,
        task_id: &str,
        expected: &[TaskStatus],
        new_status: TaskStatus,
        patch: TaskPatch,
    ) -> Result<bool, StoreError>;

    /// Overwrite the result artifacts of a `completed` task without
    /// changing its status.
    async fn replace_result(&self, task_id: &str, artifacts: &[Artifact])
        -> Result<bool, StoreError>;

    /// Non-terminal tasks submitted at or after `submitted_after`.
    async fn list_incomplete(&self, submitted_after: Timestamp) -> Result<Vec<Task>, StoreError>;

    /// Tasks currently in `status`, oldest first.
    async fn list_by_status(&self, status: TaskStatus, limit: usize)
        -> Result<Vec<Task>, StoreError>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), StoreError>;
}
