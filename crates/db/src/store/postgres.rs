//! PostgreSQL-backed [`TaskStore`].
//!
//! The conditional `UPDATE` in [`TaskRepo::compare_and_transition`] is
//! atomic at the database level, so this store stays correct even if more
//! than one orchestrating process shares the table.

use async_trait::async_trait;
use synth_core::task::{Artifact, Task, TaskPatch, TaskStatus};
use synth_core::types::{TaskId, Timestamp};

use super::{StoreError, TaskStore};
use crate::repositories::TaskRepo;
use crate::DbPool;

/// PostgreSQL unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

/// [`TaskStore`] over a shared [`DbPool`].
#[derive(Clone)]
pub struct PgTaskStore {
    pool: DbPool,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: &Task) -> Result<TaskId, StoreError> {
        match TaskRepo::insert(&self.pool, task).await {
            Ok(()) => Ok(task.task_id.clone()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(StoreError::Duplicate(task.task_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        TaskRepo::find_by_id(&self.pool, task_id)
            .await?
            .map(|row| row.into_task())
            .transpose()
    }

    async fn compare_and_transition(
        &self,
        task_id: &str,
        expected: &[TaskStatus],
        new_status: TaskStatus,
        patch: TaskPatch,
    ) -> Result<bool, StoreError> {
        Ok(TaskRepo::compare_and_transition(&self.pool, task_id, expected, new_status, &patch).await?)
    }

    async fn replace_result(
        &self,
        task_id: &str,
        artifacts: &[Artifact],
    ) -> Result<bool, StoreError> {
        Ok(TaskRepo::replace_result(&self.pool, task_id, artifacts).await?)
    }

    async fn list_incomplete(&self, submitted_after: Timestamp) -> Result<Vec<Task>, StoreError> {
        TaskRepo::list_incomplete(&self.pool, submitted_after)
            .await?
            .into_iter()
            .map(|row| row.into_task())
            .collect()
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        TaskRepo::list_by_status(&self.pool, status, limit)
            .await?
            .into_iter()
            .map(|row| row.into_task())
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
