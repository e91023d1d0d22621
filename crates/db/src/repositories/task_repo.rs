//! Repository for the `tasks` table.
//!
//! Every status change goes through [`TaskRepo::compare_and_transition`],
//! a single conditional `UPDATE`. Expected statuses without an edge to the
//! new status are dropped before the query, and terminal rows are excluded
//! in SQL as well, so a completed or failed task can never be moved again.

use sqlx::PgPool;
use synth_core::task::{Artifact, Task, TaskPatch, TaskStatus};
use synth_core::types::Timestamp;

use crate::models::task::TaskRow;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    task_id, kind, status, owner_id, parent_entity_id, \
    submitted_at, updated_at, poll_attempts, stall_count, progress, parked_count, \
    post_process, payload, result, error";

/// Terminal status literals, excluded from every conditional update.
const TERMINAL_STATUSES: [&str; 2] = ["completed", "failed"];

/// Provides persistence operations for orchestrated tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new task row.
    pub async fn insert(pool: &PgPool, task: &Task) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_value(&task.payload)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let post_process = serde_json::to_value(task.post_process)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            "INSERT INTO tasks \
                 (task_id, kind, status, owner_id, parent_entity_id, \
                  submitted_at, updated_at, post_process, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&task.task_id)
        .bind(task.kind().as_str())
        .bind(task.status.as_str())
        .bind(&task.owner_id)
        .bind(&task.parent_entity_id)
        .bind(task.submitted_at)
        .bind(task.updated_at)
        .bind(post_process)
        .bind(payload)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a task by its vendor job id.
    pub async fn find_by_id(pool: &PgPool, task_id: &str) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE task_id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Atomically move a task to `new_status` if its current status is one
    /// of `expected`, applying `patch` in the same statement.
    ///
    /// Returns `true` if the row was updated.
    pub async fn compare_and_transition(
        pool: &PgPool,
        task_id: &str,
        expected: &[TaskStatus],
        new_status: TaskStatus,
        patch: &TaskPatch,
    ) -> Result<bool, sqlx::Error> {
        let expected = legal_sources(expected, new_status);
        if expected.is_empty() {
            return Ok(false);
        }
        let result_json = patch
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let result = sqlx::query(
            "UPDATE tasks \
             SET status = $3, updated_at = NOW(), \
                 poll_attempts = COALESCE($4, poll_attempts), \
                 stall_count = COALESCE($5, stall_count), \
                 progress = COALESCE($6, progress), \
                 parked_count = COALESCE($7, parked_count), \
                 result = COALESCE($8, result), \
                 error = COALESCE($9, error) \
             WHERE task_id = $1 \
               AND status = ANY($2) \
               AND status NOT IN ($10, $11)",
        )
        .bind(task_id)
        .bind(&expected)
        .bind(new_status.as_str())
        .bind(patch.poll_attempts.map(|v| v as i32))
        .bind(patch.stall_count.map(|v| v as i32))
        .bind(patch.progress.map(i16::from))
        .bind(patch.parked_count.map(|v| v as i32))
        .bind(result_json)
        .bind(&patch.error)
        .bind(TERMINAL_STATUSES[0])
        .bind(TERMINAL_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the result artifacts of a completed task.
    ///
    /// Used after artifact persistence and merge post-processing; the
    /// status itself is never touched.
    pub async fn replace_result(
        pool: &PgPool,
        task_id: &str,
        artifacts: &[Artifact],
    ) -> Result<bool, sqlx::Error> {
        let result_json =
            serde_json::to_value(artifacts).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let result = sqlx::query(
            "UPDATE tasks SET result = $2, updated_at = NOW() \
             WHERE task_id = $1 AND status = $3",
        )
        .bind(task_id)
        .bind(result_json)
        .bind(TaskStatus::Completed.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Non-terminal tasks submitted at or after `submitted_after`, oldest first.
    pub async fn list_incomplete(
        pool: &PgPool,
        submitted_after: Timestamp,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let statuses: Vec<String> = TaskStatus::NON_TERMINAL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status = ANY($1) AND submitted_at >= $2 \
             ORDER BY submitted_at ASC"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(&statuses)
            .bind(submitted_after)
            .fetch_all(pool)
            .await
    }

    /// Tasks currently in `status`, oldest first, capped at `limit`.
    pub async fn list_by_status(
        pool: &PgPool,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status = $1 \
             ORDER BY submitted_at ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}

/// Status literals from `expected` that have an edge to `new_status`.
fn legal_sources(expected: &[TaskStatus], new_status: TaskStatus) -> Vec<String> {
    expected
        .iter()
        .filter(|status| status.can_transition_to(new_status))
        .map(|status| status.as_str().to_string())
        .collect()
}
