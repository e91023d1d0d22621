//! Row model for the `tasks` table.
//!
//! The row keeps the kind-specific payload as JSONB; [`TaskRow::into_task`]
//! decodes it into the tagged [`TaskPayload`] exactly once, at the store
//! boundary.

use sqlx::FromRow;
use synth_core::task::{Artifact, PostProcessFlags, Task, TaskPayload, TaskStatus};
use synth_core::types::Timestamp;

use crate::store::StoreError;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub task_id: String,
    pub kind: String,
    pub status: String,
    pub owner_id: String,
    pub parent_entity_id: Option<String>,
    pub submitted_at: Timestamp,
    pub updated_at: Timestamp,
    pub poll_attempts: i32,
    pub stall_count: i32,
    pub progress: Option<i16>,
    pub parked_count: i32,
    pub post_process: serde_json::Value,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskRow {
    /// Decode the row into the domain [`Task`].
    pub fn into_task(self) -> Result<Task, StoreError> {
        let task_id = self.task_id;
        let decode_err = |reason: String| StoreError::Decode {
            task_id: task_id.clone(),
            reason,
        };

        let status: TaskStatus = self.status.parse().map_err(|e| decode_err(format!("{e}")))?;
        let payload: TaskPayload = serde_json::from_value(self.payload)
            .map_err(|e| decode_err(format!("payload: {e}")))?;
        if payload.kind().as_str() != self.kind {
            return Err(decode_err(format!(
                "kind column '{}' disagrees with payload kind '{}'",
                self.kind,
                payload.kind()
            )));
        }
        let post_process: PostProcessFlags = serde_json::from_value(self.post_process)
            .map_err(|e| decode_err(format!("post_process: {e}")))?;
        let result: Option<Vec<Artifact>> = self
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| decode_err(format!("result: {e}")))?;

        Ok(Task {
            task_id: task_id.clone(),
            status,
            owner_id: self.owner_id,
            parent_entity_id: self.parent_entity_id,
            submitted_at: self.submitted_at,
            updated_at: self.updated_at,
            poll_attempts: self.poll_attempts.max(0) as u32,
            stall_count: self.stall_count.max(0) as u32,
            progress: self.progress.map(|p| p.clamp(0, 100) as u8),
            parked_count: self.parked_count.max(0) as u32,
            post_process,
            payload,
            result,
            error: self.error,
        })
    }
}
