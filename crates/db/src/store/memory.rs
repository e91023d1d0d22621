//! In-memory [`TaskStore`] for tests and single-node development.
//!
//! Conditional transitions run under one write lock, which gives the same
//! first-writer-wins behaviour as the conditional `UPDATE` in Postgres.
//! State is lost when the process exits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use synth_core::task::{Artifact, Task, TaskPatch, TaskStatus};
use synth_core::types::{TaskId, Timestamp};

use super::{StoreError, TaskStore};

/// Thread-safe in-memory task store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a task verbatim, bypassing the state machine.
    ///
    /// Used to seed fixtures such as "a task left in `background` by a
    /// previous process".
    pub fn seed(&self, task: Task) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.task_id.clone(), task);
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<TaskId, StoreError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(&task.task_id) {
            return Err(StoreError::Duplicate(task.task_id.clone()));
        }
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(task.task_id.clone())
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned())
    }

    async fn compare_and_transition(
        &self,
        task_id: &str,
        expected: &[TaskStatus],
        new_status: TaskStatus,
        patch: TaskPatch,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let Some(task) = tasks.get_mut(task_id) else {
            return Ok(false);
        };
        if !expected.contains(&task.status) || !task.status.can_transition_to(new_status) {
            return Ok(false);
        }

        task.status = new_status;
        patch.apply(task);
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn replace_result(
        &self,
        task_id: &str,
        artifacts: &[Artifact],
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        match tasks.get_mut(task_id) {
            Some(task) if task.status == TaskStatus::Completed => {
                task.result = Some(artifacts.to_vec());
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_incomplete(&self, submitted_after: Timestamp) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| !t.status.is_terminal() && t.submitted_at >= submitted_after)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.submitted_at);
        Ok(found)
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<Task> = tasks.values().filter(|t| t.status == status).cloned().collect();
        found.sort_by_key(|t| t.submitted_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
