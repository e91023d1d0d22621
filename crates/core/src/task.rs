//! Task model and lifecycle state machine.
//!
//! A [`Task`] is a common envelope (ids, status, counters, timestamps) around
//! a kind-specific [`TaskPayload`]. The payload is decoded once at the store
//! boundary; nothing downstream inspects optional fields to guess the kind.
//!
//! ```text
//! pending -> processing -> { completed, failed, background }
//! background -> processing            (parked sweep / recovery)
//! pending | processing | background -> { completed, failed }
//! ```
//!
//! `completed` and `failed` are terminal: no edge leaves them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{OwnerId, TaskId, Timestamp};
use crate::vendor_status::VendorArtifact;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    /// Parked after stalling; retried by the background sweep.
    Background,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Every status a finalizing caller may transition out of.
    pub const NON_TERMINAL: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Background,
    ];

    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Background => "background",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    ///
    /// Self-edges on non-terminal statuses are allowed; they carry counter
    /// and progress patches without changing the status.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (Pending, Pending | Processing | Completed | Failed) => true,
            (Processing, Processing | Background | Completed | Failed) => true,
            (Background, Background | Processing | Completed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "background" => Ok(TaskStatus::Background),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown task status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind and payload
// ---------------------------------------------------------------------------

/// The kind of generation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Image,
    Video,
    Merge,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Image => "image",
            TaskKind::Video => "video",
            TaskKind::Merge => "merge",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(TaskKind::Image),
            "video" => Ok(TaskKind::Video),
            "merge" => Ok(TaskKind::Merge),
            other => Err(CoreError::Validation(format!("Unknown task kind '{other}'"))),
        }
    }
}

/// Image synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTask {
    /// Face reference used by the auto-merge post-processing step.
    #[serde(default)]
    pub face_image_url: Option<String>,
    /// Vendor-specific generation parameters, passed through untouched.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Video synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTask {
    #[serde(default)]
    pub source_image_url: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Stand-alone face-merge job executed by the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeTask {
    pub face_image_url: String,
    pub base_image_url: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Kind-specific part of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskPayload {
    Image(ImageTask),
    Video(VideoTask),
    Merge(MergeTask),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Image(_) => TaskKind::Image,
            TaskPayload::Video(_) => TaskKind::Video,
            TaskPayload::Merge(_) => TaskKind::Merge,
        }
    }

    pub fn parameters(&self) -> &serde_json::Value {
        match self {
            TaskPayload::Image(t) => &t.parameters,
            TaskPayload::Video(t) => &t.parameters,
            TaskPayload::Merge(t) => &t.parameters,
        }
    }

    /// Face reference usable for auto-merge, if this kind carries one.
    pub fn face_reference(&self) -> Option<&str> {
        match self {
            TaskPayload::Image(t) => t
                .face_image_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty()),
            _ => None,
        }
    }
}

/// Post-processing decided at submission time. Never patched afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessFlags {
    #[serde(default)]
    pub should_auto_merge: bool,
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A result artifact recorded on a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_url: String,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// SHA-256 of the stored bytes. `None` until the artifact has been
    /// copied off the vendor's transient URL.
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub is_merged: bool,
    /// Pre-merge artifact URL, set when `is_merged` is true.
    #[serde(default)]
    pub original_artifact_url: Option<String>,
    /// Why auto-merge was skipped or failed for this artifact.
    #[serde(default)]
    pub merge_error: Option<String>,
}

impl Artifact {
    /// Record a vendor artifact as-is, before it has been persisted.
    pub fn from_vendor(artifact: &VendorArtifact) -> Self {
        Self {
            artifact_url: artifact.url.clone(),
            seed: artifact.seed,
            metadata: serde_json::Value::Null,
            content_hash: None,
            is_merged: false,
            original_artifact_url: None,
            merge_error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The unit of orchestrated generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub owner_id: OwnerId,
    pub parent_entity_id: Option<String>,
    pub submitted_at: Timestamp,
    pub updated_at: Timestamp,
    pub poll_attempts: u32,
    pub stall_count: u32,
    /// Last vendor-reported progress (0-100), if any.
    pub progress: Option<u8>,
    /// How many times the task has been parked.
    pub parked_count: u32,
    pub post_process: PostProcessFlags,
    pub payload: TaskPayload,
    pub result: Option<Vec<Artifact>>,
    pub error: Option<String>,
}

impl Task {
    /// A freshly submitted task in `pending` status.
    pub fn new(
        task_id: impl Into<TaskId>,
        owner_id: impl Into<OwnerId>,
        parent_entity_id: Option<String>,
        payload: TaskPayload,
        post_process: PostProcessFlags,
        now: Timestamp,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            owner_id: owner_id.into(),
            parent_entity_id,
            submitted_at: now,
            updated_at: now,
            poll_attempts: 0,
            stall_count: 0,
            progress: None,
            parked_count: 0,
            post_process,
            payload,
            result: None,
            error: None,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}

/// Field updates applied together with a status transition.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub poll_attempts: Option<u32>,
    pub stall_count: Option<u32>,
    pub progress: Option<u8>,
    pub parked_count: Option<u32>,
    pub result: Option<Vec<Artifact>>,
    pub error: Option<String>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counters(mut self, poll_attempts: u32, stall_count: u32) -> Self {
        self.poll_attempts = Some(poll_attempts);
        self.stall_count = Some(stall_count);
        self
    }

    pub fn with_progress(mut self, progress: Option<u8>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_parked_count(mut self, parked_count: u32) -> Self {
        self.parked_count = Some(parked_count);
        self
    }

    pub fn with_result(mut self, result: Vec<Artifact>) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Apply the patch in place.
    pub fn apply(&self, task: &mut Task) {
        if let Some(v) = self.poll_attempts {
            task.poll_attempts = v;
        }
        if let Some(v) = self.stall_count {
            task.stall_count = v;
        }
        if let Some(v) = self.progress {
            task.progress = Some(v);
        }
        if let Some(v) = self.parked_count {
            task.parked_count = v;
        }
        if let Some(ref v) = self.result {
            task.result = Some(v.clone());
        }
        if let Some(ref v) = self.error {
            task.error = Some(v.clone());
        }
    }
}
