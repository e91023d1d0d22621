//! Event names for job lifecycle notifications.
//!
//! Used as the `eventName` when a job event is pushed to the owning
//! client through a notification channel.

/// A job was accepted by the vendor and persisted.
pub const EVENT_JOB_SUBMITTED: &str = "job.submitted";

/// Progress update while the vendor is running the job.
pub const EVENT_JOB_PROGRESS: &str = "job.progress";

/// Job completed successfully; payload carries the result artifacts.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// Job failed with an error.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// Job stalled and was parked for background retry.
pub const EVENT_JOB_PARKED: &str = "job.parked";
