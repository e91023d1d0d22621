/// Vendor-assigned job identifier; also the primary key of a task.
pub type TaskId = String;

/// Opaque reference to the user that owns a task.
pub type OwnerId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
