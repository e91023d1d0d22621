//! Generation job orchestration.
//!
//! Submission, dual-path status resolution (polling and webhook), the
//! idempotent completion resolver, face-merge deduplication, crash
//! recovery and the parked-task sweep. [`Engine`] wires them together.

pub mod blob;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod merge;
pub mod recovery;
pub mod resolver;
pub mod scheduler;
pub mod sweep;
pub mod webhook;

pub use blob::{BlobConfig, BlobError, BlobStore, LocalBlobStore, S3BlobStore};
pub use config::EngineConfig;
pub use engine::{Engine, EngineDeps, EngineError, SubmitRequest};
pub use merge::{MergeCoordinator, MergeError};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use resolver::{CompletionResolver, Resolution};
pub use scheduler::{PollingScheduler, TickOutcome};
pub use sweep::ParkedSweep;
pub use webhook::{WebhookAck, WebhookReceiver};
