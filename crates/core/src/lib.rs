//! Pure domain types for the generation job orchestrator.
//!
//! Nothing in this crate performs I/O. The task model, its state machine,
//! the polling policy and the normalized vendor status shape live here so
//! that the store, vendor, and pipeline crates agree on one vocabulary.

pub mod clock;
pub mod error;
pub mod hashing;
pub mod job_events;
pub mod merge_input;
pub mod polling;
pub mod task;
pub mod types;
pub mod vendor_status;
