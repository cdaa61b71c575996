//! Batchline core data models.
//!
//! This crate defines the batch/job data structures shared by the store
//! adapters, the lifecycle engine, and the CLI.

#![warn(missing_docs)]

mod batch;
mod key;

pub use batch::{
    Batch, BatchResults, BatchState, BatchStatus, Job, JobOutcome, JobState, ResourceQueue,
};
pub use key::StoreKey;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
