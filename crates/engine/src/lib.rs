//! Batchline engine - the batch/job lifecycle core.
//!
//! This crate owns the state machine governing batch and job status, the
//! optimistic run-lock protocol, the fencing-code protocol that invalidates
//! stale batches, and the compute-resource polling loop that drives batches
//! through their three phases (prepare, run, assemble).

mod board;
mod console;
mod controller;
mod error;
pub mod queue;
mod registry;
mod worker;

pub use board::JobBoard;
pub use console::{ConsoleCapture, JobConsole};
pub use controller::BatchController;
pub use error::{EngineError, Result};
pub use registry::{CommandRegistry, JobCommand};
pub use worker::{ResourceWorker, WorkerOptions};
