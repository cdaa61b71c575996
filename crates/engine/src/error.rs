//! Engine error taxonomy.

use batchline_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by batch lifecycle operations.
///
/// A lost run-lock race is deliberately absent: it is the one non-fatal
/// condition, handled as a silent skip where it occurs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A job names a command nobody registered.
    #[error("command not registered: {0}")]
    UnregisteredCommand(String),

    /// `set_batch` attempted while a prior status is non-terminal.
    #[error("batch {name} already has an active status: {status}")]
    Conflict {
        /// Batch name
        name: String,
        /// The existing, non-terminal state
        status: String,
    },

    /// No fencing code exists for the batch.
    #[error("no batch code found for batch {0}")]
    MissingCode(String),

    /// The fencing code changed since phase entry: the batch was canceled or
    /// restarted, and no further step may commit under the old code.
    #[error(
        "batch code changed for batch {name} ({expected} <> {found}); \
         the batch was canceled or restarted"
    )]
    CodeMismatch {
        /// Batch name
        name: String,
        /// Code captured at phase entry
        expected: String,
        /// Code currently in the store
        found: String,
    },

    /// Assemble found a job that has not finished.
    #[error("job {label} is not finished (status: {status})")]
    NotReady {
        /// Label of the offending job
        label: String,
        /// Its current status
        status: String,
    },

    /// A command's `prepare` or `run` raised.
    #[error("job {label} failed: {source}")]
    JobFailed {
        /// Label of the failing job
        label: String,
        /// The command's error
        #[source]
        source: anyhow::Error,
    },

    /// A mandatory read returned no value.
    #[error("store returned no value for {0}")]
    StoreUnavailable(String),

    /// Store adapter error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error outside the store (transcripts, subprocesses).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| EngineError::Store(StoreError::Json(e)))
}
