//! Batch and job models - the units of coordinated work in Batchline.

use serde::{Deserialize, Serialize};

use crate::Time;

/// A batch: a named, ordered set of jobs published to the shared store.
///
/// The batch object is immutable once published; re-publishing under the same
/// name mints a fresh batch code and replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Jobs in execution order. Jobs are addressed by index, not by id.
    pub jobs: Vec<Job>,
}

/// One unit of work within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Name of the registered command that prepares and runs this job.
    pub command: String,

    /// Human-readable label used in logs and error messages.
    pub label: String,

    /// Command-specific parameters, carried opaquely.
    #[serde(flatten, default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    /// Create a job with no extra parameters.
    pub fn new(command: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            label: label.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Add a command-specific parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Lifecycle state of a batch as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// `set_batch` started, definition not yet published
    Initializing,
    /// Definition published, waiting for a worker
    Initialized,
    /// Prepare phase in progress
    Preparing,
    /// Prepare phase completed
    DonePreparing,
    /// Run phase in progress
    Running,
    /// Assemble phase in progress
    Assembling,
    /// Results object published
    DoneAssembling,
    /// All phases completed by a worker
    Finished,
    /// A phase failed or the batch was stopped
    Error,
}

impl BatchState {
    /// Terminal states allow a future `set_batch` to overwrite the batch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Preparing => "preparing",
            Self::DonePreparing => "done_preparing",
            Self::Running => "running",
            Self::Assembling => "assembling",
            Self::DoneAssembling => "done_assembling",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Batch status record, overwritten wholesale on every transition.
///
/// The status is a progress hint for observers; it carries no version and the
/// fencing code, not the status, is what invalidates stale work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    /// Current lifecycle state
    pub state: BatchState,

    /// Job the phase is currently working on, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_index: Option<usize>,

    /// Human-readable error message, set when `state` is `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When this status was written
    pub updated_at: Time,
}

impl BatchStatus {
    /// Status with no job context.
    pub fn new(state: BatchState) -> Self {
        Self {
            state,
            job_index: None,
            error: None,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Status pointing at a specific job.
    pub fn at_job(state: BatchState, job_index: usize) -> Self {
        Self {
            job_index: Some(job_index),
            ..Self::new(state)
        }
    }

    /// Error status with a message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(BatchState::Error)
        }
    }

    /// Error status pointing at the job that failed.
    pub fn failed_at(job_index: usize, error: impl Into<String>) -> Self {
        Self {
            job_index: Some(job_index),
            ..Self::failed(error)
        }
    }
}

/// Per-job execution state, stored as a scalar per `(batch, index)`.
///
/// Absence of the scalar is the implicit initial state. Valid transitions are
/// `absent -> ready -> running -> {finished, error}`; an explicit clear resets
/// to absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Prepared and waiting to be claimed
    Ready,
    /// Claimed by a worker and executing
    Running,
    /// Completed, result published
    Finished,
    /// Execution raised an error
    Error,
}

impl JobState {
    /// Scalar representation stored in the shared store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// Parse the stored scalar; `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Assembled results for a batch, published in job order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// One outcome per job, in batch order.
    pub results: Vec<JobOutcome>,
}

/// The outcome of a single job, paired with its definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    /// The job as published in the batch.
    pub job: Job,

    /// Whatever the command's `run` returned.
    pub result: serde_json::Value,
}

/// Pending batch names for a compute resource.
///
/// Mutated read-modify-write with no transaction; concurrent writers may lose
/// updates. See the queue helpers in the engine crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceQueue {
    /// Batch names awaiting handling, oldest first.
    pub batch_names: Vec<String>,
}
