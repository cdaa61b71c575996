//! Batch lifecycle controller.
//!
//! Owns the batch definition, the batch status record, and the fencing-code
//! protocol. Every phase operation captures the batch code on entry and
//! re-validates it before and after each job-level step: if the code changes
//! mid-phase (re-publish or force stop), the phase aborts and no further job
//! commits — jobs already committed stand.

use std::sync::Arc;

use batchline_core::{
    Batch, BatchResults, BatchState, BatchStatus, Job, JobOutcome, JobState, StoreKey,
};
use batchline_store::Store;
use tracing::{debug, error, info, warn};

use crate::board::JobBoard;
use crate::console::ConsoleCapture;
use crate::error::{decode, EngineError, Result};
use crate::queue;
use crate::registry::CommandRegistry;

/// Fencing code written by `stop_batch`; never minted by `set_batch`, so any
/// in-flight check against a real code fails once it lands.
const FORCE_STOP_CODE: &str = "batch_code_force_stop";

/// Batch lifecycle controller over a shared store.
pub struct BatchController<S> {
    store: Arc<S>,
    registry: Arc<CommandRegistry>,
    board: JobBoard<S>,
}

impl<S: Store> BatchController<S> {
    /// Create a controller over `store` with the given command registry.
    pub fn new(store: Arc<S>, registry: Arc<CommandRegistry>) -> Self {
        Self {
            board: JobBoard::new(store.clone()),
            store,
            registry,
        }
    }

    /// The job status/lock board this controller writes through.
    pub fn board(&self) -> &JobBoard<S> {
        &self.board
    }

    // --- fencing -----------------------------------------------------------

    pub(crate) async fn batch_code(&self, batch_name: &str) -> Result<String> {
        self.store
            .get(&StoreKey::batch_code(batch_name))
            .await?
            .ok_or_else(|| EngineError::MissingCode(batch_name.to_string()))
    }

    /// Re-fetch the fencing code and compare against the value captured at
    /// phase entry.
    pub(crate) async fn check_batch_code(&self, batch_name: &str, expected: &str) -> Result<()> {
        let found = self.batch_code(batch_name).await?;
        if found != expected {
            return Err(EngineError::CodeMismatch {
                name: batch_name.to_string(),
                expected: expected.to_string(),
                found,
            });
        }
        Ok(())
    }

    // --- status / definition ----------------------------------------------

    pub(crate) async fn set_status(&self, batch_name: &str, status: BatchStatus) -> Result<()> {
        let value =
            serde_json::to_value(&status).map_err(batchline_store::StoreError::Json)?;
        self.store
            .save_object(&StoreKey::batch_status(batch_name), &value)
            .await?;
        Ok(())
    }

    /// Current batch status, if any was ever written.
    pub async fn batch_status(&self, batch_name: &str) -> Result<Option<BatchStatus>> {
        match self
            .store
            .load_object(&StoreKey::batch_status(batch_name))
            .await?
        {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    /// The published batch definition; `None` when not (yet) visible.
    pub async fn batch(&self, batch_name: &str) -> Result<Option<Batch>> {
        match self.store.load_object(&StoreKey::batch(batch_name)).await? {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    /// Jobs of a batch, in order.
    pub async fn batch_jobs(&self, batch_name: &str) -> Result<Option<Vec<Job>>> {
        Ok(self.batch(batch_name).await?.map(|b| b.jobs))
    }

    /// Jobs paired with their current states.
    pub async fn batch_job_states(
        &self,
        batch_name: &str,
    ) -> Result<Option<Vec<(Job, Option<JobState>)>>> {
        let Some(batch) = self.batch(batch_name).await? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(batch.jobs.len());
        for (index, job) in batch.jobs.into_iter().enumerate() {
            let state = self.board.job_state(batch_name, index).await?;
            out.push((job, state));
        }
        Ok(Some(out))
    }

    /// Assembled results, once `assemble_batch` has published them.
    pub async fn batch_results(&self, batch_name: &str) -> Result<Option<BatchResults>> {
        match self
            .store
            .load_object(&StoreKey::batch_results(batch_name))
            .await?
        {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    /// A job's persisted console transcript, as text.
    pub async fn job_console_output(
        &self,
        batch_name: &str,
        job_index: usize,
    ) -> Result<Option<String>> {
        let key = StoreKey::job_console_output(batch_name, job_index);
        let Some(path) = self.store.realize_file(&key).await? else {
            return Ok(None);
        };
        Ok(Some(tokio::fs::read_to_string(path).await?))
    }

    /// A locator for a job's transcript without transferring it.
    pub async fn job_console_locator(
        &self,
        batch_name: &str,
        job_index: usize,
    ) -> Result<Option<String>> {
        let key = StoreKey::job_console_output(batch_name, job_index);
        self.store.find_file(&key, false, true).await.map_err(Into::into)
    }

    // --- lifecycle operations ---------------------------------------------

    /// Publish a batch: mint a fresh fencing code, persist the job list, and
    /// optionally queue the batch for a compute resource.
    ///
    /// Fails with [`EngineError::Conflict`] while a prior status is
    /// non-terminal; a batch that reached `finished` or `error` may be
    /// overwritten freely.
    pub async fn set_batch(
        &self,
        batch_name: &str,
        jobs: Vec<Job>,
        compute_resource: Option<&str>,
    ) -> Result<()> {
        if let Some(status) = self.batch_status(batch_name).await? {
            if !status.state.is_terminal() {
                return Err(EngineError::Conflict {
                    name: batch_name.to_string(),
                    status: status.state.to_string(),
                });
            }
        }

        self.set_status(batch_name, BatchStatus::new(BatchState::Initializing))
            .await?;

        let code = format!("batch_code_{}", ulid::Ulid::new());
        self.store
            .set(&StoreKey::batch_code(batch_name), Some(&code), true)
            .await?;

        let batch = Batch { jobs };
        let value = serde_json::to_value(&batch).map_err(batchline_store::StoreError::Json)?;
        self.store
            .save_object(&StoreKey::batch(batch_name), &value)
            .await?;

        self.set_status(batch_name, BatchStatus::new(BatchState::Initialized))
            .await?;
        info!(batch = batch_name, jobs = batch.jobs.len(), "batch published");

        if let Some(resource) = compute_resource {
            self.clear_batch_jobs(batch_name, None).await?;
            queue::enqueue_batch(self.store.as_ref(), resource, batch_name).await?;
            info!(batch = batch_name, resource, "batch queued");
        }
        Ok(())
    }

    /// Prepare selected jobs: run each command's `prepare`, then mark the job
    /// `ready` and release its lock. Jobs already `finished` are skipped
    /// unless `clear_jobs` resets them first.
    ///
    /// Returns `Ok(false)` when the batch definition is not retrievable. A
    /// failing `prepare` marks the batch `error` and aborts the remaining
    /// jobs in this call.
    pub async fn prepare_batch(
        &self,
        batch_name: &str,
        clear_jobs: bool,
        job_index: Option<usize>,
    ) -> Result<bool> {
        let code = self.batch_code(batch_name).await?;

        self.set_status(batch_name, BatchStatus::new(BatchState::Preparing))
            .await?;
        let Some(batch) = self.batch(batch_name).await? else {
            self.set_status(
                batch_name,
                BatchStatus::failed("unable to retrieve batch in prepare"),
            )
            .await?;
            return Ok(false);
        };
        debug!(batch = batch_name, jobs = batch.jobs.len(), "prepare phase");

        let mut prepared = 0;
        for (index, job) in batch.jobs.iter().enumerate() {
            if job_index.is_some_and(|j| j != index) {
                continue;
            }
            self.set_status(batch_name, BatchStatus::at_job(BatchState::Preparing, index))
                .await?;

            let mut state = self.board.job_state(batch_name, index).await?;
            if clear_jobs && state.is_some() {
                self.board.clear(batch_name, index).await?;
                state = None;
            }
            if state == Some(JobState::Finished) {
                continue;
            }

            let Some(command) = self.registry.get(&job.command) else {
                self.set_status(
                    batch_name,
                    BatchStatus::failed_at(
                        index,
                        format!("command not registered: {}", job.command),
                    ),
                )
                .await?;
                return Err(EngineError::UnregisteredCommand(job.command.clone()));
            };

            info!(batch = batch_name, job = %job.label, "preparing job");
            self.check_batch_code(batch_name, &code).await?;
            if let Err(err) = command.prepare(job).await {
                error!(batch = batch_name, job = %job.label, error = %err, "prepare failed");
                self.set_status(
                    batch_name,
                    BatchStatus::failed_at(index, format!("error preparing job {}", job.label)),
                )
                .await?;
                return Err(EngineError::JobFailed {
                    label: job.label.clone(),
                    source: err,
                });
            }
            self.check_batch_code(batch_name, &code).await?;

            self.board
                .set_job_state(batch_name, index, Some(JobState::Ready))
                .await?;
            self.board.clear_lock(batch_name, index).await?;
            prepared += 1;
        }

        self.check_batch_code(batch_name, &code).await?;
        self.set_status(batch_name, BatchStatus::new(BatchState::DonePreparing))
            .await?;
        info!(batch = batch_name, prepared, "prepare phase complete");
        Ok(true)
    }

    /// Run selected jobs that are `ready`, claiming each through the run
    /// lock. Jobs whose claim fails are skipped silently — another worker got
    /// there first.
    ///
    /// A failing `run` marks the job `error`, persists its transcript, and
    /// aborts the remaining jobs in this call; a later call can still process
    /// jobs the failure never touched. Returns `Ok(false)` when the batch
    /// definition is not retrievable.
    pub async fn run_batch(&self, batch_name: &str, job_index: Option<usize>) -> Result<bool> {
        let code = self.batch_code(batch_name).await?;

        let Some(batch) = self.batch(batch_name).await? else {
            return Ok(false);
        };
        debug!(batch = batch_name, jobs = batch.jobs.len(), "run phase");

        let mut ran = 0;
        for (index, job) in batch.jobs.iter().enumerate() {
            if job_index.is_some_and(|j| j != index) {
                continue;
            }
            self.check_batch_code(batch_name, &code).await?;

            if self.board.job_state(batch_name, index).await? != Some(JobState::Ready) {
                continue;
            }
            if !self.board.acquire_lock(batch_name, index).await? {
                debug!(batch = batch_name, job = %job.label, "already claimed, skipping");
                continue;
            }
            info!(batch = batch_name, job = %job.label, "acquired run lock");

            let Some(command) = self.registry.get(&job.command) else {
                return Err(EngineError::UnregisteredCommand(job.command.clone()));
            };

            self.board
                .set_job_state(batch_name, index, Some(JobState::Running))
                .await?;
            info!(batch = batch_name, job = %job.label, "running job");

            let capture = ConsoleCapture::begin().await?;
            let console = capture.console();

            self.check_batch_code(batch_name, &code).await?;
            match command.run(job, &console).await {
                Ok(result) => {
                    self.check_batch_code(batch_name, &code).await?;
                    self.board
                        .set_job_state(batch_name, index, Some(JobState::Finished))
                        .await?;
                    self.store
                        .save_object(&StoreKey::job_result(batch_name, index), &result)
                        .await?;
                    self.store
                        .save_file(
                            &StoreKey::job_console_output(batch_name, index),
                            capture.path(),
                        )
                        .await?;
                    ran += 1;
                }
                Err(err) => {
                    error!(batch = batch_name, job = %job.label, error = %err, "job run failed");
                    self.board
                        .set_job_state(batch_name, index, Some(JobState::Error))
                        .await?;
                    self.store
                        .save_file(
                            &StoreKey::job_console_output(batch_name, index),
                            capture.path(),
                        )
                        .await?;
                    return Err(EngineError::JobFailed {
                        label: job.label.clone(),
                        source: err,
                    });
                }
            }
        }

        self.check_batch_code(batch_name, &code).await?;
        info!(batch = batch_name, ran, "run phase complete");
        Ok(true)
    }

    /// Collect every job's result, in batch order, into a single results
    /// object. Requires all jobs `finished`; otherwise fails with
    /// [`EngineError::NotReady`] naming the offending job.
    pub async fn assemble_batch(&self, batch_name: &str) -> Result<bool> {
        let code = self.batch_code(batch_name).await?;

        self.set_status(batch_name, BatchStatus::new(BatchState::Assembling))
            .await?;
        let Some(batch) = self.batch(batch_name).await? else {
            self.set_status(
                batch_name,
                BatchStatus::failed("unable to retrieve batch in assemble"),
            )
            .await?;
            return Ok(false);
        };
        debug!(batch = batch_name, jobs = batch.jobs.len(), "assemble phase");

        let mut results = Vec::with_capacity(batch.jobs.len());
        for (index, job) in batch.jobs.iter().enumerate() {
            self.check_batch_code(batch_name, &code).await?;
            self.set_status(
                batch_name,
                BatchStatus::at_job(BatchState::Assembling, index),
            )
            .await?;

            let state = self.board.job_state(batch_name, index).await?;
            if state != Some(JobState::Finished) {
                let status = state.map(|s| s.to_string()).unwrap_or_else(|| "absent".into());
                self.set_status(
                    batch_name,
                    BatchStatus::failed_at(
                        index,
                        format!("job {} is not finished (status: {})", job.label, status),
                    ),
                )
                .await?;
                return Err(EngineError::NotReady {
                    label: job.label.clone(),
                    status,
                });
            }

            debug!(batch = batch_name, job = %job.label, "assembling job result");
            let key = StoreKey::job_result(batch_name, index);
            let result = self
                .store
                .load_object(&key)
                .await?
                .ok_or_else(|| EngineError::StoreUnavailable(key.to_string()))?;
            results.push(JobOutcome {
                job: job.clone(),
                result,
            });
        }

        self.check_batch_code(batch_name, &code).await?;
        info!(batch = batch_name, results = results.len(), "publishing assembled results");
        let assembled = BatchResults { results };
        let value = serde_json::to_value(&assembled).map_err(batchline_store::StoreError::Json)?;
        self.store
            .save_object(&StoreKey::batch_results(batch_name), &value)
            .await?;
        self.set_status(batch_name, BatchStatus::new(BatchState::DoneAssembling))
            .await?;
        Ok(true)
    }

    /// Reset state and locks for selected jobs. Returns `Ok(false)` when the
    /// batch definition is not retrievable.
    pub async fn clear_batch_jobs(
        &self,
        batch_name: &str,
        job_index: Option<usize>,
    ) -> Result<bool> {
        let Some(batch) = self.batch(batch_name).await? else {
            return Ok(false);
        };

        let mut cleared = 0;
        for (index, _) in batch.jobs.iter().enumerate() {
            if job_index.is_some_and(|j| j != index) {
                continue;
            }
            if self.board.job_state(batch_name, index).await?.is_some() {
                self.board.clear(batch_name, index).await?;
                cleared += 1;
            }
        }
        info!(batch = batch_name, cleared, "cleared job state");
        Ok(true)
    }

    /// Cancel a non-terminal batch: overwrite the fencing code with a
    /// sentinel and mark the status `error`. Every in-flight fencing check
    /// against the old code will fail from here on; this is the sole
    /// cancellation mechanism.
    pub async fn stop_batch(&self, batch_name: &str) -> Result<()> {
        let Some(status) = self.batch_status(batch_name).await? else {
            return Ok(());
        };
        if status.state.is_terminal() {
            return Ok(());
        }
        warn!(batch = batch_name, state = %status.state, "force stopping batch");
        self.store
            .set(
                &StoreKey::batch_code(batch_name),
                Some(FORCE_STOP_CODE),
                true,
            )
            .await?;
        self.set_status(batch_name, BatchStatus::failed("force stopped"))
            .await?;
        Ok(())
    }
}
