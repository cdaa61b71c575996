//! Compute-resource worker loop.
//!
//! A worker polls the pending-batch queue for one named resource and drives
//! each discovered batch through prepare, run, and assemble, re-validating
//! the fencing code between phases. Multiple workers may poll the same
//! resource; the per-job run locks keep them from executing the same job
//! twice.

use std::sync::Arc;
use std::time::Duration;

use batchline_core::{BatchState, BatchStatus, StoreKey};
use batchline_store::Store;
use tracing::{debug, error, info, warn};

use crate::controller::BatchController;
use crate::error::{EngineError, Result};
use crate::queue;

/// How a worker runs the run phase and how often it polls.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Shell prefix for spawning run sub-invocations as subprocesses (for
    /// example `nice -n 10` or a scheduler wrapper). When unset, run
    /// invocations stay in-process as spawned tasks.
    pub run_prefix: Option<String>,

    /// Number of concurrent run-phase invocations. Each invocation walks the
    /// whole batch against the shared lock, so at most one executes any given
    /// job; the rest find it already claimed. Defaults to 1.
    pub parallelism: Option<usize>,

    /// Sleep between poll cycles.
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            run_prefix: None,
            parallelism: None,
            poll_interval: Duration::from_secs(4),
        }
    }
}

/// Poll-and-handle loop for one compute resource.
pub struct ResourceWorker<S> {
    controller: Arc<BatchController<S>>,
    store: Arc<S>,
    resource: String,
    options: WorkerOptions,
}

impl<S: Store + 'static> ResourceWorker<S> {
    /// Create a worker for `resource`.
    pub fn new(
        controller: Arc<BatchController<S>>,
        store: Arc<S>,
        resource: impl Into<String>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            controller,
            store,
            resource: resource.into(),
            options,
        }
    }

    /// Poll the resource queue forever, handling one batch per cycle
    /// round-robin. Never returns; the process is stopped externally.
    pub async fn listen(&self) {
        info!(resource = %self.resource, "listening as compute resource");
        let mut index = 0usize;
        loop {
            match queue::pending_batches(self.store.as_ref(), &self.resource).await {
                Ok(batch_names) if !batch_names.is_empty() => {
                    if index >= batch_names.len() {
                        index = 0;
                    }
                    let batch_name = batch_names[index].clone();
                    self.try_handle(&batch_name).await;
                    index += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(resource = %self.resource, error = %e, "failed to read pending batches"),
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Attempt to drive one batch through all three phases.
    ///
    /// Returns false without evicting when the batch object is not yet
    /// visible in the store — that is "not ready", not an error. Any failure
    /// inside the phases is written to the batch status and swallowed; on
    /// both success and failure the batch leaves the pending queue.
    pub async fn try_handle(&self, batch_name: &str) -> bool {
        match self.controller.batch(batch_name).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(batch = batch_name, "batch object not visible yet, leaving queued");
                return false;
            }
            Err(e) => {
                warn!(batch = batch_name, error = %e, "could not retrieve batch, leaving queued");
                return false;
            }
        }

        let outcome = self.handle(batch_name).await;
        if let Err(err) = &outcome {
            error!(batch = batch_name, error = %err, "error handling batch");
            if let Err(e) = self
                .controller
                .set_status(
                    batch_name,
                    BatchStatus::failed(format!("error handling batch: {}", err)),
                )
                .await
            {
                warn!(batch = batch_name, error = %e, "failed to record batch error status");
            }
        }
        if let Err(e) = queue::evict_batch(self.store.as_ref(), &self.resource, batch_name).await {
            warn!(batch = batch_name, error = %e, "failed to evict batch from queue");
        }

        match outcome {
            Ok(()) => {
                info!(batch = batch_name, "batch handled");
                true
            }
            Err(_) => false,
        }
    }

    async fn handle(&self, batch_name: &str) -> Result<()> {
        let code = self.controller.batch_code(batch_name).await?;

        self.controller
            .set_status(batch_name, BatchStatus::new(BatchState::Preparing))
            .await?;
        if !self.controller.prepare_batch(batch_name, true, None).await? {
            return Err(EngineError::StoreUnavailable(
                StoreKey::batch(batch_name).to_string(),
            ));
        }
        self.controller.check_batch_code(batch_name, &code).await?;

        self.controller
            .set_status(batch_name, BatchStatus::new(BatchState::Running))
            .await?;
        self.run_phase(batch_name).await?;
        self.controller.check_batch_code(batch_name, &code).await?;

        self.controller
            .set_status(batch_name, BatchStatus::new(BatchState::Assembling))
            .await?;
        if !self.controller.assemble_batch(batch_name).await? {
            return Err(EngineError::StoreUnavailable(
                StoreKey::batch(batch_name).to_string(),
            ));
        }
        self.controller.check_batch_code(batch_name, &code).await?;

        self.controller
            .set_status(batch_name, BatchStatus::new(BatchState::Finished))
            .await?;
        Ok(())
    }

    /// Run the run phase, fanned out across `parallelism` invocations. Each
    /// invocation executes the full phase against the shared lock manager, so
    /// fan-out is safe: a job is executed by whichever invocation claims it.
    async fn run_phase(&self, batch_name: &str) -> Result<()> {
        let workers = self.options.parallelism.unwrap_or(1).max(1);

        if let Some(prefix) = &self.options.run_prefix {
            info!(batch = batch_name, workers, "running batch via subprocesses");
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                handles.push(tokio::spawn(run_subprocess(
                    prefix.clone(),
                    batch_name.to_string(),
                )));
            }
            for handle in handles {
                handle
                    .await
                    .map_err(|e| EngineError::Internal(format!("run worker panicked: {}", e)))??;
            }
            return Ok(());
        }

        let missing = || EngineError::StoreUnavailable(StoreKey::batch(batch_name).to_string());

        if workers == 1 {
            if !self.controller.run_batch(batch_name, None).await? {
                return Err(missing());
            }
            return Ok(());
        }

        info!(batch = batch_name, workers, "running batch with in-process fan-out");
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let controller = self.controller.clone();
            let batch_name = batch_name.to_string();
            handles.push(tokio::spawn(async move {
                controller.run_batch(&batch_name, None).await
            }));
        }
        for handle in handles {
            let ran = handle
                .await
                .map_err(|e| EngineError::Internal(format!("run worker panicked: {}", e)))??;
            if !ran {
                return Err(missing());
            }
        }
        Ok(())
    }
}

/// Spawn one run-phase invocation as `{prefix} {current exe} run --batch
/// {name}` under a shell.
async fn run_subprocess(prefix: String, batch_name: String) -> Result<()> {
    let exe = std::env::current_exe()?;
    let command_line = format!(
        "{} {} run --batch {}",
        prefix.trim(),
        exe.display(),
        batch_name
    );
    info!(command = %command_line, "spawning run subprocess");

    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command_line)
        .status()
        .await?;
    if !status.success() {
        return Err(EngineError::Internal(format!(
            "run subprocess for batch {} exited with {}",
            batch_name, status
        )));
    }
    Ok(())
}
