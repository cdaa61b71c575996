//! Batchline CLI - batch lifecycle coordination over a shared store.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use batchline_core::Job;
use batchline_engine::{BatchController, CommandRegistry, ResourceWorker, WorkerOptions};
use batchline_store::JsonStore;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "batchline")]
#[command(about = "Batch lifecycle coordination over a shared store", long_about = None)]
struct Cli {
    /// Store root directory
    #[arg(long, global = true, default_value = ".batchline")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a batch from a JSON job list
    Set {
        /// Batch name
        #[arg(long)]
        batch: String,
        /// Path to a JSON array of jobs
        #[arg(long)]
        jobs: PathBuf,
        /// Queue the batch for a compute resource
        #[arg(long)]
        resource: Option<String>,
    },
    /// Prepare jobs and mark them ready
    Prepare {
        /// Batch name
        #[arg(long)]
        batch: String,
        /// Reset job state and locks before preparing
        #[arg(long)]
        clear_jobs: bool,
        /// Only this job index
        #[arg(long)]
        job: Option<usize>,
    },
    /// Run ready jobs, claiming each through its run lock
    Run {
        /// Batch name
        #[arg(long)]
        batch: String,
        /// Only this job index
        #[arg(long)]
        job: Option<usize>,
    },
    /// Assemble all job results into the batch results object
    Assemble {
        /// Batch name
        #[arg(long)]
        batch: String,
    },
    /// Clear job state and locks
    Clear {
        /// Batch name
        #[arg(long)]
        batch: String,
        /// Only this job index
        #[arg(long)]
        job: Option<usize>,
    },
    /// Force stop a batch by invalidating its code
    Stop {
        /// Batch name
        #[arg(long)]
        batch: String,
    },
    /// Show batch status and per-job states
    Status {
        /// Batch name
        #[arg(long)]
        batch: String,
    },
    /// Print assembled results as JSON
    Results {
        /// Batch name
        #[arg(long)]
        batch: String,
    },
    /// Print a job's console transcript
    Console {
        /// Batch name
        #[arg(long)]
        batch: String,
        /// Job index
        #[arg(long)]
        job: usize,
        /// Print a locator instead of the content
        #[arg(long)]
        locator: bool,
    },
    /// Poll a compute resource queue and handle pending batches
    Listen {
        /// Compute resource name
        #[arg(long)]
        resource: String,
        /// Shell prefix for run subprocesses; runs stay in-process when unset
        #[arg(long)]
        run_prefix: Option<String>,
        /// Concurrent run invocations per batch
        #[arg(long)]
        parallelism: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = Arc::new(JsonStore::new(&cli.store).await?);
    let registry = Arc::new(CommandRegistry::new());
    commands::register_builtins(&registry);
    let controller = Arc::new(BatchController::new(store.clone(), registry));

    match cli.command {
        Commands::Set {
            batch,
            jobs,
            resource,
        } => {
            let text = tokio::fs::read_to_string(&jobs).await?;
            let jobs: Vec<Job> = serde_json::from_str(&text)?;
            let count = jobs.len();
            controller.set_batch(&batch, jobs, resource.as_deref()).await?;
            println!("Published batch {} ({} jobs)", batch, count);
        }
        Commands::Prepare {
            batch,
            clear_jobs,
            job,
        } => {
            if !controller.prepare_batch(&batch, clear_jobs, job).await? {
                bail!("batch not found: {}", batch);
            }
            println!("Prepared batch {}", batch);
        }
        Commands::Run { batch, job } => {
            if !controller.run_batch(&batch, job).await? {
                bail!("batch not found: {}", batch);
            }
            println!("Ran batch {}", batch);
        }
        Commands::Assemble { batch } => {
            if !controller.assemble_batch(&batch).await? {
                bail!("batch not found: {}", batch);
            }
            println!("Assembled batch {}", batch);
        }
        Commands::Clear { batch, job } => {
            if !controller.clear_batch_jobs(&batch, job).await? {
                bail!("batch not found: {}", batch);
            }
            println!("Cleared batch {}", batch);
        }
        Commands::Stop { batch } => {
            controller.stop_batch(&batch).await?;
            println!("Stopped batch {}", batch);
        }
        Commands::Status { batch } => {
            let Some(status) = controller.batch_status(&batch).await? else {
                println!("Batch {} has no status", batch);
                return Ok(());
            };
            println!("Batch {}: {}", batch, status.state);
            if let Some(index) = status.job_index {
                println!("  At job: {}", index);
            }
            if let Some(error) = &status.error {
                println!("  Error: {}", error);
            }
            println!("  Updated: {}", status.updated_at);

            if let Some(states) = controller.batch_job_states(&batch).await? {
                println!("Jobs ({})", states.len());
                for (index, (job, state)) in states.iter().enumerate() {
                    let state = state
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "absent".into());
                    println!("  {} | {} | {} - {}", index, state, job.command, job.label);
                }
            }
        }
        Commands::Results { batch } => {
            let Some(results) = controller.batch_results(&batch).await? else {
                bail!("no results for batch: {}", batch);
            };
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Console {
            batch,
            job,
            locator,
        } => {
            if locator {
                let Some(found) = controller.job_console_locator(&batch, job).await? else {
                    bail!("no console output for batch {} job {}", batch, job);
                };
                println!("{}", found);
            } else {
                let Some(text) = controller.job_console_output(&batch, job).await? else {
                    bail!("no console output for batch {} job {}", batch, job);
                };
                print!("{}", text);
            }
        }
        Commands::Listen {
            resource,
            run_prefix,
            parallelism,
        } => {
            let worker = ResourceWorker::new(
                controller,
                store,
                resource,
                WorkerOptions {
                    run_prefix,
                    parallelism,
                    ..WorkerOptions::default()
                },
            );
            worker.listen().await;
        }
    }

    Ok(())
}
