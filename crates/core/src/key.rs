//! Structured store keys.
//!
//! Every datum the engine persists is addressed by a `StoreKey`: a
//! discriminator plus the contextual fields that scope it. Key construction is
//! a pure function of those fields, and no discriminator is reused across
//! semantically distinct data.

use serde::{Deserialize, Serialize};

/// Address of one datum in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum StoreKey {
    /// The published batch definition (object).
    Batch {
        /// Batch name
        batch_name: String,
    },
    /// The fencing code for a batch (scalar).
    BatchCode {
        /// Batch name
        batch_name: String,
    },
    /// The batch status record (object).
    BatchStatus {
        /// Batch name
        batch_name: String,
    },
    /// Assembled results for a batch (object).
    BatchResults {
        /// Batch name
        batch_name: String,
    },
    /// Per-job execution state (scalar).
    JobStatus {
        /// Batch name
        batch_name: String,
        /// Job position within the batch
        job_index: usize,
    },
    /// Per-job run lock; existence means claimed (scalar, atomic create).
    JobLock {
        /// Batch name
        batch_name: String,
        /// Job position within the batch
        job_index: usize,
    },
    /// Per-job result payload (object).
    JobResult {
        /// Batch name
        batch_name: String,
        /// Job position within the batch
        job_index: usize,
    },
    /// Per-job console transcript (file).
    JobConsoleOutput {
        /// Batch name
        batch_name: String,
        /// Job position within the batch
        job_index: usize,
    },
    /// Pending batch names for a compute resource (object).
    ResourceQueue {
        /// Compute resource name
        compute_resource: String,
    },
}

impl StoreKey {
    /// Batch definition key.
    pub fn batch(batch_name: impl Into<String>) -> Self {
        Self::Batch {
            batch_name: batch_name.into(),
        }
    }

    /// Fencing code key.
    pub fn batch_code(batch_name: impl Into<String>) -> Self {
        Self::BatchCode {
            batch_name: batch_name.into(),
        }
    }

    /// Batch status key.
    pub fn batch_status(batch_name: impl Into<String>) -> Self {
        Self::BatchStatus {
            batch_name: batch_name.into(),
        }
    }

    /// Assembled results key.
    pub fn batch_results(batch_name: impl Into<String>) -> Self {
        Self::BatchResults {
            batch_name: batch_name.into(),
        }
    }

    /// Job status key.
    pub fn job_status(batch_name: impl Into<String>, job_index: usize) -> Self {
        Self::JobStatus {
            batch_name: batch_name.into(),
            job_index,
        }
    }

    /// Job lock key.
    pub fn job_lock(batch_name: impl Into<String>, job_index: usize) -> Self {
        Self::JobLock {
            batch_name: batch_name.into(),
            job_index,
        }
    }

    /// Job result key.
    pub fn job_result(batch_name: impl Into<String>, job_index: usize) -> Self {
        Self::JobResult {
            batch_name: batch_name.into(),
            job_index,
        }
    }

    /// Job console transcript key.
    pub fn job_console_output(batch_name: impl Into<String>, job_index: usize) -> Self {
        Self::JobConsoleOutput {
            batch_name: batch_name.into(),
            job_index,
        }
    }

    /// Compute-resource queue key.
    pub fn resource_queue(compute_resource: impl Into<String>) -> Self {
        Self::ResourceQueue {
            compute_resource: compute_resource.into(),
        }
    }

    /// Path-like segments, discriminator first. Backends join these however
    /// suits their addressing scheme.
    pub fn segments(&self) -> Vec<String> {
        match self {
            Self::Batch { batch_name } => vec!["batch".into(), batch_name.clone()],
            Self::BatchCode { batch_name } => vec!["batch_code".into(), batch_name.clone()],
            Self::BatchStatus { batch_name } => vec!["batch_status".into(), batch_name.clone()],
            Self::BatchResults { batch_name } => vec!["batch_results".into(), batch_name.clone()],
            Self::JobStatus {
                batch_name,
                job_index,
            } => vec![
                "job_status".into(),
                batch_name.clone(),
                job_index.to_string(),
            ],
            Self::JobLock {
                batch_name,
                job_index,
            } => vec![
                "job_lock".into(),
                batch_name.clone(),
                job_index.to_string(),
            ],
            Self::JobResult {
                batch_name,
                job_index,
            } => vec![
                "job_result".into(),
                batch_name.clone(),
                job_index.to_string(),
            ],
            Self::JobConsoleOutput {
                batch_name,
                job_index,
            } => vec![
                "job_console_output".into(),
                batch_name.clone(),
                job_index.to_string(),
            ],
            Self::ResourceQueue { compute_resource } => {
                vec!["resource_queue".into(), compute_resource.clone()]
            }
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_per_discriminator() {
        let keys = [
            StoreKey::batch("b1"),
            StoreKey::batch_code("b1"),
            StoreKey::batch_status("b1"),
            StoreKey::batch_results("b1"),
            StoreKey::job_status("b1", 0),
            StoreKey::job_lock("b1", 0),
            StoreKey::job_result("b1", 0),
            StoreKey::job_console_output("b1", 0),
            StoreKey::resource_queue("b1"),
        ];
        let rendered: std::collections::HashSet<String> =
            keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered.len(), keys.len());
    }

    #[test]
    fn key_is_pure_function_of_fields() {
        assert_eq!(StoreKey::job_lock("b1", 3), StoreKey::job_lock("b1", 3));
        assert_ne!(StoreKey::job_lock("b1", 3), StoreKey::job_lock("b1", 4));
        assert_ne!(StoreKey::job_lock("b1", 3), StoreKey::job_status("b1", 3));
    }

    #[test]
    fn display_joins_segments() {
        assert_eq!(StoreKey::job_status("b1", 2).to_string(), "job_status/b1/2");
        assert_eq!(
            StoreKey::resource_queue("gpu-1").to_string(),
            "resource_queue/gpu-1"
        );
    }
}
