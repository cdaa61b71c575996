//! Job status and run locks.

use std::sync::Arc;

use batchline_core::{JobState, StoreKey};
use batchline_store::Store;
use tracing::debug;

use crate::error::Result;

/// Per-job state and lock manager over the shared store.
///
/// Status reads and writes are plain (not atomic): within one process the
/// controller serializes transitions, and across processes the run lock — an
/// atomic create-if-absent — is the actual mutual-exclusion mechanism. Status
/// alone is a hint; correctness depends on the lock.
pub struct JobBoard<S> {
    store: Arc<S>,
}

impl<S> Clone for JobBoard<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> JobBoard<S> {
    /// Create a board over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current state of a job; `None` is the absent (initial) state.
    pub async fn job_state(&self, batch_name: &str, job_index: usize) -> Result<Option<JobState>> {
        let raw = self
            .store
            .get(&StoreKey::job_status(batch_name, job_index))
            .await?;
        Ok(raw.as_deref().and_then(JobState::parse))
    }

    /// Overwrite a job's state; `None` clears it back to absent.
    pub async fn set_job_state(
        &self,
        batch_name: &str,
        job_index: usize,
        state: Option<JobState>,
    ) -> Result<()> {
        debug!(
            batch = batch_name,
            job_index,
            state = state.map(|s| s.as_str()).unwrap_or("absent"),
            "job state"
        );
        self.store
            .set(
                &StoreKey::job_status(batch_name, job_index),
                state.map(|s| s.as_str()),
                true,
            )
            .await?;
        Ok(())
    }

    /// Try to claim the run lock for a job. Returns true iff this caller
    /// created the lock; the token value itself is never read — existence is
    /// what denotes "claimed".
    pub async fn acquire_lock(&self, batch_name: &str, job_index: usize) -> Result<bool> {
        let token = format!("lock_{}", ulid::Ulid::new());
        let acquired = self
            .store
            .set(
                &StoreKey::job_lock(batch_name, job_index),
                Some(&token),
                false,
            )
            .await?;
        Ok(acquired)
    }

    /// Release a job's run lock unconditionally. Locks are never cleared by
    /// normal completion, only by explicit clears like this one.
    pub async fn clear_lock(&self, batch_name: &str, job_index: usize) -> Result<()> {
        self.store
            .set(&StoreKey::job_lock(batch_name, job_index), None, true)
            .await?;
        Ok(())
    }

    /// Reset a job entirely: state back to absent, lock released.
    pub async fn clear(&self, batch_name: &str, job_index: usize) -> Result<()> {
        self.set_job_state(batch_name, job_index, None).await?;
        self.clear_lock(batch_name, job_index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline_store::MemoryStore;

    fn board() -> JobBoard<MemoryStore> {
        JobBoard::new(Arc::new(MemoryStore::new().unwrap()))
    }

    #[tokio::test]
    async fn state_starts_absent_and_round_trips() {
        let board = board();
        assert_eq!(board.job_state("b1", 0).await.unwrap(), None);

        board
            .set_job_state("b1", 0, Some(JobState::Ready))
            .await
            .unwrap();
        assert_eq!(
            board.job_state("b1", 0).await.unwrap(),
            Some(JobState::Ready)
        );

        board.set_job_state("b1", 0, None).await.unwrap();
        assert_eq!(board.job_state("b1", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lock_claims_once_per_epoch() {
        let board = board();

        assert!(board.acquire_lock("b1", 0).await.unwrap());
        assert!(!board.acquire_lock("b1", 0).await.unwrap());

        // Clearing starts a new epoch.
        board.clear_lock("b1", 0).await.unwrap();
        assert!(board.acquire_lock("b1", 0).await.unwrap());
    }

    #[tokio::test]
    async fn locks_are_scoped_per_job() {
        let board = board();
        assert!(board.acquire_lock("b1", 0).await.unwrap());
        assert!(board.acquire_lock("b1", 1).await.unwrap());
        assert!(board.acquire_lock("b2", 0).await.unwrap());
    }

    #[tokio::test]
    async fn clear_resets_state_and_lock() {
        let board = board();
        board
            .set_job_state("b1", 0, Some(JobState::Error))
            .await
            .unwrap();
        assert!(board.acquire_lock("b1", 0).await.unwrap());

        board.clear("b1", 0).await.unwrap();
        assert_eq!(board.job_state("b1", 0).await.unwrap(), None);
        assert!(board.acquire_lock("b1", 0).await.unwrap());
    }
}
