//! Compute-resource queue helpers.
//!
//! The pending-batch set is a plain object mutated read-modify-write: read,
//! modify locally, write back, then sleep and re-read to see whether the
//! update survived. There is no transaction or compare-and-swap, so
//! concurrent writers can lose updates; the backoff narrows that window
//! without closing it. The loop terminates as soon as the writer observes its
//! own update in the store.

use std::time::Duration;

use batchline_core::{ResourceQueue, StoreKey};
use batchline_store::Store;
use tracing::debug;

use crate::error::{decode, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(200);

async fn load_queue<S: Store>(store: &S, key: &StoreKey) -> Result<ResourceQueue> {
    match store.load_object(key).await? {
        Some(value) => decode(value),
        None => Ok(ResourceQueue::default()),
    }
}

/// Batch names currently pending for `compute_resource`, oldest first.
pub async fn pending_batches<S: Store>(store: &S, compute_resource: &str) -> Result<Vec<String>> {
    let key = StoreKey::resource_queue(compute_resource);
    Ok(load_queue(store, &key).await?.batch_names)
}

/// Add `batch_name` to the pending set. Idempotent.
pub async fn enqueue_batch<S: Store>(
    store: &S,
    compute_resource: &str,
    batch_name: &str,
) -> Result<()> {
    let key = StoreKey::resource_queue(compute_resource);
    loop {
        let mut queue = load_queue(store, &key).await?;
        if queue.batch_names.iter().any(|n| n == batch_name) {
            return Ok(());
        }
        queue.batch_names.push(batch_name.to_string());
        store
            .save_object(&key, &serde_json::to_value(&queue).map_err(batchline_store::StoreError::Json)?)
            .await?;
        debug!(resource = compute_resource, batch = batch_name, "enqueued, verifying");
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Remove `batch_name` from the pending set. Idempotent.
pub async fn evict_batch<S: Store>(
    store: &S,
    compute_resource: &str,
    batch_name: &str,
) -> Result<()> {
    let key = StoreKey::resource_queue(compute_resource);
    loop {
        let mut queue = load_queue(store, &key).await?;
        if !queue.batch_names.iter().any(|n| n == batch_name) {
            return Ok(());
        }
        queue.batch_names.retain(|n| n != batch_name);
        store
            .save_object(&key, &serde_json::to_value(&queue).map_err(batchline_store::StoreError::Json)?)
            .await?;
        debug!(resource = compute_resource, batch = batch_name, "evicted, verifying");
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}
