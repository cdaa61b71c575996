//! Store trait abstraction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use batchline_core::StoreKey;

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// The shared-store contract the engine consumes.
///
/// Scalars are small strings read and written non-atomically, with one
/// exception: `set` with `overwrite = false` must be an atomic create — it
/// succeeds only when no value currently exists. That create-if-absent
/// operation is the sole mutual-exclusion primitive the engine relies on
/// (job run locks); everything else is plain read/write.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a scalar. `None` when absent.
    async fn get(&self, key: &StoreKey) -> Result<Option<String>>;

    /// Write a scalar. `value = None` clears it.
    ///
    /// With `overwrite = false` the write succeeds only if no value exists,
    /// atomically; the return value says whether this caller's write took.
    async fn set(&self, key: &StoreKey, value: Option<&str>, overwrite: bool) -> Result<bool>;

    /// Persist a JSON object.
    async fn save_object(&self, key: &StoreKey, value: &serde_json::Value) -> Result<()>;

    /// Load a JSON object. `None` when absent.
    async fn load_object(&self, key: &StoreKey) -> Result<Option<serde_json::Value>>;

    /// Persist the file at `path` under `key`.
    async fn save_file(&self, key: &StoreKey, path: &Path) -> Result<()>;

    /// Make the file stored under `key` available locally. `None` when absent.
    async fn realize_file(&self, key: &StoreKey) -> Result<Option<PathBuf>>;

    /// Locate the file stored under `key` without transferring it. Returns a
    /// backend-specific locator string. `None` when absent or when neither
    /// `local` nor `remote` lookup is requested.
    async fn find_file(&self, key: &StoreKey, local: bool, remote: bool)
        -> Result<Option<String>>;
}
