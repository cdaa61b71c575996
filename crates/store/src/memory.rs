//! In-process store backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use batchline_core::StoreKey;
use tokio::sync::Mutex;

use super::{Result, Store};

#[derive(Default)]
struct Inner {
    scalars: HashMap<String, String>,
    objects: HashMap<String, serde_json::Value>,
    files: HashMap<String, Vec<u8>>,
}

/// In-memory store.
///
/// All state lives behind a single mutex, which makes create-if-absent
/// trivially atomic. Realized files are written into an owned temp directory
/// that lives as long as the store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    realized: tempfile::TempDir,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(Inner::default()),
            realized: tempfile::tempdir()?,
        })
    }

    fn file_name(key: &StoreKey) -> String {
        key.segments().join("__")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.scalars.get(&key.to_string()).cloned())
    }

    async fn set(&self, key: &StoreKey, value: Option<&str>, overwrite: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = key.to_string();
        if !overwrite && inner.scalars.contains_key(&key) {
            return Ok(false);
        }
        match value {
            Some(v) => {
                inner.scalars.insert(key, v.to_string());
            }
            None => {
                inner.scalars.remove(&key);
            }
        }
        Ok(true)
    }

    async fn save_object(&self, key: &StoreKey, value: &serde_json::Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.objects.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn load_object(&self, key: &StoreKey) -> Result<Option<serde_json::Value>> {
        let inner = self.inner.lock().await;
        Ok(inner.objects.get(&key.to_string()).cloned())
    }

    async fn save_file(&self, key: &StoreKey, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let mut inner = self.inner.lock().await;
        inner.files.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn realize_file(&self, key: &StoreKey) -> Result<Option<PathBuf>> {
        let inner = self.inner.lock().await;
        let Some(bytes) = inner.files.get(&key.to_string()) else {
            return Ok(None);
        };
        let path = self.realized.path().join(Self::file_name(key));
        tokio::fs::write(&path, bytes).await?;
        Ok(Some(path))
    }

    async fn find_file(
        &self,
        key: &StoreKey,
        local: bool,
        remote: bool,
    ) -> Result<Option<String>> {
        if !local && !remote {
            return Ok(None);
        }
        let inner = self.inner.lock().await;
        if inner.files.contains_key(&key.to_string()) {
            Ok(Some(format!("memory://{}", key)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn scalar_set_get_clear() {
        let store = MemoryStore::new().unwrap();
        let key = StoreKey::batch_code("b1");

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.set(&key, Some("code_1"), true).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some("code_1".to_string()));

        assert!(store.set(&key, None, true).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_if_absent_is_exclusive() {
        let store = MemoryStore::new().unwrap();
        let key = StoreKey::job_lock("b1", 0);

        assert!(store.set(&key, Some("lock_a"), false).await.unwrap());
        assert!(!store.set(&key, Some("lock_b"), false).await.unwrap());
        // Value is the first writer's.
        assert_eq!(store.get(&key).await.unwrap(), Some("lock_a".to_string()));

        // Clearing reopens the slot.
        assert!(store.set(&key, None, true).await.unwrap());
        assert!(store.set(&key, Some("lock_c"), false).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_admit_exactly_one() {
        let store = Arc::new(MemoryStore::new().unwrap());
        let key = StoreKey::job_lock("b1", 7);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set(&key, Some(&format!("lock_{}", i)), false)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn object_round_trip() {
        let store = MemoryStore::new().unwrap();
        let key = StoreKey::batch_status("b1");
        let value = serde_json::json!({"state": "running", "job_index": 1});

        store.save_object(&key, &value).await.unwrap();
        assert_eq!(store.load_object(&key).await.unwrap(), Some(value));
        assert_eq!(
            store
                .load_object(&StoreKey::batch_status("other"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn file_save_realize_find() {
        let store = MemoryStore::new().unwrap();
        let key = StoreKey::job_console_output("b1", 0);

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("transcript.txt");
        tokio::fs::write(&src, "job output\n").await.unwrap();

        assert_eq!(store.realize_file(&key).await.unwrap(), None);
        store.save_file(&key, &src).await.unwrap();

        let local = store.realize_file(&key).await.unwrap().unwrap();
        let text = tokio::fs::read_to_string(local).await.unwrap();
        assert_eq!(text, "job output\n");

        let locator = store.find_file(&key, true, false).await.unwrap();
        assert!(locator.unwrap().starts_with("memory://"));
        assert_eq!(store.find_file(&key, false, false).await.unwrap(), None);
    }
}
