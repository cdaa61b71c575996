//! Directory-backed JSON store.
//!
//! Persists scalars, objects, and files as flat entries under a root
//! directory (`scalars/`, `objects/`, `files/`). The root can sit on any
//! filesystem shared between worker processes; create-if-absent maps onto the
//! filesystem's atomic `create_new` open.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use batchline_core::StoreKey;
use tokio::fs;
use tracing::debug;

use super::{Result, Store};

/// File-based store backend.
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("scalars")).await?;
        fs::create_dir_all(root.join("objects")).await?;
        fs::create_dir_all(root.join("files")).await?;
        Ok(Self { root })
    }

    fn entry_name(key: &StoreKey) -> String {
        key.segments().join("__")
    }

    fn scalar_path(&self, key: &StoreKey) -> PathBuf {
        self.root.join("scalars").join(Self::entry_name(key))
    }

    fn object_path(&self, key: &StoreKey) -> PathBuf {
        self.root
            .join("objects")
            .join(format!("{}.json", Self::entry_name(key)))
    }

    fn file_path(&self, key: &StoreKey) -> PathBuf {
        self.root.join("files").join(Self::entry_name(key))
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        read_if_present(&self.scalar_path(key)).await
    }

    async fn set(&self, key: &StoreKey, value: Option<&str>, overwrite: bool) -> Result<bool> {
        let path = self.scalar_path(key);
        match (value, overwrite) {
            (Some(v), true) => {
                fs::write(&path, v.as_bytes()).await?;
                Ok(true)
            }
            (Some(v), false) => {
                // create_new is the one atomic primitive here: the open fails
                // if any other writer got there first.
                use tokio::io::AsyncWriteExt;
                match fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await
                {
                    Ok(mut file) => {
                        file.write_all(v.as_bytes()).await?;
                        Ok(true)
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        debug!(key = %key, "create-if-absent lost the race");
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (None, _) => {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(true)
            }
        }
    }

    async fn save_object(&self, key: &StoreKey, value: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(self.object_path(key), json.as_bytes()).await?;
        Ok(())
    }

    async fn load_object(&self, key: &StoreKey) -> Result<Option<serde_json::Value>> {
        match read_if_present(&self.object_path(key)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_file(&self, key: &StoreKey, path: &Path) -> Result<()> {
        fs::copy(path, self.file_path(key)).await?;
        Ok(())
    }

    async fn realize_file(&self, key: &StoreKey) -> Result<Option<PathBuf>> {
        let path = self.file_path(key);
        match fs::try_exists(&path).await {
            Ok(true) => Ok(Some(path)),
            Ok(false) => Ok(None),
            Err(e) => Err(e.into()),
        }
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
        // A single-root store has one locator either way: the shared path.
        Ok(self
            .realize_file(key)
            .await?
            .map(|p| p.display().to_string()))
    }
}

async fn read_if_present(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn scalar_set_get_clear() {
        let (_dir, store) = open_store().await;
        let key = StoreKey::batch_code("b1");

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.set(&key, Some("code_1"), true).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some("code_1".to_string()));

        assert!(store.set(&key, Some("code_2"), true).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some("code_2".to_string()));

        assert!(store.set(&key, None, true).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_if_absent_is_exclusive() {
        let (_dir, store) = open_store().await;
        let key = StoreKey::job_lock("b1", 0);

        assert!(store.set(&key, Some("lock_a"), false).await.unwrap());
        assert!(!store.set(&key, Some("lock_b"), false).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some("lock_a".to_string()));

        assert!(store.set(&key, None, true).await.unwrap());
        assert!(store.set(&key, Some("lock_c"), false).await.unwrap());
    }

    #[tokio::test]
    async fn object_round_trip() {
        let (_dir, store) = open_store().await;
        let key = StoreKey::batch("b1");
        let value = serde_json::json!({"jobs": [{"command": "echo", "label": "j0"}]});

        assert_eq!(store.load_object(&key).await.unwrap(), None);
        store.save_object(&key, &value).await.unwrap();
        assert_eq!(store.load_object(&key).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn file_save_realize_find() {
        let (_dir, store) = open_store().await;
        let key = StoreKey::job_console_output("b1", 2);

        let scratch = tempfile::tempdir().unwrap();
        let src = scratch.path().join("transcript.txt");
        tokio::fs::write(&src, "line one\nline two\n").await.unwrap();

        assert_eq!(store.realize_file(&key).await.unwrap(), None);
        assert_eq!(store.find_file(&key, true, true).await.unwrap(), None);

        store.save_file(&key, &src).await.unwrap();

        let local = store.realize_file(&key).await.unwrap().unwrap();
        assert_eq!(
            tokio::fs::read_to_string(&local).await.unwrap(),
            "line one\nline two\n"
        );

        let locator = store.find_file(&key, true, true).await.unwrap().unwrap();
        assert_eq!(locator, local.display().to_string());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide_on_disk() {
        let (_dir, store) = open_store().await;
        store
            .set(&StoreKey::job_status("b1", 0), Some("ready"), true)
            .await
            .unwrap();
        store
            .set(&StoreKey::job_lock("b1", 0), Some("lock_x"), true)
            .await
            .unwrap();

        assert_eq!(
            store.get(&StoreKey::job_status("b1", 0)).await.unwrap(),
            Some("ready".to_string())
        );
        assert_eq!(
            store.get(&StoreKey::job_lock("b1", 0)).await.unwrap(),
            Some("lock_x".to_string())
        );
    }
}
