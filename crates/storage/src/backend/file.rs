//! Filesystem storage backend.
//!
//! One directory per category under a root folder; one file per key.
//! Writes go through a temp file + rename so a crashed write never leaves a
//! half-written blob behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::ResultExt;

use super::{check_key, ContentStorage};
use crate::error::{IoSnafu, Result};

/// Filesystem-backed storage rooted at a configured folder.
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Opens (and creates if needed) a storage root.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if the root
    /// directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).context(IoSnafu {
            category: root.display().to_string(),
            key: String::new(),
        })?;
        Ok(Self { root })
    }

    /// Returns the root folder this backend writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, category: &str, key: &str) -> Result<PathBuf> {
        check_key(category)?;
        check_key(key)?;
        Ok(self.root.join(category).join(key))
    }
}

#[async_trait]
impl ContentStorage for FileSystemStorage {
    async fn put(&self, category: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(category, key)?;
        let dir = self.root.join(category);
        let ctx = IoSnafu { category, key };

        tokio::fs::create_dir_all(&dir).await.context(ctx)?;

        // Temp file + rename keeps readers from ever observing partial bytes.
        let tmp = dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&tmp, &bytes).await.context(ctx)?;
        tokio::fs::rename(&tmp, &path).await.context(ctx)?;
        Ok(())
    }

    async fn get(&self, category: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(category, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(IoSnafu { category, key }),
        }
    }

    async fn exists(&self, category: &str, key: &str) -> Result<bool> {
        let path = self.path_for(category, key)?;
        tokio::fs::try_exists(&path).await.context(IoSnafu { category, key })
    }

    async fn delete(&self, category: &str, key: &str) -> Result<()> {
        let path = self.path_for(category, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(IoSnafu { category, key }),
        }
    }

    async fn list(&self, category: &str) -> Result<Vec<String>> {
        check_key(category)?;
        let dir = self.root.join(category);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(IoSnafu { category, key: String::new() }),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu { category, key: String::new() })? {
            if let Some(name) = entry.file_name().to_str() {
                // Skip in-flight temp files.
                if !name.starts_with('.') {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn storage() -> (tempfile::TempDir, FileSystemStorage) {
        let dir = tempdir().expect("create temp dir");
        let storage = FileSystemStorage::open(dir.path().join("storage")).expect("open storage");
        (dir, storage)
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (_dir, storage) = storage();
        storage.put("contents", "bafyabc", b"payload".to_vec()).await.unwrap();
        assert_eq!(storage.get("contents", "bafyabc").await.unwrap(), Some(b"payload".to_vec()));
        assert!(storage.exists("contents", "bafyabc").await.unwrap());
    }

    #[tokio::test]
    async fn get_absent_returns_none() {
        let (_dir, storage) = storage();
        assert_eq!(storage.get("contents", "missing").await.unwrap(), None);
        assert!(!storage.exists("contents", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let (_dir, storage) = storage();
        storage.put("proofs", "id", b"old".to_vec()).await.unwrap();
        storage.put("proofs", "id", b"new".to_vec()).await.unwrap();
        assert_eq!(storage.get("proofs", "id").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, storage) = storage();
        storage.put("contents", "bafyabc", b"x".to_vec()).await.unwrap();
        storage.delete("contents", "bafyabc").await.unwrap();
        assert!(!storage.exists("contents", "bafyabc").await.unwrap());
        storage.delete("contents", "bafyabc").await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_sorted_keys() {
        let (_dir, storage) = storage();
        storage.put("pointers-scene", "0,1", b"e1".to_vec()).await.unwrap();
        storage.put("pointers-scene", "0,0", b"e2".to_vec()).await.unwrap();
        assert_eq!(storage.list("pointers-scene").await.unwrap(), vec!["0,0", "0,1"]);
        assert!(storage.list("pointers-profile").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_dir, storage) = storage();
        assert!(storage.put("contents", "../evil", b"x".to_vec()).await.is_err());
        assert!(storage.get("..", "key").await.is_err());
    }
}
