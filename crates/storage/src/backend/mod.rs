//! Storage backend abstraction.
//!
//! The trait abstracts the underlying store so the engine can run against
//! the filesystem in production and against memory in tests. Implementations
//! must be safe for concurrent per-key access; the engine serializes
//! conflicting writers above this layer.

mod file;
mod memory;

pub use file::FileSystemStorage;
pub use memory::InMemoryStorage;

use async_trait::async_trait;

use crate::error::Result;

/// Opaque `category + key → bytes` store.
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Stores `bytes` under `category/key`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if the write
    /// fails, or [`StorageError::InvalidKey`](crate::StorageError::InvalidKey)
    /// for keys the backend cannot represent.
    async fn put(&self, category: &str, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Reads the bytes under `category/key`, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if the read
    /// fails for a reason other than absence.
    async fn get(&self, category: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Checks whether `category/key` holds a value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if the probe
    /// fails.
    async fn exists(&self, category: &str, key: &str) -> Result<bool>;

    /// Deletes `category/key`. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if the removal
    /// fails.
    async fn delete(&self, category: &str, key: &str) -> Result<()>;

    /// Lists the keys present in a category. An absent category is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if the listing
    /// fails.
    async fn list(&self, category: &str) -> Result<Vec<String>>;
}

/// Rejects keys and categories that would escape a flat namespace.
pub(crate) fn check_key(key: &str) -> Result<()> {
    use crate::error::InvalidKeySnafu;
    use snafu::ensure;

    ensure!(
        !key.is_empty(),
        InvalidKeySnafu { key: key.to_string(), reason: "must not be empty".to_string() }
    );
    ensure!(
        !key.contains(['/', '\\']) && key != "." && key != "..",
        InvalidKeySnafu {
            key: key.to_string(),
            reason: "must not contain path separators".to_string(),
        }
    );
    Ok(())
}
