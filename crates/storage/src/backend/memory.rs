//! In-memory storage backend for testing.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{check_key, ContentStorage};
use crate::error::Result;

/// Map-backed storage. All data is lost when the backend is dropped.
#[derive(Default)]
pub struct InMemoryStorage {
    categories: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStorage {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored values across all categories (for tests).
    pub fn len(&self) -> usize {
        self.categories.read().values().map(BTreeMap::len).sum()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStorage for InMemoryStorage {
    async fn put(&self, category: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        check_key(category)?;
        check_key(key)?;
        self.categories
            .write()
            .entry(category.to_string())
            .or_default()
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, category: &str, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(category)?;
        check_key(key)?;
        Ok(self.categories.read().get(category).and_then(|c| c.get(key)).cloned())
    }

    async fn exists(&self, category: &str, key: &str) -> Result<bool> {
        check_key(category)?;
        check_key(key)?;
        Ok(self.categories.read().get(category).is_some_and(|c| c.contains_key(key)))
    }

    async fn delete(&self, category: &str, key: &str) -> Result<()> {
        check_key(category)?;
        check_key(key)?;
        if let Some(c) = self.categories.write().get_mut(category) {
            c.remove(key);
        }
        Ok(())
    }

    async fn list(&self, category: &str) -> Result<Vec<String>> {
        check_key(category)?;
        Ok(self
            .categories
            .read()
            .get(category)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_round_trip() {
        let storage = InMemoryStorage::new();
        storage.put("contents", "k", b"v".to_vec()).await.unwrap();
        assert_eq!(storage.get("contents", "k").await.unwrap(), Some(b"v".to_vec()));
        assert!(storage.exists("contents", "k").await.unwrap());
        assert_eq!(storage.len(), 1);

        storage.delete("contents", "k").await.unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.get("contents", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn categories_are_isolated() {
        let storage = InMemoryStorage::new();
        storage.put("contents", "k", b"blob".to_vec()).await.unwrap();
        storage.put("proofs", "k", b"audit".to_vec()).await.unwrap();
        assert_eq!(storage.get("contents", "k").await.unwrap(), Some(b"blob".to_vec()));
        assert_eq!(storage.get("proofs", "k").await.unwrap(), Some(b"audit".to_vec()));
        assert_eq!(storage.list("contents").await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn list_is_ordered() {
        let storage = InMemoryStorage::new();
        storage.put("c", "b", vec![]).await.unwrap();
        storage.put("c", "a", vec![]).await.unwrap();
        assert_eq!(storage.list("c").await.unwrap(), vec!["a", "b"]);
    }
}
