use async_trait::async_trait;
use dashmap::DashMap;
use super::traits::{KvStore, StorageError};

/// Volatile store for tests and sessions that don't need restart safety.
pub struct InMemoryStore {
    data: DashMap<String, String>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current key count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let mut pairs: Vec<(String, String)> = self
            .data
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        Ok(self.data.iter().filter(|r| r.key().starts_with(prefix)).count() as u64)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let before = self.data.len();
        self.data.retain(|k, _| !k.starts_with(prefix));
        Ok((before - self.data.len()) as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(key))
    }
}
