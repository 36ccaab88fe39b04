use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt value under '{key}': {reason}")]
    Corruption { key: String, reason: String },
}

impl StorageError {
    pub(crate) fn corruption(key: &str, err: impl std::fmt::Display) -> Self {
        Self::Corruption {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Durable key/value storage shared by the cache and the sync queue.
///
/// Values are JSON documents stored as text. Every `put` is a full
/// overwrite of one key; implementations must make that single-key write
/// atomic so a crash leaves either the old or the new value.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError>;

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StorageError>;

    /// Delete every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
