// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheOptions};
use super::keys::CACHE_PREFIX;
use crate::storage::traits::{KvStore, StorageError};

/// A value read back from the cache, with how fresh it was.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub written_at: i64,
    /// TTL had elapsed when read
    pub stale: bool,
}

/// Diagnostics for the "Storage" screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub entries: u64,
    pub fresh: u64,
    pub expired: u64,
    /// Sum of stored document lengths
    pub approx_bytes: u64,
    pub version: String,
    pub oldest_written_at: Option<i64>,
    pub newest_written_at: Option<i64>,
}

/// TTL/version-aware view over the shared key/value store.
///
/// Writes are whole-document overwrites per key (last write wins). There is
/// no in-memory layer: every read goes to the store, so two handles over the
/// same store always agree.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KvStore>,
    version: String,
}

impl CacheStore {
    /// `version` is the tag reads expect; entries written under any other
    /// tag read as absent.
    pub fn new(store: Arc<dyn KvStore>, version: impl Into<String>) -> Self {
        Self {
            store,
            version: version.into(),
        }
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Write options using this store's version tag.
    #[must_use]
    pub fn options(&self, ttl: std::time::Duration) -> CacheOptions {
        CacheOptions::new(ttl, self.version.clone())
    }

    /// Fresh read: absent once the TTL elapsed or the version differs.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.load(key).await? {
            Some(cached) if !cached.stale => {
                crate::metrics::record_cache_lookup("hit");
                Ok(Some(cached.value))
            }
            Some(_) => {
                crate::metrics::record_cache_lookup("stale");
                Ok(None)
            }
            None => {
                crate::metrics::record_cache_lookup("miss");
                Ok(None)
            }
        }
    }

    /// Degraded read: any version-matched entry, expired or not.
    pub async fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>, StorageError> {
        let cached = self.load(key).await?;
        let outcome = match &cached {
            Some(c) if c.stale => "stale",
            Some(_) => "hit",
            None => "miss",
        };
        crate::metrics::record_cache_lookup(outcome);
        Ok(cached)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: &CacheOptions) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|e| StorageError::corruption(key, e))?;
        self.write_entry(CacheEntry {
            key: key.to_string(),
            value,
            version: options.version.clone(),
            written_at: crate::clock::now_millis(),
            ttl_ms: options.ttl.as_millis().min(u64::MAX as u128) as u64,
        })
        .await
    }

    /// Read-modify-write an existing entry in place.
    ///
    /// `written_at` and `ttl_ms` are preserved, so splicing a confirmed
    /// record into a cached list never makes the rest of the list look
    /// fresher than it is. Returns `false` (and writes nothing) when there
    /// is no version-matched entry to patch.
    pub async fn patch<T, F>(&self, key: &str, f: F) -> Result<bool, StorageError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let Some(mut entry) = self.load_entry(key).await? else {
            return Ok(false);
        };
        let mut value: T = match serde_json::from_value(entry.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value has unexpected shape, dropping");
                self.store.delete(key).await?;
                return Ok(false);
            }
        };
        f(&mut value);
        entry.value = serde_json::to_value(&value).map_err(|e| StorageError::corruption(key, e))?;
        self.write_entry(entry).await?;
        Ok(true)
    }

    /// [`patch`](Self::patch) every version-matched entry under `prefix`.
    ///
    /// `f` returns whether it changed the value; unchanged entries and
    /// entries of another shape are left alone. Returns how many entries
    /// were rewritten.
    pub async fn patch_prefix<T, F>(&self, prefix: &str, mut f: F) -> Result<u64, StorageError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T) -> bool,
    {
        let mut patched = 0;
        for (key, raw) in self.store.scan_prefix(prefix).await? {
            let Ok(mut entry) = serde_json::from_str::<CacheEntry>(&raw) else {
                continue;
            };
            if entry.version != self.version {
                continue;
            }
            let Ok(mut value) = serde_json::from_value::<T>(entry.value.clone()) else {
                continue;
            };
            if !f(&mut value) {
                continue;
            }
            entry.value = serde_json::to_value(&value).map_err(|e| StorageError::corruption(&key, e))?;
            self.write_entry(entry).await?;
            patched += 1;
        }
        Ok(patched)
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(key).await
    }

    /// Drop every cache entry. The sync queue lives outside the cache
    /// namespace and is untouched.
    pub async fn clear(&self) -> Result<u64, StorageError> {
        let removed = self.store.delete_prefix(CACHE_PREFIX).await?;
        debug!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Number of stored entries, fresh or not.
    pub async fn size(&self) -> Result<u64, StorageError> {
        self.store.count_prefix(CACHE_PREFIX).await
    }

    pub async fn info(&self) -> Result<CacheInfo, StorageError> {
        let now = crate::clock::now_millis();
        let mut info = CacheInfo {
            entries: 0,
            fresh: 0,
            expired: 0,
            approx_bytes: 0,
            version: self.version.clone(),
            oldest_written_at: None,
            newest_written_at: None,
        };

        for (key, raw) in self.store.scan_prefix(CACHE_PREFIX).await? {
            info.entries += 1;
            info.approx_bytes += raw.len() as u64;
            let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) else {
                debug!(key = %key, "Unreadable cache entry counted as expired");
                info.expired += 1;
                continue;
            };
            if entry.version == self.version && entry.is_fresh_at(now) {
                info.fresh += 1;
            } else {
                info.expired += 1;
            }
            info.oldest_written_at = Some(info.oldest_written_at.map_or(entry.written_at, |t| t.min(entry.written_at)));
            info.newest_written_at = Some(info.newest_written_at.map_or(entry.written_at, |t| t.max(entry.written_at)));
        }
        Ok(info)
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>, StorageError> {
        let Some(entry) = self.load_entry(key).await? else {
            return Ok(None);
        };
        let stale = !entry.is_fresh();
        let written_at = entry.written_at;
        match serde_json::from_value(entry.value) {
            Ok(value) => Ok(Some(Cached { value, written_at, stale })),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value has unexpected shape, treating as absent");
                Ok(None)
            }
        }
    }

    /// Version-matched raw entry. Corrupt documents are removed and read as absent.
    async fn load_entry(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cache entry, removing");
                self.store.delete(key).await?;
                return Ok(None);
            }
        };
        if entry.version != self.version {
            debug!(key = %key, found = %entry.version, expected = %self.version, "Cache version mismatch");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn write_entry(&self, entry: CacheEntry) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&entry).map_err(|e| StorageError::corruption(&entry.key, e))?;
        self.store.put(&entry.key, &raw).await
    }
}
