// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage backend for the on-device key/value store.
//!
//! One table holds every persisted value, cache entries and the sync queue
//! document alike:
//! ```sql
//! CREATE TABLE kv_entries (
//!   key TEXT PRIMARY KEY,
//!   value TEXT NOT NULL,     -- JSON document
//!   updated_at INTEGER NOT NULL
//! )
//! ```
//!
//! Each `put` is a single-row upsert, and the database runs in WAL journal
//! mode, so a crash mid-write leaves the previous value intact.

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use super::traits::{KvStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Escape `%`, `_` and the escape char itself for a `LIKE ... ESCAPE '\'` prefix match.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    /// Open (or create) the store with startup-mode retry.
    ///
    /// Accepts any sqlx SQLite URL, e.g. `sqlite://app.db?mode=rwc` or
    /// `sqlite::memory:`.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        // Every connection to an in-memory database gets its own database.
        let max_connections = if connection_string.contains(":memory:") { 1 } else { 4 };

        let pool = retry("sqlite_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// Open a database file, creating it if needed.
    pub async fn open_file(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        Self::new(&url).await
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        // NORMAL is durable across process crashes in WAL mode
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#;

        retry("sqlite_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    fn read_text(row: &sqlx::any::AnyRow, column: &str) -> Result<String, StorageError> {
        row.try_get::<String, _>(column)
            .or_else(|_| {
                row.try_get::<Vec<u8>, _>(column)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            })
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[async_trait]
impl KvStore for SqlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        retry("sqlite_get", &RetryConfig::query(), || async {
            let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            row.map(|r| Self::read_text(&r, "value")).transpose()
        })
        .await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let updated_at = crate::clock::now_millis();

        retry("sqlite_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok::<_, StorageError>(())
        })
        .await?;

        debug!(key, bytes = value.len(), "kv put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        retry("sqlite_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let pattern = like_prefix(prefix);
        retry("sqlite_scan_prefix", &RetryConfig::query(), || async {
            let rows = sqlx::query(
                "SELECT key, value FROM kv_entries WHERE key LIKE ? ESCAPE '\\' ORDER BY key",
            )
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

            let mut pairs = Vec::with_capacity(rows.len());
            for row in rows {
                pairs.push((Self::read_text(&row, "key")?, Self::read_text(&row, "value")?));
            }
            Ok(pairs)
        })
        .await
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let pattern = like_prefix(prefix);
        retry("sqlite_count_prefix", &RetryConfig::query(), || async {
            let row = sqlx::query("SELECT COUNT(*) as cnt FROM kv_entries WHERE key LIKE ? ESCAPE '\\'")
                .bind(&pattern)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            let count: i64 = row.try_get("cnt")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(count as u64)
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let pattern = like_prefix(prefix);
        let removed = retry("sqlite_delete_prefix", &RetryConfig::query(), || async {
            let result = sqlx::query("DELETE FROM kv_entries WHERE key LIKE ? ESCAPE '\\'")
                .bind(&pattern)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok::<_, StorageError>(result.rows_affected())
        })
        .await?;

        debug!(prefix, removed, "kv delete_prefix");
        Ok(removed)
    }
}
