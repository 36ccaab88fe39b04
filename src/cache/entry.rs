use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One persisted cache value plus the metadata that decides its freshness.
///
/// An entry past `written_at + ttl_ms` is absent for fresh reads but still
/// served by [`super::CacheStore::get_stale`] as a degraded fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Schema/config tag the value was written under
    pub version: String,
    /// Epoch millis
    pub written_at: i64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.written_at.saturating_add(self.ttl_ms.min(i64::MAX as u64) as i64)
    }

    #[must_use]
    pub fn is_fresh_at(&self, now_millis: i64) -> bool {
        now_millis < self.expires_at()
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(crate::clock::now_millis())
    }
}

/// Per-write cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub version: String,
}

impl CacheOptions {
    pub fn new(ttl: Duration, version: impl Into<String>) -> Self {
        Self { ttl, version: version.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(written_at: i64, ttl_ms: u64) -> CacheEntry {
        CacheEntry {
            key: "cache:k".into(),
            value: json!(1),
            version: "1".into(),
            written_at,
            ttl_ms,
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let e = entry(1_000, 500);
        assert!(e.is_fresh_at(1_000));
        assert!(e.is_fresh_at(1_499));
        assert!(!e.is_fresh_at(1_500));
        assert!(!e.is_fresh_at(9_999));
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let e = entry(i64::MAX - 10, u64::MAX);
        assert_eq!(e.expires_at(), i64::MAX);
    }
}
