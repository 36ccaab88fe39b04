// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stale-if-error reads.
//!
//! ```text
//! online:   fetch (30s bound) ──ok──► write cache ──► Network
//!                 │
//!                 └─network/server error──► cache (any age) ──► Cache{stale}
//!                                                 └─empty──► original error
//! offline:  cache (any age) ──► Cache{stale}  |  empty ──► NETWORK_ERROR
//! ```
//!
//! A live result always wins over the cache. Auth and validation failures
//! are never masked by cached data. A guarded fetch whose answer was
//! superseded locally while in flight is returned but not cached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheOptions, CacheStore};
use crate::metrics::LatencyTimer;
use crate::network::NetworkMonitor;
use crate::remote::{with_timeout, RemoteError};

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    Cache { stale: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Resolved<T> {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, Source::Cache { .. })
    }
}

#[derive(Clone)]
pub struct Resolver {
    cache: CacheStore,
    monitor: Arc<NetworkMonitor>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(cache: CacheStore, monitor: Arc<NetworkMonitor>, timeout: Duration) -> Self {
        Self { cache, monitor, timeout }
    }

    /// Fetch with cache fallback, returning just the value.
    pub async fn get_with_fallback<T, F, Fut>(
        &self,
        key: &str,
        options: &CacheOptions,
        fetcher: F,
    ) -> Result<T, RemoteError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.resolve(key, options, fetcher).await.map(|r| r.value)
    }

    pub async fn resolve<T, F, Fut>(
        &self,
        key: &str,
        options: &CacheOptions,
        fetcher: F,
    ) -> Result<Resolved<T>, RemoteError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.resolve_guarded(key, options, fetcher, || false).await
    }

    /// [`resolve`](Self::resolve), but the fetched value is only written to
    /// the cache if `is_superseded` is false once it arrives.
    pub async fn resolve_guarded<T, F, Fut, S>(
        &self,
        key: &str,
        options: &CacheOptions,
        fetcher: F,
        is_superseded: S,
    ) -> Result<Resolved<T>, RemoteError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        S: Fn() -> bool,
    {
        if !self.monitor.is_available() {
            debug!(key = %key, "Offline, reading from cache");
            return match self.fallback(key).await {
                Some(resolved) => Ok(resolved),
                None => {
                    crate::metrics::record_resolve("error");
                    Err(RemoteError::offline())
                }
            };
        }

        let result = {
            let _timer = LatencyTimer::new();
            with_timeout(self.timeout, "resolver_fetch", fetcher()).await
        };

        match result {
            Ok(value) => {
                if is_superseded() {
                    debug!(key = %key, "Local state changed during fetch, not caching");
                } else if let Err(e) = self.cache.set(key, &value, options).await {
                    warn!(key = %key, error = %e, "Failed to cache fetched value");
                }
                crate::metrics::record_resolve("network");
                Ok(Resolved {
                    value,
                    source: Source::Network,
                })
            }
            Err(err) if err.is_retryable() => match self.fallback(key).await {
                Some(resolved) => {
                    debug!(key = %key, error = %err, "Fetch failed, serving cached value");
                    Ok(resolved)
                }
                None => {
                    crate::metrics::record_resolve("error");
                    crate::metrics::record_error("resolver", "fetch", &err.kind().to_string());
                    Err(err)
                }
            },
            Err(err) => {
                crate::metrics::record_resolve("error");
                crate::metrics::record_error("resolver", "fetch", &err.kind().to_string());
                Err(err)
            }
        }
    }

    async fn fallback<T: DeserializeOwned>(&self, key: &str) -> Option<Resolved<T>> {
        match self.cache.get_stale::<T>(key).await {
            Ok(Some(cached)) => {
                crate::metrics::record_resolve("fallback");
                Some(Resolved {
                    value: cached.value,
                    source: Source::Cache { stale: cached.stale },
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache unreadable during fallback");
                None
            }
        }
    }
}
