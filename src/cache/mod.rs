//! Persistent, versioned, TTL-bound cache.
//!
//! Entries are JSON documents in the shared [`KvStore`](crate::storage::traits::KvStore)
//! under the `cache:` namespace. A fresh read ([`CacheStore::get`]) honours
//! both TTL and version; the degraded read ([`CacheStore::get_stale`]) only
//! honours version and is what the resolver falls back to when the network
//! is gone.

mod entry;
pub mod keys;
mod store;

pub use entry::{CacheEntry, CacheOptions};
pub use store::{CacheInfo, CacheStore, Cached};
