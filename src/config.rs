//! Configuration for the offline sync engine.
//!
//! # Example
//!
//! ```
//! use nutrisync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.fetch_timeout_ms, 30_000);
//! assert_eq!(config.queue_max_items, 500);
//!
//! // Partial override from JSON, everything else defaulted
//! let config: SyncConfig = serde_json::from_str(r#"{
//!     "storage_url": "sqlite://nutrisync.db?mode=rwc",
//!     "queue_max_items": 50
//! }"#).unwrap();
//! assert_eq!(config.queue_max_items, 50);
//! assert_eq!(config.search_debounce_ms, 300);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::resilience::retry::RetryConfig;

/// Configuration for the sync engine.
///
/// All fields have sensible defaults. Set `storage_url` to persist the
/// cache and the offline queue across restarts.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// SQLite connection string (e.g., "sqlite://nutrisync.db?mode=rwc").
    /// `None` keeps everything in memory.
    #[serde(default)]
    pub storage_url: Option<String>,

    /// Cache schema tag; entries written under another tag read as absent
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Deadline for every remote call (default: 30s)
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Per-entity cache TTLs
    #[serde(default = "default_profile_ttl_ms")]
    pub profile_ttl_ms: u64,
    #[serde(default = "default_food_entries_ttl_ms")]
    pub food_entries_ttl_ms: u64,
    #[serde(default = "default_search_ttl_ms")]
    pub search_ttl_ms: u64,
    #[serde(default = "default_custom_foods_ttl_ms")]
    pub custom_foods_ttl_ms: u64,
    #[serde(default = "default_recipes_ttl_ms")]
    pub recipes_ttl_ms: u64,

    /// Search debounce window and minimum query length
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    #[serde(default = "default_search_min_chars")]
    pub search_min_chars: usize,

    /// Offline write queue capacity; writes are rejected once full
    #[serde(default = "default_queue_max_items")]
    pub queue_max_items: usize,
    /// Fill ratio at which a queue pressure warning is raised
    #[serde(default = "default_queue_warn_ratio")]
    pub queue_warn_ratio: f64,

    /// Replay attempts before a queued write is dropped as failed
    #[serde(default = "default_replay_max_attempts")]
    pub replay_max_attempts: u32,
    #[serde(default = "default_replay_initial_backoff_ms")]
    pub replay_initial_backoff_ms: u64,
    #[serde(default = "default_replay_max_backoff_ms")]
    pub replay_max_backoff_ms: u64,

    /// How often the run loop re-checks for queued writes whose backoff elapsed
    #[serde(default = "default_retry_tick_ms")]
    pub retry_tick_ms: u64,

    /// Connectivity polling interval when no platform subscription exists
    #[serde(default = "default_network_poll_interval_ms")]
    pub network_poll_interval_ms: u64,
}

fn default_cache_version() -> String { "1".to_string() }
fn default_fetch_timeout_ms() -> u64 { 30_000 }
fn default_profile_ttl_ms() -> u64 { 24 * 60 * 60 * 1000 } // 24h
fn default_food_entries_ttl_ms() -> u64 { 5 * 60 * 1000 } // 5 min
fn default_search_ttl_ms() -> u64 { 2 * 60 * 1000 } // 2 min
fn default_custom_foods_ttl_ms() -> u64 { 60 * 60 * 1000 } // 1h
fn default_recipes_ttl_ms() -> u64 { 60 * 60 * 1000 } // 1h
fn default_search_debounce_ms() -> u64 { 300 }
fn default_search_min_chars() -> usize { 2 }
fn default_queue_max_items() -> usize { 500 }
fn default_queue_warn_ratio() -> f64 { 0.8 }
fn default_replay_max_attempts() -> u32 { 5 }
fn default_replay_initial_backoff_ms() -> u64 { 2_000 }
fn default_replay_max_backoff_ms() -> u64 { 300_000 }
fn default_retry_tick_ms() -> u64 { 15_000 }
fn default_network_poll_interval_ms() -> u64 { 30_000 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_url: None,
            cache_version: default_cache_version(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            profile_ttl_ms: default_profile_ttl_ms(),
            food_entries_ttl_ms: default_food_entries_ttl_ms(),
            search_ttl_ms: default_search_ttl_ms(),
            custom_foods_ttl_ms: default_custom_foods_ttl_ms(),
            recipes_ttl_ms: default_recipes_ttl_ms(),
            search_debounce_ms: default_search_debounce_ms(),
            search_min_chars: default_search_min_chars(),
            queue_max_items: default_queue_max_items(),
            queue_warn_ratio: default_queue_warn_ratio(),
            replay_max_attempts: default_replay_max_attempts(),
            replay_initial_backoff_ms: default_replay_initial_backoff_ms(),
            replay_max_backoff_ms: default_replay_max_backoff_ms(),
            retry_tick_ms: default_retry_tick_ms(),
            network_poll_interval_ms: default_network_poll_interval_ms(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Backoff curve for queued replays.
    #[must_use]
    pub fn replay_backoff(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.replay_initial_backoff_ms),
            max_delay: Duration::from_millis(self.replay_max_backoff_ms),
            max_retries: Some(self.replay_max_attempts as usize),
            ..RetryConfig::replay()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_equals_default() {
        let parsed: SyncConfig = serde_json::from_str("{}").unwrap();
        let default = SyncConfig::default();
        assert_eq!(parsed.fetch_timeout_ms, default.fetch_timeout_ms);
        assert_eq!(parsed.profile_ttl_ms, default.profile_ttl_ms);
        assert_eq!(parsed.cache_version, "1");
        assert!(parsed.storage_url.is_none());
    }

    #[test]
    fn test_profile_outlives_food_entries() {
        let config = SyncConfig::default();
        assert!(config.profile_ttl_ms > config.food_entries_ttl_ms);
        assert!(config.food_entries_ttl_ms > config.search_ttl_ms);
    }

    #[test]
    fn test_replay_backoff_from_config() {
        let config = SyncConfig {
            replay_initial_backoff_ms: 10,
            replay_max_backoff_ms: 40,
            ..Default::default()
        };
        let backoff = config.replay_backoff();
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(40));
        assert_eq!(backoff.delay_for_attempt(9), Duration::from_millis(40));
    }
}
