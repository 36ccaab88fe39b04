// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for nutrisync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host app chooses the exporter (or installs none, making every call a no-op).
//!
//! # Metric Naming Convention
//! - `nutrisync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `outcome`: hit, stale, miss / network, fallback, error / confirmed, retrying, failed
//! - `entity`: profile, food_entry, custom_food, recipe

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a cache read and how it resolved
pub fn record_cache_lookup(outcome: &str) {
    counter!(
        "nutrisync_cache_lookups_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record which path served a read
pub fn record_resolve(outcome: &str) {
    counter!(
        "nutrisync_resolver_reads_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote fetch latency
pub fn record_fetch_latency(duration: Duration) {
    histogram!("nutrisync_fetch_seconds").record(duration.as_secs_f64());
}

/// Record a remote call that hit its deadline
pub fn record_timeout(operation: &str) {
    counter!(
        "nutrisync_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Set current number of queued offline writes
pub fn set_queue_length(len: usize) {
    gauge!("nutrisync_sync_queue_length").set(len as f64);
}

/// Set queue fill ratio (0.0 - 1.0)
pub fn set_queue_pressure(ratio: f64) {
    gauge!("nutrisync_sync_queue_pressure").set(ratio);
}

/// Record a write rejected because the queue was full
pub fn record_queue_rejection() {
    counter!("nutrisync_sync_queue_rejections_total").increment(1);
}

/// Record the outcome of one queued write replay
pub fn record_replay(entity: &str, outcome: &str) {
    counter!(
        "nutrisync_replays_total",
        "entity" => entity.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a completed drain pass
pub fn record_drain(duration: Duration, confirmed: usize) {
    counter!("nutrisync_drains_total").increment(1);
    histogram!("nutrisync_drain_seconds").record(duration.as_secs_f64());
    histogram!("nutrisync_drain_confirmed").record(confirmed as f64);
}

/// Record an optimistic (offline) write
pub fn record_optimistic_write(entity: &str) {
    counter!(
        "nutrisync_optimistic_writes_total",
        "entity" => entity.to_string()
    )
    .increment(1);
}

/// Set connectivity (1 = online)
pub fn set_online(online: bool) {
    gauge!("nutrisync_network_online").set(if online { 1.0 } else { 0.0 });
}

/// Record an error with category for alerting
pub fn record_error(component: &str, operation: &str, error_type: &str) {
    counter!(
        "nutrisync_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// A timer guard that records fetch latency on drop.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_fetch_latency(self.start.elapsed());
    }
}
