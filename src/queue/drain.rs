// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue replay.
//!
//! One pass walks the queue in sequence order and replays each due item:
//!
//! | outcome                          | item            | pass                     |
//! |----------------------------------|-----------------|--------------------------|
//! | success                          | removed         | continue                 |
//! | VALIDATION / attempts exhausted  | removed, report | continue                 |
//! | SERVER                           | backoff         | skip rest of that stream |
//! | NETWORK                          | backoff         | stop                     |
//! | AUTH                             | kept as is      | stop                     |
//!
//! Items still inside their backoff window block their stream for the
//! pass, so a later write never overtakes an earlier one of the same kind.
//!
//! A settled item (confirmed or dropped) must reach storage before the
//! next replay. If it can't, the pass stops with `unsaved` set and later
//! passes only retry the write until it lands.

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{EntityKind, SyncQueue, SyncQueueItem};
use crate::remote::{ErrorKind, RemoteError};

/// What happened to an item whose replay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still queued; next try not before `next_attempt_at`.
    Retrying { attempts: u32, next_attempt_at: i64 },
    /// Dropped from the queue.
    Terminal,
    /// Still queued, untouched, until the user signs in again.
    AuthRequired,
}

/// Replays queued writes against the server and folds results back into
/// local state.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    /// Issue the remote write. Returns the canonical server record (or
    /// `Null` for deletes).
    async fn replay(&self, item: &SyncQueueItem) -> Result<Value, RemoteError>;

    /// Swap provisional state for the canonical record. Runs after the item
    /// left the queue and before the queue is persisted, with no suspension
    /// in between.
    fn reconcile(&self, item: &SyncQueueItem, canonical: &Value);

    /// Follow-up I/O for a confirmed item, e.g. patching the cache.
    async fn after_confirmed(&self, _item: &SyncQueueItem, _canonical: Value) {}

    async fn failed(&self, _item: &SyncQueueItem, _error: &RemoteError, _disposition: FailureDisposition) {}

    /// Checked before each item; a pass stops as soon as this turns false.
    fn is_online(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub confirmed: usize,
    /// Dropped as terminal
    pub failed: usize,
    /// Failed, still queued with backoff
    pub retrying: usize,
    /// Not yet due, left untouched
    pub deferred: usize,
    /// Why the pass stopped early, if it did
    pub halted: Option<ErrorKind>,
    /// Another drain was already running; nothing was done
    pub skipped: bool,
    /// The queue document could not be written after a settled replay
    pub unsaved: bool,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.confirmed == 0 && self.failed == 0 && self.retrying == 0
    }
}

impl SyncQueue {
    /// Run one pass unless another is in progress, in which case this
    /// returns immediately with `skipped` set.
    pub async fn drain(&self, handler: &dyn ReplayHandler) -> DrainReport {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress, skipping");
            return DrainReport::skipped();
        };
        self.drain_pass(handler).await
    }

    /// Wait for any running pass to finish, then run a fresh one.
    pub async fn drain_serialized(&self, handler: &dyn ReplayHandler) -> DrainReport {
        let _guard = self.drain_lock.lock().await;
        self.drain_pass(handler).await
    }

    #[instrument(skip_all, fields(pending = self.len()))]
    async fn drain_pass(&self, handler: &dyn ReplayHandler) -> DrainReport {
        let mut report = DrainReport::default();
        if self.is_unsaved() && !self.persist_settled("flush").await {
            report.unsaved = true;
            return report;
        }
        if self.is_empty() {
            return report;
        }

        let started = Instant::now();
        let mut blocked: HashSet<EntityKind> = HashSet::new();
        let mut cursor = 0u64;

        info!("Draining offline queue");

        loop {
            if !handler.is_online() {
                debug!("Went offline mid-drain, stopping");
                report.halted = Some(ErrorKind::Network);
                break;
            }

            let Some(item) = self.next_replayable(cursor, &mut blocked, &mut report) else {
                break;
            };
            cursor = item.sequence + 1;

            match handler.replay(&item).await {
                Ok(canonical) => {
                    self.finish_in_flight(item.sequence, true);
                    handler.reconcile(&item, &canonical);
                    let saved = self.persist_settled("confirmed").await;
                    handler.after_confirmed(&item, canonical).await;

                    crate::metrics::record_replay(item.entity_kind.as_str(), "confirmed");
                    debug!(sequence = item.sequence, entity = %item.entity_kind, "Queued write confirmed");
                    report.confirmed += 1;
                    if !saved {
                        report.unsaved = true;
                        break;
                    }
                }
                Err(err) => {
                    if let Some(halt) = self.handle_failure(&item, &err, handler, &mut blocked, &mut report).await {
                        report.halted = Some(halt);
                        break;
                    }
                    if report.unsaved {
                        break;
                    }
                }
            }
        }

        crate::metrics::record_drain(started.elapsed(), report.confirmed);
        info!(
            confirmed = report.confirmed,
            failed = report.failed,
            retrying = report.retrying,
            deferred = report.deferred,
            halted = ?report.halted,
            unsaved = report.unsaved,
            remaining = self.len(),
            "Drain pass complete"
        );
        report
    }

    /// First item at or after `cursor` whose stream isn't blocked. Marks it
    /// in flight. Not-yet-due items block their stream on the way.
    fn next_replayable(
        &self,
        cursor: u64,
        blocked: &mut HashSet<EntityKind>,
        report: &mut DrainReport,
    ) -> Option<SyncQueueItem> {
        let now = crate::clock::now_millis();
        let mut state = self.state.lock();
        let mut pick = None;
        for item in state.items.iter().filter(|i| i.sequence >= cursor) {
            if blocked.contains(&item.entity_kind) {
                continue;
            }
            if !item.is_due_at(now) {
                blocked.insert(item.entity_kind);
                report.deferred += 1;
                continue;
            }
            pick = Some(item.clone());
            break;
        }
        if let Some(item) = &pick {
            state.in_flight = Some(item.sequence);
        }
        pick
    }

    fn finish_in_flight(&self, sequence: u64, remove: bool) {
        {
            let mut state = self.state.lock();
            state.in_flight = None;
            if remove {
                state.items.retain(|i| i.sequence != sequence);
            }
        }
        if remove {
            self.publish_gauges();
        }
    }

    /// Returns the halt reason when the pass must stop.
    async fn handle_failure(
        &self,
        item: &SyncQueueItem,
        err: &RemoteError,
        handler: &dyn ReplayHandler,
        blocked: &mut HashSet<EntityKind>,
        report: &mut DrainReport,
    ) -> Option<ErrorKind> {
        let kind = err.kind();
        crate::metrics::record_error("queue", "replay", &kind.to_string());

        if kind == ErrorKind::Auth {
            self.finish_in_flight(item.sequence, false);
            warn!(sequence = item.sequence, error = %err, "Replay needs re-authentication, pausing queue");
            crate::metrics::record_replay(item.entity_kind.as_str(), "auth_required");
            handler.failed(item, err, FailureDisposition::AuthRequired).await;
            return Some(ErrorKind::Auth);
        }

        let attempts = item.attempts.saturating_add(1);
        let terminal = kind == ErrorKind::Validation || attempts >= self.limits.max_attempts;

        if terminal {
            self.finish_in_flight(item.sequence, true);
            report.unsaved = !self.persist_settled("terminal").await;
            warn!(
                sequence = item.sequence,
                entity = %item.entity_kind,
                attempts,
                error = %err,
                "Queued write failed permanently, dropped"
            );
            crate::metrics::record_replay(item.entity_kind.as_str(), "failed");
            report.failed += 1;
            handler.failed(item, err, FailureDisposition::Terminal).await;
            return None;
        }

        let delay = self.limits.backoff.delay_for_attempt(attempts);
        let next_attempt_at = crate::clock::now_millis().saturating_add(delay.as_millis() as i64);
        {
            let mut state = self.state.lock();
            state.in_flight = None;
            if let Some(queued) = state.items.iter_mut().find(|i| i.sequence == item.sequence) {
                queued.attempts = attempts;
                queued.next_attempt_at = Some(next_attempt_at);
                queued.last_error = Some(err.to_string());
            }
        }
        self.persist_logged("retrying").await;

        debug!(
            sequence = item.sequence,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Replay failed, will retry"
        );
        crate::metrics::record_replay(item.entity_kind.as_str(), "retrying");
        report.retrying += 1;
        handler
            .failed(item, err, FailureDisposition::Retrying { attempts, next_attempt_at })
            .await;

        if kind == ErrorKind::Network {
            return Some(ErrorKind::Network);
        }
        blocked.insert(item.entity_kind);
        None
    }
}
