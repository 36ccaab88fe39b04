// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable FIFO of offline writes.
//!
//! The whole queue is one JSON document under [`QUEUE_KEY`]:
//! `{ "next_sequence": n, "items": [...] }`. Every mutation rewrites the
//! document, so after a restart the queue comes back with the same items
//! in the same order and sequences keep counting up from where they left
//! off.
//!
//! Bookkeeping happens under a short synchronous lock; only persistence
//! and replay suspend.

mod drain;
mod item;
mod pressure;

pub use drain::{DrainReport, FailureDisposition, ReplayHandler};
pub use item::{EntityKind, EntityRef, NewItem, OperationType, SyncQueueItem};
pub use pressure::QueuePressure;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{KvStore, StorageError};

/// Storage key of the queue document. Outside the `cache:` namespace.
pub const QUEUE_KEY: &str = "sync_queue";

#[derive(Debug, Clone)]
pub struct QueueLimits {
    pub max_items: usize,
    pub warn_ratio: f64,
    /// Total replay attempts before a retryable failure turns terminal
    pub max_attempts: u32,
    pub backoff: RetryConfig,
}

impl QueueLimits {
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_items: config.queue_max_items,
            warn_ratio: config.queue_warn_ratio,
            max_attempts: config.replay_max_attempts.max(1),
            backoff: config.replay_backoff(),
        }
    }
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    next_sequence: u64,
    items: Vec<SyncQueueItem>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_sequence: u64,
    /// Always sorted by sequence
    items: Vec<SyncQueueItem>,
    /// Sequence currently being replayed
    in_flight: Option<u64>,
    /// The stored document still lists an item replay already settled
    unsaved: bool,
}

pub struct SyncQueue {
    store: Arc<dyn KvStore>,
    state: Mutex<QueueState>,
    /// Serializes document writes so a stale snapshot never overwrites a newer one
    persist_lock: tokio::sync::Mutex<()>,
    /// Single-flight guard for drains
    drain_lock: tokio::sync::Mutex<()>,
    limits: QueueLimits,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn KvStore>, limits: QueueLimits) -> Self {
        Self {
            store,
            state: Mutex::new(QueueState {
                next_sequence: 1,
                ..Default::default()
            }),
            persist_lock: tokio::sync::Mutex::new(()),
            drain_lock: tokio::sync::Mutex::new(()),
            limits,
        }
    }

    /// Replace in-memory state with the persisted document. Returns the
    /// number of pending items found.
    ///
    /// A corrupt document is an error, never silently discarded: it holds
    /// writes the user believes were saved.
    pub async fn restore(&self) -> Result<usize, StorageError> {
        let doc = match self.store.get(QUEUE_KEY).await? {
            Some(raw) => serde_json::from_str::<QueueDocument>(&raw)
                .map_err(|e| StorageError::corruption(QUEUE_KEY, e))?,
            None => QueueDocument::default(),
        };

        let mut items = doc.items;
        items.sort_by_key(|i| i.sequence);
        let floor = items.last().map_or(1, |i| i.sequence + 1);

        let pending = items.len();
        {
            let mut state = self.state.lock();
            state.next_sequence = doc.next_sequence.max(floor);
            state.items = items;
            state.in_flight = None;
            state.unsaved = false;
        }
        self.publish_gauges();

        if pending > 0 {
            info!(pending, "Restored offline queue from previous session");
        }
        Ok(pending)
    }

    /// Sequence and append without persisting.
    ///
    /// Callers that must apply optimistic state in the same atomic step
    /// use this, then [`persist`](Self::persist). Most callers want
    /// [`enqueue`](Self::enqueue).
    pub fn push(&self, new: NewItem) -> Result<SyncQueueItem, SyncError> {
        let (item, len) = {
            let mut state = self.state.lock();
            let pending = state.items.len();
            if !QueuePressure::from_fill(pending, self.limits.max_items, self.limits.warn_ratio).should_accept_writes() {
                drop(state);
                crate::metrics::record_queue_rejection();
                warn!(pending, max = self.limits.max_items, "Offline queue full, rejecting write");
                return Err(SyncError::QueueFull {
                    pending,
                    max: self.limits.max_items,
                });
            }

            let item = SyncQueueItem {
                sequence: state.next_sequence,
                operation_type: new.operation_type,
                entity_kind: new.entity_kind,
                payload: new.payload,
                created_at: crate::clock::now_millis(),
                attempts: 0,
                local_id: new.local_id,
                target: new.target,
                next_attempt_at: None,
                last_error: None,
            };
            state.next_sequence += 1;
            state.items.push(item.clone());
            (item, state.items.len())
        };

        let pressure = self.publish_gauges();
        if pressure >= QueuePressure::Warn {
            warn!(pending = len, max = self.limits.max_items, "Offline queue under pressure");
        }
        debug!(
            sequence = item.sequence,
            op = ?item.operation_type,
            entity = %item.entity_kind,
            pending = len,
            "Write queued"
        );
        Ok(item)
    }

    /// Push and persist. If persistence fails the item is taken back out.
    pub async fn enqueue(&self, new: NewItem) -> Result<SyncQueueItem, SyncError> {
        let item = self.push(new)?;
        if let Err(e) = self.persist().await {
            self.discard(item.sequence);
            return Err(e.into());
        }
        Ok(item)
    }

    /// Write the current state as the queue document.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let _write = self.persist_lock.lock().await;
        let raw = {
            let state = self.state.lock();
            let doc = QueueDocumentRef {
                next_sequence: state.next_sequence,
                items: &state.items,
            };
            serde_json::to_string(&doc).map_err(|e| StorageError::corruption(QUEUE_KEY, e))?
        };
        self.store.put(QUEUE_KEY, &raw).await?;
        self.state.lock().unsaved = false;
        Ok(())
    }

    /// Persist with retries after a replay settled an item. On failure the
    /// queue is marked unsaved and `false` is returned; no further item may
    /// be replayed until a later persist succeeds, or a restart would
    /// replay the settled one again.
    pub(crate) async fn persist_settled(&self, context: &str) -> bool {
        let result = retry("queue_persist", &RetryConfig::query(), || async {
            self.persist().await
        })
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                self.state.lock().unsaved = true;
                crate::metrics::record_error("queue", "persist", "storage");
                warn!(error = %e, context, "Failed to persist offline queue after replay, holding further replays");
                false
            }
        }
    }

    /// Whether a settled replay is still missing from the stored document.
    #[must_use]
    pub fn is_unsaved(&self) -> bool {
        self.state.lock().unsaved
    }

    /// Persist, logging instead of failing. Used on paths where the
    /// in-memory state is already authoritative.
    pub(crate) async fn persist_logged(&self, context: &str) {
        if let Err(e) = self.persist().await {
            crate::metrics::record_error("queue", "persist", "storage");
            warn!(error = %e, context, "Failed to persist offline queue");
        }
    }

    /// Remove an item from memory only. Returns it if present.
    pub(crate) fn discard(&self, sequence: u64) -> Option<SyncQueueItem> {
        let removed = {
            let mut state = self.state.lock();
            let pos = state.items.iter().position(|i| i.sequence == sequence)?;
            Some(state.items.remove(pos))
        };
        self.publish_gauges();
        removed
    }

    /// Drop a not-yet-replayed item and persist.
    ///
    /// Returns `false` when the item is unknown or currently being replayed;
    /// the caller must then treat the write as already on its way.
    pub async fn cancel(&self, sequence: u64) -> Result<bool, StorageError> {
        if self.state.lock().in_flight == Some(sequence) {
            return Ok(false);
        }
        if self.discard(sequence).is_none() {
            return Ok(false);
        }
        debug!(sequence, "Queued write cancelled");
        self.persist().await?;
        Ok(true)
    }

    /// Point queued deletes aimed at a provisional id to its server id.
    /// Returns how many items were rewritten. Does not persist.
    pub fn rewrite_local_target(&self, local_id: &str, server_id: &str) -> usize {
        let mut state = self.state.lock();
        let mut rewritten = 0;
        for item in state.items.iter_mut() {
            if item.target.as_ref() == Some(&EntityRef::Local(local_id.to_string())) {
                item.target = Some(EntityRef::Server(server_id.to_string()));
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Ids with a delete still queued for `kind`, local or server.
    #[must_use]
    pub fn pending_delete_targets(&self, kind: EntityKind) -> HashSet<String> {
        self.state
            .lock()
            .items
            .iter()
            .filter(|i| i.entity_kind == kind && i.operation_type == OperationType::Delete)
            .filter_map(|i| match &i.target {
                Some(EntityRef::Server(id)) | Some(EntityRef::Local(id)) => Some(id.clone()),
                None => None,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the pending items in sequence order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SyncQueueItem> {
        self.state.lock().items.clone()
    }

    #[must_use]
    pub fn get(&self, sequence: u64) -> Option<SyncQueueItem> {
        self.state.lock().items.iter().find(|i| i.sequence == sequence).cloned()
    }

    #[must_use]
    pub fn is_in_flight(&self, sequence: u64) -> bool {
        self.state.lock().in_flight == Some(sequence)
    }

    /// Whether a write of `kind` is still waiting (or being replayed). A new
    /// write of the same kind must queue behind it to keep replay order.
    #[must_use]
    pub fn has_pending(&self, kind: EntityKind) -> bool {
        self.state.lock().items.iter().any(|i| i.entity_kind == kind)
    }

    /// Whether any item could be replayed right now.
    #[must_use]
    pub fn has_due(&self, now_millis: i64) -> bool {
        self.state.lock().items.iter().any(|i| i.is_due_at(now_millis))
    }

    #[must_use]
    pub fn pressure(&self) -> QueuePressure {
        QueuePressure::from_fill(self.len(), self.limits.max_items, self.limits.warn_ratio)
    }

    #[must_use]
    pub fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    fn publish_gauges(&self) -> QueuePressure {
        let len = self.len();
        crate::metrics::set_queue_length(len);
        if self.limits.max_items > 0 {
            crate::metrics::set_queue_pressure((len as f64 / self.limits.max_items as f64).min(1.0));
        }
        QueuePressure::from_fill(len, self.limits.max_items, self.limits.warn_ratio)
    }
}

/// Borrowing twin of [`QueueDocument`] so persisting doesn't clone items.
#[derive(Serialize)]
struct QueueDocumentRef<'a> {
    next_sequence: u64,
    items: &'a [SyncQueueItem],
}
