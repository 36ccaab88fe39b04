// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The engine service object.
//!
//! [`SyncEngine`] is built once at startup and handed to whatever needs it.
//! It owns every component and exposes the data layer plus a small
//! management surface (offline flag, cache size, queue length, clear cache,
//! sync now, cache info).
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nutrisync::{NetworkMonitor, RemoteApi, SyncConfig, SyncEngine};
//!
//! # async fn demo(remote: Arc<dyn RemoteApi>) -> Result<(), nutrisync::SyncError> {
//! let config = SyncConfig {
//!     storage_url: Some("sqlite://nutrisync.db?mode=rwc".into()),
//!     ..Default::default()
//! };
//! let monitor = Arc::new(NetworkMonitor::new(true));
//! let engine = SyncEngine::open(config, "user-1", remote, monitor.clone()).await?;
//! engine.start().await?;
//!
//! // Platform connectivity callback
//! monitor.report(false);
//! assert!(engine.is_offline_mode());
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{EngineState, SyncStatus};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheInfo, CacheStore};
use crate::config::SyncConfig;
use crate::coordinator::Coordinator;
use crate::data::NutritionData;
use crate::error::SyncError;
use crate::events::{emit, SyncEvent};
use crate::network::NetworkMonitor;
use crate::queue::{DrainReport, QueueLimits, SyncQueue, SyncQueueItem};
use crate::remote::{ErrorKind, RemoteApi};
use crate::resolver::Resolver;
use crate::storage::memory::InMemoryStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::KvStore;

const EVENT_CAPACITY: usize = 256;

/// Drain entry point shared by the run loop and `force_sync_now`.
#[derive(Clone)]
pub(crate) struct Drainer {
    queue: Arc<SyncQueue>,
    coordinator: Arc<Coordinator>,
    events: broadcast::Sender<SyncEvent>,
    /// Set when a replay hit AUTH_ERROR; automatic drains stay off until a
    /// forced sync clears it
    auth_hold: Arc<AtomicBool>,
}

impl Drainer {
    /// Automatic drain: skipped while another drain runs or while waiting
    /// for re-authentication.
    pub(crate) async fn drain_auto(&self, trigger: &str) -> Option<DrainReport> {
        if self.auth_hold.load(Ordering::Acquire) {
            debug!(trigger, "Queue paused until re-authentication");
            return None;
        }
        if self.queue.is_empty() && !self.queue.is_unsaved() {
            return None;
        }
        debug!(trigger, pending = self.queue.len(), "Automatic drain");
        let report = self.queue.drain(self.coordinator.as_ref()).await;
        self.finish(&report);
        Some(report)
    }

    /// Forced drain: waits for a running drain, then runs its own pass.
    pub(crate) async fn drain_forced(&self) -> DrainReport {
        self.auth_hold.store(false, Ordering::Release);
        let report = self.queue.drain_serialized(self.coordinator.as_ref()).await;
        self.finish(&report);
        report
    }

    fn finish(&self, report: &DrainReport) {
        if report.skipped {
            return;
        }
        if report.halted == Some(ErrorKind::Auth) {
            self.auth_hold.store(true, Ordering::Release);
        }
        if !report.is_noop() || report.halted.is_some() || report.unsaved {
            emit(&self.events, SyncEvent::DrainCompleted(report.clone()));
        }
    }
}

pub struct SyncEngine {
    pub(super) config: SyncConfig,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    pub(super) cache: CacheStore,
    pub(super) monitor: Arc<NetworkMonitor>,
    pub(super) queue: Arc<SyncQueue>,
    pub(super) coordinator: Arc<Coordinator>,
    pub(super) data: NutritionData,
    pub(super) events: broadcast::Sender<SyncEvent>,
    pub(super) drainer: Drainer,

    /// Stops background tasks
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Wire every component over an existing store. No I/O happens until
    /// [`start`](Self::start).
    pub fn new(
        config: SyncConfig,
        user_id: impl Into<String>,
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn KvStore>,
        monitor: Arc<NetworkMonitor>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Created);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        let cache = CacheStore::new(store.clone(), config.cache_version.clone());
        let queue = Arc::new(SyncQueue::new(store, QueueLimits::from_config(&config)));
        let coordinator = Arc::new(Coordinator::new(
            user_id,
            remote.clone(),
            cache.clone(),
            monitor.clone(),
            queue.clone(),
            events.clone(),
            &config,
        ));
        let resolver = Resolver::new(cache.clone(), monitor.clone(), config.fetch_timeout());
        let data = NutritionData::new(coordinator.clone(), resolver, remote, cache.clone(), &config);
        let drainer = Drainer {
            queue: queue.clone(),
            coordinator: coordinator.clone(),
            events: events.clone(),
            auth_hold: Arc::new(AtomicBool::new(false)),
        };

        Self {
            config,
            state,
            cache,
            monitor,
            queue,
            coordinator,
            data,
            events,
            drainer,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Open the store named by `config.storage_url` (SQLite), or an
    /// in-memory store when none is set.
    pub async fn open(
        config: SyncConfig,
        user_id: impl Into<String>,
        remote: Arc<dyn RemoteApi>,
        monitor: Arc<NetworkMonitor>,
    ) -> Result<Self, SyncError> {
        let store: Arc<dyn KvStore> = match &config.storage_url {
            Some(url) => {
                info!(url = %url, "Opening local store");
                Arc::new(SqlStore::new(url).await?)
            }
            None => {
                warn!("No storage_url configured, offline data will not survive restart");
                Arc::new(InMemoryStore::new())
            }
        };
        Ok(Self::new(config, user_id, remote, store, monitor))
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Domain reads and writes.
    #[must_use]
    pub fn data(&self) -> &NutritionData {
        &self.data
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    // ---- management surface ----

    #[must_use]
    pub fn is_offline_mode(&self) -> bool {
        !self.monitor.is_available()
    }

    /// Number of cache entries, fresh or expired.
    pub async fn cache_size(&self) -> Result<u64, SyncError> {
        Ok(self.cache.size().await?)
    }

    #[must_use]
    pub fn sync_queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Queued writes in replay order.
    #[must_use]
    pub fn pending_writes(&self) -> Vec<SyncQueueItem> {
        self.queue.snapshot()
    }

    /// Drop every cached value. Pending offline writes are kept, both in
    /// the queue and on screen.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<u64, SyncError> {
        let removed = self.cache.clear().await?;
        self.coordinator.forget_confirmed();
        info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Replay the queue now. Also resumes replay after re-authentication.
    ///
    /// Waits for an in-progress drain instead of running alongside it.
    #[instrument(skip(self))]
    pub async fn force_sync_now(&self) -> Result<DrainReport, SyncError> {
        if !self.monitor.is_available() {
            return Err(SyncError::Offline);
        }
        Ok(self.drainer.drain_forced().await)
    }

    pub async fn cache_info(&self) -> Result<CacheInfo, SyncError> {
        Ok(self.cache.info().await?)
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        let network = self.monitor.state();
        Ok(SyncStatus {
            offline: !network.is_online,
            last_transition_at: network.last_transition_at,
            queue_length: self.queue.len(),
            awaiting_auth: self.drainer.auth_hold.load(Ordering::Acquire),
            cache: self.cache.info().await?,
        })
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
