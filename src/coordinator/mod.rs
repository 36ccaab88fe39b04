// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutation coordinator.
//!
//! Every domain write goes through here. Online writes hit the server and
//! patch local state with the canonical result; offline writes are applied
//! optimistically as [`Entity::Provisional`] and queued. When the queue
//! drains, this type is the [`ReplayHandler`](crate::queue::ReplayHandler)
//! that replays each write and swaps provisional entities for confirmed ones.
//!
//! # Write lifecycle
//!
//! ```text
//! Pending(optimistic) → Queued → Replaying → Confirmed          (dequeued, reconciled)
//!                                         → Failed(retryable)  (stays queued, backoff)
//!                                         → Failed(terminal)   (dequeued, rolled back, reported)
//! ```
//!
//! Conflict policy is last-write-wins: replays carry the full document and
//! no version check is made against the server copy.

mod entity;
mod mutation;
mod read_model;
mod replay;

pub use entity::{new_local_id, Entity, LOCAL_ID_PREFIX};
pub use read_model::{Collection, ReadModel};

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::keys::{self, date_key, user_key};
use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::events::{emit, EventSender, SyncEvent};
use crate::models::{CustomFood, FoodEntry, Profile, Recipe, Record};
use crate::network::NetworkMonitor;
use crate::queue::{EntityKind, OperationType, QueuePressure, SyncQueue};
use crate::remote::{with_timeout, RemoteApi, RemoteError};

pub struct Coordinator {
    user_id: String,
    remote: Arc<dyn RemoteApi>,
    cache: CacheStore,
    monitor: Arc<NetworkMonitor>,
    queue: Arc<SyncQueue>,
    read_model: RwLock<ReadModel>,
    events: EventSender,
    fetch_timeout: Duration,
    profile_ttl: Duration,
}

impl Coordinator {
    pub fn new(
        user_id: impl Into<String>,
        remote: Arc<dyn RemoteApi>,
        cache: CacheStore,
        monitor: Arc<NetworkMonitor>,
        queue: Arc<SyncQueue>,
        events: broadcast::Sender<SyncEvent>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            remote,
            cache,
            monitor,
            queue,
            read_model: RwLock::new(ReadModel::default()),
            events,
            fetch_timeout: config.fetch_timeout(),
            profile_ttl: Duration::from_millis(config.profile_ttl_ms),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // ---- cache keys ----

    #[must_use]
    pub fn profile_key(&self) -> String {
        user_key(&self.user_id, keys::PROFILE)
    }

    #[must_use]
    pub fn food_entries_key(&self, date: NaiveDate) -> String {
        date_key(&self.user_id, date, keys::FOOD_ENTRIES)
    }

    #[must_use]
    pub fn custom_foods_key(&self) -> String {
        user_key(&self.user_id, keys::CUSTOM_FOODS)
    }

    #[must_use]
    pub fn recipes_key(&self) -> String {
        user_key(&self.user_id, keys::RECIPES)
    }

    // ---- reads: overlay local state on canonical data ----

    /// Revision of local changes to canonical data; take it before a fetch
    /// and hand it back to the matching `merge_*`.
    #[must_use]
    pub fn read_revision(&self) -> u64 {
        self.read_model.read().revision()
    }

    #[must_use]
    pub fn changed_since(&self, collection: Collection, since: u64) -> bool {
        self.read_model.read().changed_since(collection, since)
    }

    pub fn merge_profile(&self, canonical: Record<Profile>, since: u64) -> Entity<Profile> {
        self.read_model.write().merge_profile(canonical, since)
    }

    /// Profile as currently held locally (confirmed or pending update).
    #[must_use]
    pub fn local_profile(&self) -> Option<Entity<Profile>> {
        self.read_model.read().profile()
    }

    pub fn merge_food_entries(
        &self,
        date: NaiveDate,
        canonical: Vec<Record<FoodEntry>>,
        since: u64,
    ) -> Vec<Entity<FoodEntry>> {
        let hidden = self.queue.pending_delete_targets(EntityKind::FoodEntry);
        self.read_model.write().merge_food_entries(date, canonical, &hidden, since)
    }

    /// Entries for `date` as held locally, `None` if the date was never
    /// loaded nor written to.
    #[must_use]
    pub fn local_food_entries(&self, date: NaiveDate) -> Option<Vec<Entity<FoodEntry>>> {
        let hidden = self.queue.pending_delete_targets(EntityKind::FoodEntry);
        self.read_model.read().food_entries(date, &hidden)
    }

    pub fn merge_custom_foods(&self, canonical: Vec<Record<CustomFood>>, since: u64) -> Vec<Entity<CustomFood>> {
        self.read_model.write().merge_custom_foods(canonical, since)
    }

    #[must_use]
    pub fn local_custom_foods(&self) -> Option<Vec<Entity<CustomFood>>> {
        self.read_model.read().custom_foods()
    }

    pub fn merge_recipes(&self, canonical: Vec<Record<Recipe>>, since: u64) -> Vec<Entity<Recipe>> {
        self.read_model.write().merge_recipes(canonical, since)
    }

    #[must_use]
    pub fn local_recipes(&self) -> Option<Vec<Entity<Recipe>>> {
        self.read_model.read().recipes()
    }

    /// Re-apply queued creates and updates as provisional entities. Run
    /// once after the queue has been restored from storage.
    pub fn rehydrate(&self) -> usize {
        let items = self.queue.snapshot();
        let mut model = self.read_model.write();
        let mut applied = 0;

        for item in items {
            let Some(local_id) = item.local_id.clone() else {
                continue;
            };
            let queue_ref = item.sequence;
            let ok = match (item.entity_kind, item.operation_type) {
                (EntityKind::FoodEntry, OperationType::Create) => decode::<FoodEntry>(&item.payload)
                    .map(|data| model.add_food_entry(Entity::Provisional { local_id, data, queue_ref }))
                    .is_some(),
                (EntityKind::Profile, OperationType::Update) => decode::<Profile>(&item.payload)
                    .map(|data| model.overlay_profile(Entity::Provisional { local_id, data, queue_ref }))
                    .is_some(),
                (EntityKind::CustomFood, OperationType::Create) => decode::<CustomFood>(&item.payload)
                    .map(|data| model.add_custom_food(Entity::Provisional { local_id, data, queue_ref }))
                    .is_some(),
                (EntityKind::Recipe, OperationType::Create) => decode::<Recipe>(&item.payload)
                    .map(|data| model.add_recipe(Entity::Provisional { local_id, data, queue_ref }))
                    .is_some(),
                _ => false,
            };
            if ok {
                applied += 1;
            }
        }

        if applied > 0 {
            info!(applied, "Re-applied pending offline writes");
        }
        applied
    }

    /// Drop confirmed data from the read model; pending writes stay.
    pub fn forget_confirmed(&self) {
        self.read_model.write().reset_confirmed();
    }

    // ---- shared plumbing ----

    async fn call<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        let _timer = crate::metrics::LatencyTimer::new();
        with_timeout(self.fetch_timeout, operation, fut).await
    }

    /// Patch a cached list; storage failures are logged only, the read
    /// model is already correct and the next fetch will repair the cache.
    async fn patch_cached_list<T, F>(&self, key: &str, f: F)
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Vec<Record<T>>),
    {
        match self.cache.patch(key, f).await {
            Ok(true) => debug!(key = %key, "Cached list patched"),
            Ok(false) => {}
            Err(e) => {
                crate::metrics::record_error("coordinator", "patch_cache", "storage");
                warn!(key = %key, error = %e, "Failed to patch cached list");
            }
        }
    }

    /// Drop food entry `id` from every cached day of this user. Used when
    /// the entry's date is not known locally.
    async fn uncache_food_entry(&self, id: &str) {
        let prefix = keys::date_prefix(&self.user_id);
        let result = self
            .cache
            .patch_prefix(&prefix, |list: &mut Vec<Record<FoodEntry>>| {
                let before = list.len();
                remove_record(list, id);
                list.len() != before
            })
            .await;
        match result {
            Ok(patched) => debug!(id, patched, "Deleted entry dropped from cached days"),
            Err(e) => {
                crate::metrics::record_error("coordinator", "patch_cache", "storage");
                warn!(id, error = %e, "Failed to drop deleted entry from cached days");
            }
        }
    }

    async fn cache_profile(&self, record: &Record<Profile>) {
        let options = self.cache.options(self.profile_ttl);
        if let Err(e) = self.cache.set(&self.profile_key(), record, &options).await {
            crate::metrics::record_error("coordinator", "cache_profile", "storage");
            warn!(error = %e, "Failed to cache profile");
        }
    }

    fn emit(&self, event: SyncEvent) {
        emit(&self.events, event);
    }

    fn check_pressure(&self) {
        let level = self.queue.pressure();
        if level >= QueuePressure::Warn {
            self.emit(SyncEvent::QueuePressure {
                level,
                pending: self.queue.len(),
                max: self.queue.limits().max_items,
            });
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &serde_json::Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "Unreadable queued payload");
            None
        }
    }
}

fn upsert_record<T>(list: &mut Vec<Record<T>>, record: Record<T>) {
    match list.iter().position(|r| r.id == record.id) {
        Some(pos) => list[pos] = record,
        None => list.push(record),
    }
}

fn remove_record<T>(list: &mut Vec<Record<T>>, id: &str) {
    list.retain(|r| r.id != id);
}
