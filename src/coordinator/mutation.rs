//! Domain writes.
//!
//! Each write tries the server first when the monitor says we're online
//! and nothing of the same kind is still queued; otherwise it joins the
//! queue behind the earlier writes so replay can't overwrite it.
//! A `NETWORK_ERROR` on the online call (including the fetch timeout) means
//! the monitor was behind reality, so the write takes the offline path
//! instead of failing. Any other online failure goes straight back to the
//! caller.

use serde_json::json;
use tracing::debug;

use super::entity::{new_local_id, Entity};
use super::read_model::ReadModel;
use super::{remove_record, upsert_record, Coordinator};
use crate::error::SyncError;
use crate::models::{CustomFood, FoodEntry, Profile, Recipe, Record};
use crate::queue::{EntityKind, EntityRef, NewItem};
use crate::remote::{ErrorKind, RemoteError};

/// Outcome of the online attempt.
enum Online<T> {
    Done(T),
    /// Offline, queued writes of the same kind ahead of it, or the call
    /// failed with a network error
    Unreachable,
}

impl Coordinator {
    async fn try_online<T>(
        &self,
        kind: EntityKind,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T, RemoteError>>,
    ) -> Result<Online<T>, SyncError> {
        if !self.monitor.is_available() {
            return Ok(Online::Unreachable);
        }
        if self.queue.has_pending(kind) {
            debug!(operation, entity = %kind, "Earlier writes still queued, queueing behind them");
            return Ok(Online::Unreachable);
        }
        match self.call(operation, fut).await {
            Ok(value) => Ok(Online::Done(value)),
            Err(e) if e.kind() == ErrorKind::Network => {
                debug!(operation, error = %e, "Online write unreachable, queueing instead");
                Ok(Online::Unreachable)
            }
            Err(e) => {
                crate::metrics::record_error("coordinator", operation, &e.kind().to_string());
                Err(e.into())
            }
        }
    }

    /// Queue `new` and apply its optimistic effect in one step, then persist.
    /// On persist failure both are undone.
    async fn queue_optimistic<A, R>(&self, new: NewItem, apply: A, rollback: R) -> Result<u64, SyncError>
    where
        A: FnOnce(&mut ReadModel, u64) + Send,
        R: FnOnce(&mut ReadModel) + Send,
    {
        let kind = new.entity_kind;
        let item = self.queue.push(new)?;
        apply(&mut *self.read_model.write(), item.sequence);

        if let Err(e) = self.queue.persist().await {
            self.queue.discard(item.sequence);
            rollback(&mut *self.read_model.write());
            crate::metrics::record_error("coordinator", "queue_write", "storage");
            return Err(e.into());
        }

        crate::metrics::record_optimistic_write(kind.as_str());
        self.check_pressure();
        Ok(item.sequence)
    }

    /// Log a food entry. Offline, the entry shows up immediately under its
    /// date as a provisional entity.
    pub async fn log_food(&self, entry: FoodEntry) -> Result<Entity<FoodEntry>, SyncError> {
        if let Online::Done(record) = self
            .try_online(EntityKind::FoodEntry, "log_food_entry", self.remote.log_food_entry(&entry))
            .await?
        {
            self.read_model.write().upsert_food_entry(record.clone());
            let key = self.food_entries_key(record.data.date);
            let cached = record.clone();
            self.patch_cached_list(&key, move |list: &mut Vec<Record<FoodEntry>>| upsert_record(list, cached))
                .await;
            return Ok(Entity::confirmed(record));
        }

        let local_id = new_local_id();
        let new = NewItem::create(EntityKind::FoodEntry, serde_json::to_value(&entry)?, local_id.clone());
        let queue_ref = self
            .queue_optimistic(
                new,
                |model, queue_ref| {
                    model.add_food_entry(Entity::Provisional {
                        local_id: local_id.clone(),
                        data: entry.clone(),
                        queue_ref,
                    })
                },
                |model| {
                    model.remove_food_entry(&local_id);
                },
            )
            .await?;

        Ok(Entity::Provisional { local_id, data: entry, queue_ref })
    }

    /// Delete a food entry by server id or provisional id.
    ///
    /// Deleting a provisional entry never reaches the server if its create
    /// is still waiting in the queue: the create is simply cancelled.
    pub async fn delete_food(&self, id: &str) -> Result<(), SyncError> {
        let existing = self.read_model.read().find_food_entry(id);

        if let Some(Entity::Provisional { local_id, data, queue_ref }) = existing {
            return self.delete_provisional_food(local_id, data, queue_ref).await;
        }
        let date = existing.as_ref().map(|e| e.data().date);

        if let Online::Done(()) = self
            .try_online(EntityKind::FoodEntry, "delete_food_entry", self.remote.delete_food_entry(id))
            .await?
        {
            self.read_model.write().remove_food_entry(id);
            match date {
                Some(date) => {
                    let target = id.to_string();
                    self.patch_cached_list(&self.food_entries_key(date), move |list: &mut Vec<Record<FoodEntry>>| {
                        remove_record(list, &target)
                    })
                    .await;
                }
                None => self.uncache_food_entry(id).await,
            }
            return Ok(());
        }

        let new = NewItem {
            payload: json!({ "date": date }),
            ..NewItem::delete(EntityKind::FoodEntry, EntityRef::Server(id.to_string()))
        };
        self.queue_optimistic(
            new,
            |model, _| {
                model.remove_food_entry(id);
            },
            |model| {
                if let Some(Entity::Confirmed { server_id, data }) = existing {
                    model.upsert_food_entry(Record::new(server_id, data));
                }
            },
        )
        .await?;
        Ok(())
    }

    async fn delete_provisional_food(&self, local_id: String, data: FoodEntry, queue_ref: u64) -> Result<(), SyncError> {
        if self.queue.cancel(queue_ref).await? {
            self.read_model.write().remove_food_entry(&local_id);
            debug!(local_id = %local_id, "Provisional entry deleted before sync, create cancelled");
            return Ok(());
        }

        // The create is mid-replay: queue a delete against the local id,
        // rewritten to the server id once the create is confirmed.
        let new = NewItem {
            payload: json!({ "date": data.date }),
            ..NewItem::delete(EntityKind::FoodEntry, EntityRef::Local(local_id.clone()))
        };
        self.queue_optimistic(
            new,
            |model, _| {
                model.remove_food_entry(&local_id);
            },
            |model| {
                model.add_food_entry(Entity::Provisional {
                    local_id: local_id.clone(),
                    data,
                    queue_ref,
                })
            },
        )
        .await?;
        Ok(())
    }

    /// Replace the profile document. Offline, the new profile overlays the
    /// canonical one until the update is confirmed.
    pub async fn update_profile(&self, profile: Profile) -> Result<Entity<Profile>, SyncError> {
        if let Online::Done(record) = self
            .try_online(EntityKind::Profile, "update_profile", self.remote.update_profile(&profile))
            .await?
        {
            self.read_model.write().set_profile(record.clone());
            self.cache_profile(&record).await;
            return Ok(Entity::confirmed(record));
        }

        let local_id = new_local_id();
        let previous = self.read_model.read().profile();
        let new = NewItem {
            local_id: Some(local_id.clone()),
            ..NewItem::update(EntityKind::Profile, serde_json::to_value(&profile)?)
        };
        let queue_ref = self
            .queue_optimistic(
                new,
                |model, queue_ref| {
                    model.overlay_profile(Entity::Provisional {
                        local_id: local_id.clone(),
                        data: profile.clone(),
                        queue_ref,
                    })
                },
                |model| model.restore_profile(previous),
            )
            .await?;

        Ok(Entity::Provisional { local_id, data: profile, queue_ref })
    }

    pub async fn create_custom_food(&self, food: CustomFood) -> Result<Entity<CustomFood>, SyncError> {
        if let Online::Done(record) = self
            .try_online(EntityKind::CustomFood, "create_custom_food", self.remote.create_custom_food(&food))
            .await?
        {
            self.read_model.write().upsert_custom_food(record.clone());
            let cached = record.clone();
            self.patch_cached_list(&self.custom_foods_key(), move |list: &mut Vec<Record<CustomFood>>| {
                upsert_record(list, cached)
            })
            .await;
            return Ok(Entity::confirmed(record));
        }

        let local_id = new_local_id();
        let new = NewItem::create(EntityKind::CustomFood, serde_json::to_value(&food)?, local_id.clone());
        let queue_ref = self
            .queue_optimistic(
                new,
                |model, queue_ref| {
                    model.add_custom_food(Entity::Provisional {
                        local_id: local_id.clone(),
                        data: food.clone(),
                        queue_ref,
                    })
                },
                |model| {
                    model.remove_custom_food(&local_id);
                },
            )
            .await?;

        Ok(Entity::Provisional { local_id, data: food, queue_ref })
    }

    pub async fn create_recipe(&self, recipe: Recipe) -> Result<Entity<Recipe>, SyncError> {
        if let Online::Done(record) = self
            .try_online(EntityKind::Recipe, "create_recipe", self.remote.create_recipe(&recipe))
            .await?
        {
            self.read_model.write().upsert_recipe(record.clone());
            let cached = record.clone();
            self.patch_cached_list(&self.recipes_key(), move |list: &mut Vec<Record<Recipe>>| {
                upsert_record(list, cached)
            })
            .await;
            return Ok(Entity::confirmed(record));
        }

        let local_id = new_local_id();
        let new = NewItem::create(EntityKind::Recipe, serde_json::to_value(&recipe)?, local_id.clone());
        let queue_ref = self
            .queue_optimistic(
                new,
                |model, queue_ref| {
                    model.add_recipe(Entity::Provisional {
                        local_id: local_id.clone(),
                        data: recipe.clone(),
                        queue_ref,
                    })
                },
                |model| {
                    model.remove_recipe(&local_id);
                },
            )
            .await?;

        Ok(Entity::Provisional { local_id, data: recipe, queue_ref })
    }
}
