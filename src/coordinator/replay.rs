//! Queue replay and reconciliation for the coordinator.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{remove_record, upsert_record, Coordinator};
use crate::events::SyncEvent;
use crate::models::{CustomFood, FoodEntry, Profile, Recipe, Record};
use crate::queue::{EntityKind, EntityRef, FailureDisposition, OperationType, ReplayHandler, SyncQueueItem};
use crate::remote::RemoteError;

#[async_trait]
impl ReplayHandler for Coordinator {
    async fn replay(&self, item: &SyncQueueItem) -> Result<Value, RemoteError> {
        match (item.entity_kind, item.operation_type) {
            (EntityKind::FoodEntry, OperationType::Create) => {
                let entry: FoodEntry = payload(item)?;
                to_canonical(self.call("log_food_entry", self.remote.log_food_entry(&entry)).await?)
            }
            (EntityKind::FoodEntry, OperationType::Delete) => match &item.target {
                Some(EntityRef::Server(id)) => {
                    self.call("delete_food_entry", self.remote.delete_food_entry(id)).await?;
                    Ok(Value::Null)
                }
                _ => Err(RemoteError::Validation(
                    "delete target never reached the server".to_string(),
                )),
            },
            (EntityKind::Profile, OperationType::Update) => {
                let profile: Profile = payload(item)?;
                to_canonical(self.call("update_profile", self.remote.update_profile(&profile)).await?)
            }
            (EntityKind::CustomFood, OperationType::Create) => {
                let food: CustomFood = payload(item)?;
                to_canonical(self.call("create_custom_food", self.remote.create_custom_food(&food)).await?)
            }
            (EntityKind::Recipe, OperationType::Create) => {
                let recipe: Recipe = payload(item)?;
                to_canonical(self.call("create_recipe", self.remote.create_recipe(&recipe)).await?)
            }
            (kind, op) => Err(RemoteError::Validation(format!(
                "unsupported queued operation {:?} on {}",
                op, kind
            ))),
        }
    }

    fn reconcile(&self, item: &SyncQueueItem, canonical: &Value) {
        let local_id = item.local_id.as_deref();
        match (item.entity_kind, item.operation_type) {
            (EntityKind::FoodEntry, OperationType::Create) => {
                let Some(record) = parse::<FoodEntry>(canonical) else { return };
                if let Some(local_id) = local_id {
                    let rewritten = self.queue.rewrite_local_target(local_id, &record.id);
                    if rewritten > 0 {
                        debug!(local_id, server_id = %record.id, rewritten, "Pending deletes retargeted");
                    }
                    self.read_model.write().confirm_food_entry(local_id, record);
                } else {
                    self.read_model.write().upsert_food_entry(record);
                }
            }
            (EntityKind::FoodEntry, OperationType::Delete) => {
                if let Some(EntityRef::Server(id)) = &item.target {
                    self.read_model.write().remove_food_entry(id);
                }
            }
            (EntityKind::Profile, OperationType::Update) => {
                if let Some(record) = parse::<Profile>(canonical) {
                    self.read_model.write().confirm_profile(item.sequence, record);
                }
            }
            (EntityKind::CustomFood, OperationType::Create) => {
                if let (Some(local_id), Some(record)) = (local_id, parse::<CustomFood>(canonical)) {
                    self.read_model.write().confirm_custom_food(local_id, record);
                }
            }
            (EntityKind::Recipe, OperationType::Create) => {
                if let (Some(local_id), Some(record)) = (local_id, parse::<Recipe>(canonical)) {
                    self.read_model.write().confirm_recipe(local_id, record);
                }
            }
            _ => {}
        }
    }

    async fn after_confirmed(&self, item: &SyncQueueItem, canonical: Value) {
        let server_id = match (&item.target, canonical.get("id").and_then(Value::as_str)) {
            (_, Some(id)) => Some(id.to_string()),
            (Some(EntityRef::Server(id)), None) => Some(id.clone()),
            _ => None,
        };

        match (item.entity_kind, item.operation_type) {
            (EntityKind::FoodEntry, OperationType::Create) => {
                if let Some(record) = parse::<FoodEntry>(&canonical) {
                    let key = self.food_entries_key(record.data.date);
                    self.patch_cached_list(&key, move |list: &mut Vec<Record<FoodEntry>>| upsert_record(list, record))
                        .await;
                }
            }
            (EntityKind::FoodEntry, OperationType::Delete) => {
                let date = item
                    .payload
                    .get("date")
                    .and_then(|d| serde_json::from_value::<NaiveDate>(d.clone()).ok());
                match (date, server_id.clone()) {
                    (Some(date), Some(id)) => {
                        self.patch_cached_list(&self.food_entries_key(date), move |list: &mut Vec<Record<FoodEntry>>| {
                            remove_record(list, &id)
                        })
                        .await;
                    }
                    (None, Some(id)) => self.uncache_food_entry(&id).await,
                    _ => {}
                }
            }
            (EntityKind::Profile, OperationType::Update) => {
                if let Some(record) = parse::<Profile>(&canonical) {
                    self.cache_profile(&record).await;
                }
            }
            (EntityKind::CustomFood, OperationType::Create) => {
                if let Some(record) = parse::<CustomFood>(&canonical) {
                    self.patch_cached_list(&self.custom_foods_key(), move |list: &mut Vec<Record<CustomFood>>| {
                        upsert_record(list, record)
                    })
                    .await;
                }
            }
            (EntityKind::Recipe, OperationType::Create) => {
                if let Some(record) = parse::<Recipe>(&canonical) {
                    self.patch_cached_list(&self.recipes_key(), move |list: &mut Vec<Record<Recipe>>| {
                        upsert_record(list, record)
                    })
                    .await;
                }
            }
            _ => {}
        }

        self.emit(SyncEvent::WriteConfirmed {
            entity: item.entity_kind,
            operation: item.operation_type,
            local_id: item.local_id.clone(),
            server_id,
        });
    }

    async fn failed(&self, item: &SyncQueueItem, error: &RemoteError, disposition: FailureDisposition) {
        match disposition {
            FailureDisposition::Terminal => {
                self.roll_back(item).await;
                self.emit(SyncEvent::WriteFailed {
                    entity: item.entity_kind,
                    operation: item.operation_type,
                    local_id: item.local_id.clone(),
                    error: error.clone(),
                });
            }
            FailureDisposition::AuthRequired => {
                self.emit(SyncEvent::AuthRequired { error: error.clone() });
            }
            FailureDisposition::Retrying { attempts, .. } => {
                debug!(sequence = item.sequence, attempts, "Replay will be retried");
            }
        }
    }

    fn is_online(&self) -> bool {
        self.monitor.is_available()
    }
}

impl Coordinator {
    /// Undo the optimistic effect of a write that will never land.
    async fn roll_back(&self, item: &SyncQueueItem) {
        let Some(local_id) = item.local_id.as_deref() else {
            return;
        };
        match (item.entity_kind, item.operation_type) {
            (EntityKind::FoodEntry, OperationType::Create) => {
                self.read_model.write().remove_food_entry(local_id);
                // Deletes queued against this entry have nothing left to delete
                let orphaned: Vec<u64> = self
                    .queue
                    .snapshot()
                    .into_iter()
                    .filter(|i| i.target.as_ref() == Some(&EntityRef::Local(local_id.to_string())))
                    .map(|i| i.sequence)
                    .collect();
                for sequence in orphaned {
                    if let Err(e) = self.queue.cancel(sequence).await {
                        warn!(sequence, error = %e, "Failed to drop orphaned delete");
                    }
                }
            }
            (EntityKind::Profile, OperationType::Update) => {
                self.read_model.write().drop_profile_overlay(item.sequence);
            }
            (EntityKind::CustomFood, OperationType::Create) => {
                self.read_model.write().remove_custom_food(local_id);
            }
            (EntityKind::Recipe, OperationType::Create) => {
                self.read_model.write().remove_recipe(local_id);
            }
            _ => {}
        }
        debug!(sequence = item.sequence, local_id, "Optimistic write rolled back");
    }
}

fn payload<T: DeserializeOwned>(item: &SyncQueueItem) -> Result<T, RemoteError> {
    serde_json::from_value(item.payload.clone())
        .map_err(|e| RemoteError::Validation(format!("unreadable queued payload: {}", e)))
}

fn to_canonical<T: Serialize>(record: T) -> Result<Value, RemoteError> {
    serde_json::to_value(record).map_err(|e| RemoteError::Server(format!("unreadable server record: {}", e)))
}

fn parse<T: DeserializeOwned>(canonical: &Value) -> Option<Record<T>> {
    match serde_json::from_value(canonical.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "Confirmed record could not be read back");
            None
        }
    }
}
