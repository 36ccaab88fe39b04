//! Domain data access.
//!
//! Reads go through the [`Resolver`] (network first, cache as safety net)
//! and are then overlaid with pending local writes by the coordinator.
//! Writes go straight to the [`Coordinator`].
//!
//! | read           | cache key                               | TTL (default) |
//! |----------------|-----------------------------------------|---------------|
//! | profile        | `cache:user:{user}:profile`             | 24 h          |
//! | food entries   | `cache:date:{user}:{date}:food_entries` | 5 min         |
//! | custom foods   | `cache:user:{user}:custom_foods`        | 1 h           |
//! | recipes        | `cache:user:{user}:recipes`             | 1 h           |
//! | food search    | `cache:search:{normalized query}`       | 2 min         |

pub mod aggregates;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::keys::{normalize_query, search_key};
use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::coordinator::{Collection, Coordinator, Entity};
use crate::error::SyncError;
use crate::models::{CustomFood, FoodEntry, FoodSearchHit, Profile, Recipe};
use crate::remote::{ErrorKind, RemoteApi, RemoteError};
use crate::resolver::Resolver;

pub use aggregates::{daily_totals, macro_percentages, meal_breakdown, remaining_to_goal, DailySummary, MacroPercentages};

#[derive(Debug, Clone, Copy)]
struct Ttls {
    profile: Duration,
    food_entries: Duration,
    search: Duration,
    custom_foods: Duration,
    recipes: Duration,
}

pub struct NutritionData {
    coordinator: Arc<Coordinator>,
    resolver: Resolver,
    remote: Arc<dyn RemoteApi>,
    cache: CacheStore,
    ttls: Ttls,
    search_debounce: Duration,
    search_min_chars: usize,
    /// Bumped by every search call; a call that sees a newer value after its
    /// debounce window has been superseded
    search_generation: AtomicU64,
}

impl NutritionData {
    pub fn new(
        coordinator: Arc<Coordinator>,
        resolver: Resolver,
        remote: Arc<dyn RemoteApi>,
        cache: CacheStore,
        config: &SyncConfig,
    ) -> Self {
        Self {
            coordinator,
            resolver,
            remote,
            cache,
            ttls: Ttls {
                profile: Duration::from_millis(config.profile_ttl_ms),
                food_entries: Duration::from_millis(config.food_entries_ttl_ms),
                search: Duration::from_millis(config.search_ttl_ms),
                custom_foods: Duration::from_millis(config.custom_foods_ttl_ms),
                recipes: Duration::from_millis(config.recipes_ttl_ms),
            },
            search_debounce: Duration::from_millis(config.search_debounce_ms),
            search_min_chars: config.search_min_chars,
            search_generation: AtomicU64::new(0),
        }
    }

    // ---- reads ----

    pub async fn profile(&self) -> Result<Entity<Profile>, SyncError> {
        let key = self.coordinator.profile_key();
        let remote = self.remote.clone();
        let (since, fetched) = self
            .fetch(&key, self.ttls.profile, Collection::Profile, || async move { remote.get_profile().await })
            .await;
        match fetched {
            Ok(record) => Ok(self.coordinator.merge_profile(record, since)),
            Err(e) => local_or(e, self.coordinator.local_profile()),
        }
    }

    /// Entries logged on `date`, pending local entries included.
    pub async fn food_entries(&self, date: NaiveDate) -> Result<Vec<Entity<FoodEntry>>, SyncError> {
        let key = self.coordinator.food_entries_key(date);
        let remote = self.remote.clone();
        let (since, fetched) = self
            .fetch(&key, self.ttls.food_entries, Collection::FoodEntries(date), || async move {
                remote.list_food_entries(date).await
            })
            .await;
        match fetched {
            Ok(list) => Ok(self.coordinator.merge_food_entries(date, list, since)),
            Err(e) => local_or(e, self.coordinator.local_food_entries(date)),
        }
    }

    pub async fn custom_foods(&self) -> Result<Vec<Entity<CustomFood>>, SyncError> {
        let key = self.coordinator.custom_foods_key();
        let remote = self.remote.clone();
        let (since, fetched) = self
            .fetch(&key, self.ttls.custom_foods, Collection::CustomFoods, || async move {
                remote.list_custom_foods().await
            })
            .await;
        match fetched {
            Ok(list) => Ok(self.coordinator.merge_custom_foods(list, since)),
            Err(e) => local_or(e, self.coordinator.local_custom_foods()),
        }
    }

    pub async fn recipes(&self) -> Result<Vec<Entity<Recipe>>, SyncError> {
        let key = self.coordinator.recipes_key();
        let remote = self.remote.clone();
        let (since, fetched) = self
            .fetch(&key, self.ttls.recipes, Collection::Recipes, || async move { remote.list_recipes().await })
            .await;
        match fetched {
            Ok(list) => Ok(self.coordinator.merge_recipes(list, since)),
            Err(e) => local_or(e, self.coordinator.local_recipes()),
        }
    }

    /// Resolve one collection. A replay or online write that lands on
    /// `collection` while the fetch is in flight makes the answer stale: it
    /// is not cached, and the returned revision makes the merge keep the
    /// local view.
    async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        collection: Collection,
        fetcher: F,
    ) -> (u64, Result<T, RemoteError>)
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let since = self.coordinator.read_revision();
        let options = self.cache.options(ttl);
        let fetched = self
            .resolver
            .resolve_guarded(key, &options, fetcher, || self.coordinator.changed_since(collection, since))
            .await
            .map(|resolved| resolved.value);
        (since, fetched)
    }

    /// Debounced food search.
    ///
    /// Returns `Ok(None)` when a newer search started within the debounce
    /// window; the newer call owns the result. Queries shorter than the
    /// minimum length return an empty list without touching the network.
    pub async fn search_foods(&self, query: &str) -> Result<Option<Vec<FoodSearchHit>>, SyncError> {
        let generation = self.search_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let normalized = normalize_query(query);
        if normalized.chars().count() < self.search_min_chars {
            return Ok(Some(Vec::new()));
        }

        tokio::time::sleep(self.search_debounce).await;
        if self.search_generation.load(Ordering::Acquire) != generation {
            debug!(query = %normalized, "Search superseded");
            return Ok(None);
        }

        let options = self.cache.options(self.ttls.search);
        let remote = self.remote.clone();
        let q = normalized.clone();
        let hits = self
            .resolver
            .get_with_fallback(&search_key(&normalized), &options, || async move { remote.search_foods(&q).await })
            .await?;
        Ok(Some(hits))
    }

    /// Totals, macro split, per-meal subtotals and remaining-to-goal for a
    /// day. Goals come from the profile when it can be read at all.
    pub async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, SyncError> {
        let entries = self.food_entries(date).await?;
        let goals = match self.profile().await {
            Ok(profile) => profile.data().goals,
            Err(e) => {
                debug!(error = %e, "Profile unavailable, summary without goals");
                None
            }
        };
        Ok(DailySummary::compute(date, &entries, goals.as_ref()))
    }

    // ---- writes ----

    pub async fn log_food(&self, entry: FoodEntry) -> Result<Entity<FoodEntry>, SyncError> {
        self.coordinator.log_food(entry).await
    }

    pub async fn delete_food(&self, id: &str) -> Result<(), SyncError> {
        self.coordinator.delete_food(id).await
    }

    pub async fn update_profile(&self, profile: Profile) -> Result<Entity<Profile>, SyncError> {
        self.coordinator.update_profile(profile).await
    }

    pub async fn create_custom_food(&self, food: CustomFood) -> Result<Entity<CustomFood>, SyncError> {
        self.coordinator.create_custom_food(food).await
    }

    pub async fn create_recipe(&self, recipe: Recipe) -> Result<Entity<Recipe>, SyncError> {
        self.coordinator.create_recipe(recipe).await
    }
}

/// A network failure with nothing cached still shows what is held locally
/// (earlier loads plus pending writes), if anything.
fn local_or<T>(err: RemoteError, local: Option<T>) -> Result<T, SyncError> {
    match local {
        Some(value) if err.kind() == ErrorKind::Network => Ok(value),
        _ => Err(err.into()),
    }
}
