//! Shared fixtures: an in-process fake backend with failure injection.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use nutrisync::{
    CustomFood, FoodEntry, FoodSearchHit, KvStore, MealType, NetworkMonitor, Nutrition, Profile, Recipe, Record,
    RemoteApi, RemoteError, SyncConfig, SyncEngine,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
}

pub fn entry(name: &str, calories: f64) -> FoodEntry {
    FoodEntry {
        date: day(),
        meal_type: MealType::Lunch,
        food_name: name.to_string(),
        serving_g: 100.0,
        nutrition: Nutrition::new(calories, calories / 20.0, calories / 10.0, calories / 40.0),
    }
}

pub fn profile(name: &str) -> Profile {
    Profile {
        display_name: name.to_string(),
        goals: None,
        extra: Default::default(),
    }
}

pub fn custom_food(name: &str) -> CustomFood {
    CustomFood {
        name: name.to_string(),
        brand: None,
        serving_g: 50.0,
        nutrition: Nutrition::new(200.0, 10.0, 20.0, 5.0),
    }
}

/// Config with backoff and ticks short enough for tests.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        replay_initial_backoff_ms: 1,
        replay_max_backoff_ms: 5,
        retry_tick_ms: 20,
        ..Default::default()
    }
}

/// Engine over `store`, not started.
pub fn engine_on(
    remote: Arc<FakeRemote>,
    store: Arc<dyn KvStore>,
    online: bool,
    config: SyncConfig,
) -> (SyncEngine, Arc<NetworkMonitor>) {
    let monitor = Arc::new(NetworkMonitor::new(online));
    let engine = SyncEngine::new(config, "user-1", remote, store, monitor.clone());
    (engine, monitor)
}

pub fn engine(remote: Arc<FakeRemote>, online: bool) -> (SyncEngine, Arc<NetworkMonitor>) {
    engine_on(remote, Arc::new(nutrisync::InMemoryStore::new()), online, test_config())
}

/// In-memory backend. Records every call as `"{operation}"` and can fail
/// calls on demand.
pub struct FakeRemote {
    next_id: AtomicU64,
    calls: Mutex<Vec<String>>,
    profile: Mutex<Record<Profile>>,
    food_entries: Mutex<Vec<Record<FoodEntry>>>,
    custom_foods: Mutex<Vec<Record<CustomFood>>>,
    recipes: Mutex<Vec<Record<Recipe>>>,
    foods: Vec<FoodSearchHit>,
    /// One-shot failures: (operation, error), first match wins
    scripted: Mutex<VecDeque<(String, RemoteError)>>,
    /// Fail every call with this until cleared
    fail_all: Mutex<Option<RemoteError>>,
    delay: Mutex<Option<Duration>>,
    /// Held between reading the list and answering, so the answer can be
    /// older than the server state when it arrives
    list_delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            profile: Mutex::new(Record::new("user-1", profile("Sam"))),
            food_entries: Mutex::new(Vec::new()),
            custom_foods: Mutex::new(Vec::new()),
            recipes: Mutex::new(Vec::new()),
            foods: vec![
                FoodSearchHit {
                    id: "off-1".into(),
                    name: "Greek Yogurt".into(),
                    brand: Some("Fage".into()),
                    serving_g: 170.0,
                    nutrition: Nutrition::new(100.0, 18.0, 6.0, 0.0),
                },
                FoodSearchHit {
                    id: "off-2".into(),
                    name: "Rolled Oats".into(),
                    brand: None,
                    serving_g: 40.0,
                    nutrition: Nutrition::new(150.0, 5.0, 27.0, 3.0),
                },
            ],
            scripted: Mutex::new(VecDeque::new()),
            fail_all: Mutex::new(None),
            delay: Mutex::new(None),
            list_delay: Mutex::new(None),
        })
    }

    pub fn fail_next(&self, operation: &str, error: RemoteError) {
        self.scripted.lock().push_back((operation.to_string(), error));
    }

    pub fn fail_all(&self, error: Option<RemoteError>) {
        *self.fail_all.lock() = error;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn delay_list_responses(&self, delay: Option<Duration>) {
        *self.list_delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == operation).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn stored_food_entries(&self) -> Vec<Record<FoodEntry>> {
        self.food_entries.lock().clone()
    }

    pub fn stored_profile(&self) -> Record<Profile> {
        self.profile.lock().clone()
    }

    pub fn seed_food_entry(&self, entry: FoodEntry) -> Record<FoodEntry> {
        let record = Record::new(self.issue_id("fe"), entry);
        self.food_entries.lock().push(record.clone());
        record
    }

    fn issue_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn begin(&self, operation: &str) -> Result<(), RemoteError> {
        self.calls.lock().push(operation.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_all.lock().clone() {
            return Err(err);
        }
        let mut scripted = self.scripted.lock();
        if let Some(pos) = scripted.iter().position(|(op, _)| op == operation) {
            if let Some((_, err)) = scripted.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn get_profile(&self) -> Result<Record<Profile>, RemoteError> {
        self.begin("get_profile").await?;
        Ok(self.profile.lock().clone())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<Record<Profile>, RemoteError> {
        self.begin("update_profile").await?;
        let mut stored = self.profile.lock();
        stored.data = profile.clone();
        Ok(stored.clone())
    }

    async fn list_food_entries(&self, date: NaiveDate) -> Result<Vec<Record<FoodEntry>>, RemoteError> {
        self.begin("list_food_entries").await?;
        let listed: Vec<Record<FoodEntry>> = self
            .food_entries
            .lock()
            .iter()
            .filter(|r| r.data.date == date)
            .cloned()
            .collect();
        let list_delay = *self.list_delay.lock();
        if let Some(delay) = list_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(listed)
    }

    async fn log_food_entry(&self, entry: &FoodEntry) -> Result<Record<FoodEntry>, RemoteError> {
        self.begin("log_food_entry").await?;
        let record = Record::new(self.issue_id("fe"), entry.clone());
        self.food_entries.lock().push(record.clone());
        Ok(record)
    }

    async fn delete_food_entry(&self, id: &str) -> Result<(), RemoteError> {
        self.begin("delete_food_entry").await?;
        let mut entries = self.food_entries.lock();
        let before = entries.len();
        entries.retain(|r| r.id != id);
        if entries.len() == before {
            return Err(RemoteError::Validation(format!("no food entry {}", id)));
        }
        Ok(())
    }

    async fn search_foods(&self, query: &str) -> Result<Vec<FoodSearchHit>, RemoteError> {
        self.begin("search_foods").await?;
        Ok(self
            .foods
            .iter()
            .filter(|f| f.name.to_lowercase().contains(query))
            .cloned()
            .collect())
    }

    async fn list_custom_foods(&self) -> Result<Vec<Record<CustomFood>>, RemoteError> {
        self.begin("list_custom_foods").await?;
        Ok(self.custom_foods.lock().clone())
    }

    async fn create_custom_food(&self, food: &CustomFood) -> Result<Record<CustomFood>, RemoteError> {
        self.begin("create_custom_food").await?;
        let record = Record::new(self.issue_id("cf"), food.clone());
        self.custom_foods.lock().push(record.clone());
        Ok(record)
    }

    async fn list_recipes(&self) -> Result<Vec<Record<Recipe>>, RemoteError> {
        self.begin("list_recipes").await?;
        Ok(self.recipes.lock().clone())
    }

    async fn create_recipe(&self, recipe: &Recipe) -> Result<Record<Recipe>, RemoteError> {
        self.begin("create_recipe").await?;
        let record = Record::new(self.issue_id("rc"), recipe.clone());
        self.recipes.lock().push(record.clone());
        Ok(record)
    }
}
