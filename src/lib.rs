//! # nutrisync
//!
//! Offline-first sync and caching engine for a nutrition-tracking client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Data-Access Layer                       │
//! │  • profile, food entries, custom foods, recipes, search    │
//! │  • pure daily aggregates (totals, macro split, remaining)  │
//! └─────────────────────────────────────────────────────────────┘
//!              │ reads                          │ writes
//!              ▼                                ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │   Fallback Resolver       │   │   Mutation Coordinator      │
//! │  • network first, 30s cap │   │  • online: server, patch    │
//! │  • stale-if-error cache   │   │  • offline: provisional +   │
//! │                           │   │    queue, reconcile later   │
//! └───────────────────────────┘   └─────────────────────────────┘
//!              │                                │
//!              ▼                                ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │   Cache Store             │   │   Sync Queue                │
//! │  • versioned, TTL-bound   │   │  • durable FIFO, capped     │
//! │  • `cache:` namespace     │   │  • single-flight drain      │
//! └───────────────────────────┘   └─────────────────────────────┘
//!              └──────────────┬─────────────────┘
//!                             ▼
//!              ┌─────────────────────────────┐
//!              │  KvStore (SQLite / memory)  │
//!              └─────────────────────────────┘
//!
//!   Network Monitor ── offline→online edge ──► queue drain
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use nutrisync::{FoodEntry, MealType, NetworkMonitor, Nutrition, RemoteApi, SyncConfig, SyncEngine};
//!
//! # async fn demo(remote: Arc<dyn RemoteApi>) -> Result<(), nutrisync::SyncError> {
//! let monitor = Arc::new(NetworkMonitor::new(false));
//! let engine = SyncEngine::open(SyncConfig::default(), "user-1", remote, monitor.clone()).await?;
//! engine.start().await?;
//!
//! // Offline: shows up immediately as a provisional entry
//! let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
//! engine.data().log_food(FoodEntry {
//!     date,
//!     meal_type: MealType::Lunch,
//!     food_name: "Lentil soup".into(),
//!     serving_g: 300.0,
//!     nutrition: Nutrition::new(270.0, 18.0, 40.0, 4.0),
//! }).await?;
//! assert_eq!(engine.sync_queue_length(), 1);
//!
//! // Back online: the run loop drains the queue on its own
//! monitor.report(true);
//! engine.force_sync_now().await?;
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: The [`SyncEngine`] service object and management surface
//! - [`data`]: Domain reads/writes and daily aggregates
//! - [`resolver`]: Stale-if-error reads
//! - [`coordinator`]: Optimistic writes and reconciliation
//! - [`queue`]: Durable offline write queue
//! - [`cache`]: Versioned TTL cache and key builders
//! - [`network`]: Connectivity state and transitions
//! - [`storage`]: Key/value backends (SQLite, memory)
//! - [`resilience`]: Retry logic

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod network;
pub mod queue;
pub mod remote;
pub mod resilience;
pub mod resolver;
pub mod storage;

mod clock;

pub use cache::{CacheEntry, CacheInfo, CacheOptions, CacheStore};
pub use config::SyncConfig;
pub use coordinator::{Coordinator, Entity};
pub use data::{DailySummary, MacroPercentages, NutritionData};
pub use engine::{EngineState, SyncEngine, SyncStatus};
pub use error::SyncError;
pub use events::SyncEvent;
pub use models::{
    CustomFood, FoodEntry, FoodSearchHit, MealType, Nutrition, NutritionGoals, Profile, Recipe, RecipeIngredient,
    Record,
};
pub use network::{ConnectivityProbe, NetworkMonitor, NetworkState, Transition};
pub use queue::{DrainReport, EntityKind, EntityRef, OperationType, QueuePressure, SyncQueue, SyncQueueItem};
pub use remote::{ErrorKind, RemoteApi, RemoteError};
pub use resilience::retry::RetryConfig;
pub use resolver::{Resolved, Resolver, Source};
pub use storage::memory::InMemoryStore;
pub use storage::sql::SqlStore;
pub use storage::traits::{KvStore, StorageError};
pub use metrics::LatencyTimer;
