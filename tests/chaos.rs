//! Chaos testing for the offline engine.
//!
//! Covers failure scenarios using:
//! 1. **FailingStore wrapper** - storage errors injected on demand
//! 2. **Scripted backend failures** - auth, server and network errors during replay
//! 3. **Data corruption** - garbage documents in the local store
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{custom_food, day, engine, engine_on, entry, init_tracing, test_config, FakeRemote};
use nutrisync::{
    EngineState, ErrorKind, InMemoryStore, KvStore, RemoteError, StorageError, SyncConfig, SyncError, SyncEvent,
};

// =============================================================================
// Failing Store Wrapper - Precise Error Injection
// =============================================================================

/// Wraps a store and fails writes while `fail_writes` is set, or the next
/// `queue_put_failures` writes of the queue document.
pub struct FailingStore {
    inner: InMemoryStore,
    fail_writes: AtomicBool,
    queue_put_failures: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            fail_writes: AtomicBool::new(false),
            queue_put_failures: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn fail_queue_puts(&self, count: usize) {
        self.queue_put_failures.store(count, Ordering::SeqCst);
    }

    fn maybe_fail_queue(&self, key: &str) -> Result<(), StorageError> {
        if key != "sync_queue" {
            return Ok(());
        }
        let failed = self
            .queue_put_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StorageError::Backend("write interrupted".to_string()))
        } else {
            Ok(())
        }
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Backend("disk full".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.maybe_fail_queue(key)?;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        self.inner.scan_prefix(prefix).await
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        self.inner.count_prefix(prefix).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        self.maybe_fail()?;
        self.inner.delete_prefix(prefix).await
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

// =============================================================================
// Chaos Tests - Local Storage Failures
// =============================================================================

#[tokio::test]
async fn chaos_queue_persist_failure_rolls_back_optimistic_write() {
    init_tracing();
    let store = FailingStore::new();
    let remote = FakeRemote::new();
    let (engine, _monitor) = engine_on(remote, store.clone(), false, test_config());

    store.set_failing(true);
    let err = engine.data().log_food(entry("Lost", 100.0)).await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(StorageError::Backend(_))));

    assert_eq!(engine.sync_queue_length(), 0);
    let shown = engine.data().food_entries(day()).await.map(|l| l.len()).unwrap_or(0);
    assert_eq!(shown, 0, "no phantom provisional entry");

    store.set_failing(false);
    engine.data().log_food(entry("Kept", 100.0)).await.unwrap();
    assert_eq!(engine.sync_queue_length(), 1);
}

#[tokio::test]
async fn chaos_transient_persist_failure_after_replay_is_retried() {
    init_tracing();
    let store = FailingStore::new();
    let remote = FakeRemote::new();
    {
        let (engine, monitor) = engine_on(remote.clone(), store.clone(), false, test_config());
        engine.data().log_food(entry("A", 100.0)).await.unwrap();
        engine.data().log_food(entry("B", 200.0)).await.unwrap();

        store.fail_queue_puts(2);
        monitor.report(true);
        let report = engine.force_sync_now().await.unwrap();
        assert_eq!(report.confirmed, 2);
        assert!(!report.unsaved);
        // Dropped without shutdown, as in a crash
    }

    let (engine, _monitor) = engine_on(remote.clone(), store.clone(), false, test_config());
    engine.start().await.unwrap();
    assert_eq!(engine.sync_queue_length(), 0);
    assert_eq!(remote.calls_to("log_food_entry"), 2);
    assert_eq!(remote.stored_food_entries().len(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn chaos_unsaved_replay_holds_queue_until_flushed() {
    init_tracing();
    let store = FailingStore::new();
    let remote = FakeRemote::new();
    {
        let (engine, monitor) = engine_on(remote.clone(), store.clone(), false, test_config());
        let mut events = engine.subscribe_events();
        engine.data().log_food(entry("A", 100.0)).await.unwrap();
        engine.data().log_food(entry("B", 200.0)).await.unwrap();

        // Every retry of the write after the first confirmation fails
        store.fail_queue_puts(3);
        monitor.report(true);
        let report = engine.force_sync_now().await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert!(report.unsaved);
        assert_eq!(remote.calls_to("log_food_entry"), 1, "second write held back");
        assert_eq!(engine.sync_queue_length(), 1);

        let mut saw_unsaved = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::DrainCompleted(r) = event {
                saw_unsaved |= r.unsaved;
            }
        }
        assert!(saw_unsaved);

        // Storage is back: the next pass writes the document first, then drains
        let report = engine.force_sync_now().await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert!(!report.unsaved);
    }

    let (engine, _monitor) = engine_on(remote.clone(), store.clone(), false, test_config());
    engine.start().await.unwrap();
    assert_eq!(engine.sync_queue_length(), 0);
    let names: Vec<String> = remote.stored_food_entries().into_iter().map(|r| r.data.food_name).collect();
    assert_eq!(names, vec!["A", "B"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn chaos_cache_write_failure_does_not_fail_read() {
    let store = FailingStore::new();
    let remote = FakeRemote::new();
    remote.seed_food_entry(entry("Toast", 180.0));
    let (engine, _monitor) = engine_on(remote, store.clone(), true, test_config());

    store.set_failing(true);
    let entries = engine.data().food_entries(day()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(engine.cache_size().await.unwrap(), 0);
}

#[tokio::test]
async fn chaos_corrupt_queue_document_fails_start() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    store.put("sync_queue", "{\"items\": [ truncated").await.unwrap();

    let (engine, _monitor) = engine_on(FakeRemote::new(), store.clone(), false, test_config());
    let err = engine.start().await.unwrap_err();

    assert!(matches!(err, SyncError::Storage(StorageError::Corruption { .. })));
    assert_eq!(engine.state(), EngineState::Stopped);
    // The document is left for inspection, not discarded
    assert!(store.get("sync_queue").await.unwrap().is_some());
}

#[tokio::test]
async fn chaos_corrupt_cache_entry_reads_as_absent() {
    let store = Arc::new(InMemoryStore::new());
    store.put("cache:user:user-1:profile", "not json at all").await.unwrap();

    let (engine, _monitor) = engine_on(FakeRemote::new(), store.clone(), false, test_config());
    let err = engine.data().profile().await.unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::Network));
    assert!(store.get("cache:user:user-1:profile").await.unwrap().is_none());
}

#[tokio::test]
async fn chaos_cache_version_bump_invalidates_entries() {
    let store = Arc::new(InMemoryStore::new());
    let remote = FakeRemote::new();
    {
        let (engine, _monitor) = engine_on(remote.clone(), store.clone(), true, test_config());
        engine.data().profile().await.unwrap();
    }

    let config = SyncConfig {
        cache_version: "2".into(),
        ..test_config()
    };
    let (engine, _monitor) = engine_on(remote, store, false, config);
    assert!(engine.data().profile().await.is_err());
}

// =============================================================================
// Chaos Tests - Replay Failures
// =============================================================================

#[tokio::test]
async fn chaos_auth_error_pauses_queue_until_forced_sync() {
    init_tracing();
    let remote = FakeRemote::new();
    let (engine, monitor) = engine(remote.clone(), false);
    engine.start().await.unwrap();
    let mut events = engine.subscribe_events();

    engine.data().log_food(entry("A", 100.0)).await.unwrap();
    engine.data().log_food(entry("B", 200.0)).await.unwrap();

    remote.fail_all(Some(RemoteError::Auth("token expired".into())));
    monitor.report(true);

    assert!(wait_until(|| remote.calls_to("log_food_entry") > 0).await);
    let mut awaiting = false;
    for _ in 0..200 {
        if engine.status().await.unwrap().awaiting_auth {
            awaiting = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(awaiting);
    assert_eq!(engine.sync_queue_length(), 2, "nothing dropped on auth failure");
    assert_eq!(engine.pending_writes()[0].attempts, 0);

    // Several retry ticks pass without replay while the hold is set
    remote.fail_all(None);
    let calls = remote.calls_to("log_food_entry");
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(remote.calls_to("log_food_entry"), calls);

    engine.force_sync_now().await.unwrap();
    assert_eq!(engine.sync_queue_length(), 0);
    assert_eq!(remote.stored_food_entries().len(), 2);
    assert!(!engine.status().await.unwrap().awaiting_auth);

    let mut saw_auth = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SyncEvent::AuthRequired { .. }) {
            saw_auth = true;
        }
    }
    assert!(saw_auth);

    engine.shutdown().await;
}

#[tokio::test]
async fn chaos_server_error_backs_off_then_succeeds() {
    let remote = FakeRemote::new();
    let (engine, monitor) = engine(remote.clone(), false);
    engine.data().log_food(entry("A", 100.0)).await.unwrap();

    remote.fail_next("log_food_entry", RemoteError::Server("502".into()));
    monitor.report(true);

    let report = engine.force_sync_now().await.unwrap();
    assert_eq!(report.retrying, 1);
    let item = engine.pending_writes().remove(0);
    assert_eq!(item.attempts, 1);
    assert!(item.next_attempt_at.is_some());
    assert!(item.last_error.unwrap().contains("502"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = engine.force_sync_now().await.unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(engine.sync_queue_length(), 0);
}

#[tokio::test]
async fn chaos_server_error_blocks_only_its_own_stream() {
    let remote = FakeRemote::new();
    let (engine, monitor) = engine(remote.clone(), false);
    engine.data().log_food(entry("A", 100.0)).await.unwrap();
    engine.data().log_food(entry("A2", 100.0)).await.unwrap();
    engine.data().create_custom_food(custom_food("B")).await.unwrap();

    remote.fail_next("log_food_entry", RemoteError::Server("500".into()));
    monitor.report(true);
    let report = engine.force_sync_now().await.unwrap();

    assert_eq!(report.retrying, 1);
    assert_eq!(report.confirmed, 1);
    // A2 must not overtake A
    assert_eq!(remote.calls_to("log_food_entry"), 1);
    assert_eq!(remote.calls_to("create_custom_food"), 1);
    assert_eq!(engine.sync_queue_length(), 2);
}

#[tokio::test]
async fn chaos_network_error_mid_drain_stops_pass() {
    let remote = FakeRemote::new();
    let (engine, monitor) = engine(remote.clone(), false);
    engine.data().log_food(entry("A", 100.0)).await.unwrap();
    engine.data().create_custom_food(custom_food("B")).await.unwrap();

    remote.fail_next("log_food_entry", RemoteError::Network("socket closed".into()));
    monitor.report(true);
    let report = engine.force_sync_now().await.unwrap();

    assert_eq!(report.halted, Some(ErrorKind::Network));
    assert_eq!(remote.calls().len(), 1);
    assert_eq!(engine.sync_queue_length(), 2);
}

#[tokio::test]
async fn chaos_exhausted_attempts_drop_item() {
    let remote = FakeRemote::new();
    let config = SyncConfig {
        replay_max_attempts: 2,
        ..test_config()
    };
    let (engine, monitor) = engine_on(remote.clone(), Arc::new(InMemoryStore::new()), false, config);
    engine.data().log_food(entry("Doomed", 100.0)).await.unwrap();

    remote.fail_all(Some(RemoteError::Server("500".into())));
    monitor.report(true);

    let first = engine.force_sync_now().await.unwrap();
    assert_eq!(first.retrying, 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = engine.force_sync_now().await.unwrap();
    assert_eq!(second.failed, 1);

    assert_eq!(engine.sync_queue_length(), 0);
    remote.fail_all(None);
    assert!(engine.data().food_entries(day()).await.unwrap().is_empty());
}

// =============================================================================
// Chaos Tests - Slow Backend
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_slow_read_times_out_to_cache() {
    let remote = FakeRemote::new();
    remote.seed_food_entry(entry("Toast", 180.0));
    let (engine, _monitor) = engine(remote.clone(), true);
    engine.data().food_entries(day()).await.unwrap();

    remote.set_delay(Some(Duration::from_secs(120)));
    let entries = engine.data().food_entries(day()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].is_provisional());
}

#[tokio::test(start_paused = true)]
async fn chaos_slow_write_times_out_to_queue() {
    let remote = FakeRemote::new();
    remote.set_delay(Some(Duration::from_secs(120)));
    let (engine, _monitor) = engine(remote.clone(), true);

    let logged = engine.data().log_food(entry("A", 100.0)).await.unwrap();
    assert!(logged.is_provisional());
    assert_eq!(engine.sync_queue_length(), 1);
}

// =============================================================================
// Chaos Tests - Lifecycle Edge Cases
// =============================================================================

#[tokio::test]
async fn chaos_double_start() {
    let (engine, _monitor) = engine(FakeRemote::new(), true);
    engine.start().await.unwrap();
    engine.start().await.unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    engine.shutdown().await;
}

#[tokio::test]
async fn chaos_shutdown_without_start() {
    let (engine, _monitor) = engine(FakeRemote::new(), true);
    assert_eq!(engine.state(), EngineState::Created);
    engine.shutdown().await;
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn chaos_writes_after_shutdown_stay_queued() {
    let remote = FakeRemote::new();
    let (engine, _monitor) = engine(remote.clone(), false);
    engine.start().await.unwrap();
    engine.shutdown().await;

    engine.data().log_food(entry("Late", 100.0)).await.unwrap();
    assert_eq!(engine.sync_queue_length(), 1);
}
