//! Engine lifecycle management: start, shutdown, run loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::{Drainer, EngineState, SyncEngine};
use crate::error::SyncError;
use crate::events::{emit, SyncEvent};
use crate::network::{spawn_polling, ConnectivityProbe, NetworkMonitor};
use crate::queue::SyncQueue;

impl SyncEngine {
    /// Start the engine.
    ///
    /// 1. Restore the offline queue from storage
    /// 2. Re-apply pending writes to the read model as provisional entities
    /// 3. Spawn the run loop (drain on reconnect, periodic retry tick)
    ///
    /// A corrupt queue document fails startup rather than being discarded.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SyncError> {
        if self.state() != EngineState::Created {
            warn!(state = %self.state(), "start() called twice, ignoring");
            return Ok(());
        }
        let _ = self.state.send(EngineState::Starting);
        let started = std::time::Instant::now();

        let pending = match self.queue.restore().await {
            Ok(pending) => pending,
            Err(e) => {
                crate::metrics::record_error("engine", "start", "storage");
                let _ = self.state.send(EngineState::Stopped);
                return Err(e.into());
            }
        };
        let rehydrated = self.coordinator.rehydrate();

        let run_loop = RunLoop {
            monitor: self.monitor.clone(),
            queue: self.queue.clone(),
            drainer: self.drainer.clone(),
            events: self.events.clone(),
            retry_tick: Duration::from_millis(self.config.retry_tick_ms.max(1)),
        };
        let handle = tokio::spawn(run_loop.run(self.shutdown_tx.subscribe()));
        self.tasks.lock().push(handle);

        let _ = self.state.send(EngineState::Running);
        info!(
            pending,
            rehydrated,
            online = self.monitor.is_available(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync engine running"
        );
        Ok(())
    }

    /// Poll `probe` for connectivity. Only for hosts without a
    /// connectivity subscription; otherwise call
    /// [`NetworkMonitor::report`] from the platform callback.
    pub fn spawn_connectivity_polling(&self, probe: Arc<dyn ConnectivityProbe>) {
        let handle = spawn_polling(
            self.monitor.clone(),
            probe,
            Duration::from_millis(self.config.network_poll_interval_ms.max(1)),
            self.shutdown_tx.subscribe(),
        );
        self.tasks.lock().push(handle);
    }

    /// Stop background tasks and flush the queue document one last time.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if matches!(self.state(), EngineState::ShuttingDown | EngineState::Stopped) {
            return;
        }
        info!("Initiating sync engine shutdown...");
        let _ = self.state.send(EngineState::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Err(e) = self.queue.persist().await {
            warn!(error = %e, "Failed to persist queue on shutdown");
        }

        let _ = self.state.send(EngineState::Stopped);
        info!(pending = self.queue.len(), "Sync engine stopped");
    }
}

/// Background loop: drains on the offline → online edge and retries items
/// whose backoff elapsed.
struct RunLoop {
    monitor: Arc<NetworkMonitor>,
    queue: Arc<SyncQueue>,
    drainer: Drainer,
    events: broadcast::Sender<SyncEvent>,
    retry_tick: Duration,
}

impl RunLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut network = self.monitor.subscribe();
        let mut was_online = self.monitor.is_available();

        // First tick fires immediately: drains whatever survived a restart
        let mut retry = tokio::time::interval(self.retry_tick);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = network.borrow_and_update().is_online;
                    emit(&self.events, SyncEvent::ConnectivityChanged { online });
                    if online && !was_online {
                        self.drainer.drain_auto("reconnect").await;
                    }
                    was_online = online;
                }

                _ = retry.tick() => {
                    if self.monitor.is_available()
                        && (self.queue.has_due(crate::clock::now_millis()) || self.queue.is_unsaved())
                    {
                        self.drainer.drain_auto("retry_tick").await;
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Run loop stopped");
    }
}
