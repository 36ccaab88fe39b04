//! Connectivity tracking.
//!
//! The monitor owns [`NetworkState`] outright: [`NetworkMonitor::report`] is
//! the only way it changes, and everyone else reads it or subscribes to its
//! transitions. The platform's connectivity subscription should call
//! `report` directly; [`spawn_polling`] exists for hosts that can only poll.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub is_online: bool,
    /// Epoch millis of the last real transition; `None` until the first one
    pub last_transition_at: Option<i64>,
}

/// What a connectivity report did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offline → online. Triggers automatic queue draining.
    CameOnline,
    WentOffline,
    Unchanged,
}

pub struct NetworkMonitor {
    state: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(NetworkState {
            is_online: initially_online,
            last_transition_at: None,
        });
        crate::metrics::set_online(initially_online);
        Self { state }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.borrow().is_online
    }

    #[must_use]
    pub fn state(&self) -> NetworkState {
        *self.state.borrow()
    }

    /// Feed a connectivity observation. Repeating the current value is a
    /// no-op and wakes no subscriber.
    pub fn report(&self, online: bool) -> Transition {
        let changed = self.state.send_if_modified(|state| {
            if state.is_online == online {
                return false;
            }
            state.is_online = online;
            state.last_transition_at = Some(crate::clock::now_millis());
            true
        });

        if !changed {
            return Transition::Unchanged;
        }
        crate::metrics::set_online(online);
        if online {
            info!("Network available");
            Transition::CameOnline
        } else {
            info!("Network lost, switching to offline mode");
            Transition::WentOffline
        }
    }

    /// Receiver notified on every real transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// A one-shot reachability check used by the polling fallback.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Poll `probe` every `interval` and report into `monitor` until `shutdown`
/// flips to `true` (or its sender is dropped).
///
/// A probe that hangs past one interval counts as unreachable.
pub fn spawn_polling(
    monitor: Arc<NetworkMonitor>,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reachable = tokio::time::timeout(interval, probe.is_reachable())
                        .await
                        .unwrap_or(false);
                    monitor.report(reachable);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Connectivity polling stopped");
    })
}
