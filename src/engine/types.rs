//! Public types for the engine service object.

use serde::Serialize;

use crate::cache::CacheInfo;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, queue not loaded yet
    Created,
    /// Restoring the queue and re-applying pending writes
    Starting,
    /// Background loop active
    Running,
    /// Stopping background tasks
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Everything the diagnostics screen shows in one read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub offline: bool,
    pub last_transition_at: Option<i64>,
    pub queue_length: usize,
    /// Replays paused until the user signs in again
    pub awaiting_auth: bool,
    pub cache: CacheInfo,
}
