//! Notifications pushed to the UI.
//!
//! Offline writes look successful immediately, so failures can only be
//! reported later. Subscribe with [`SyncEngine::subscribe_events`](crate::SyncEngine::subscribe_events).

use crate::queue::{DrainReport, EntityKind, OperationType, QueuePressure};
use crate::remote::RemoteError;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A queued write reached the server.
    WriteConfirmed {
        entity: EntityKind,
        operation: OperationType,
        local_id: Option<String>,
        server_id: Option<String>,
    },
    /// A queued write was dropped; its optimistic effect has been rolled back.
    WriteFailed {
        entity: EntityKind,
        operation: OperationType,
        local_id: Option<String>,
        error: RemoteError,
    },
    /// Replay paused until the user signs in again and forces a sync.
    AuthRequired { error: RemoteError },
    QueuePressure {
        level: QueuePressure,
        pending: usize,
        max: usize,
    },
    ConnectivityChanged { online: bool },
    DrainCompleted(DrainReport),
}

pub(crate) type EventSender = tokio::sync::broadcast::Sender<SyncEvent>;

/// Send without caring whether anyone listens.
pub(crate) fn emit(tx: &EventSender, event: SyncEvent) {
    let _ = tx.send(event);
}
