use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::traits::StorageError;

/// Errors surfaced to callers of the engine and the data-access layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The offline write queue is at capacity; the write was not applied.
    #[error("sync queue full: {pending} pending writes (max {max})")]
    QueueFull { pending: usize, max: usize },

    #[error("device is offline")]
    Offline,

    #[error("no such record: {0}")]
    NotFound(String),
}

impl SyncError {
    /// The remote classification, if this error came from the server boundary.
    #[must_use]
    pub fn remote_kind(&self) -> Option<crate::remote::ErrorKind> {
        match self {
            Self::Remote(e) => Some(e.kind()),
            _ => None,
        }
    }
}
