use serde::Serialize;
use uuid::Uuid;

use crate::models::Record;

/// Prefix of client-generated ids. Display only; code branches on the variant.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[must_use]
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4())
}

/// An entity as the UI sees it: either confirmed by the server or a local
/// stand-in for a queued write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Entity<T> {
    Confirmed {
        server_id: String,
        data: T,
    },
    Provisional {
        local_id: String,
        data: T,
        /// Sequence of the queued write this stands in for
        queue_ref: u64,
    },
}

impl<T> Entity<T> {
    pub fn confirmed(record: Record<T>) -> Self {
        Self::Confirmed {
            server_id: record.id,
            data: record.data,
        }
    }

    /// Server id or local id, whichever this entity has.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Confirmed { server_id, .. } => server_id,
            Self::Provisional { local_id, .. } => local_id,
        }
    }

    #[must_use]
    pub fn data(&self) -> &T {
        match self {
            Self::Confirmed { data, .. } | Self::Provisional { data, .. } => data,
        }
    }

    pub fn into_data(self) -> T {
        match self {
            Self::Confirmed { data, .. } | Self::Provisional { data, .. } => data,
        }
    }

    #[must_use]
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional { .. })
    }

    #[must_use]
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Confirmed { server_id, .. } => Some(server_id),
            Self::Provisional { .. } => None,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> Option<&str> {
        match self {
            Self::Provisional { local_id, .. } => Some(local_id),
            Self::Confirmed { .. } => None,
        }
    }

    #[must_use]
    pub fn queue_ref(&self) -> Option<u64> {
        match self {
            Self::Provisional { queue_ref, .. } => Some(*queue_ref),
            Self::Confirmed { .. } => None,
        }
    }
}
