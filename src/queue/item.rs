use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

/// Entity stream a queued write belongs to. Retry blocking is per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    FoodEntry,
    Profile,
    CustomFood,
    Recipe,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FoodEntry => "food_entry",
            Self::Profile => "profile",
            Self::CustomFood => "custom_food",
            Self::Recipe => "recipe",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which record a queued delete points at.
///
/// `Local` only occurs when a delete was issued while the create for the
/// same provisional record was mid-replay; reconciliation rewrites it to
/// `Server` before it is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Server(String),
    Local(String),
}

/// One pending write in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Monotonic across restarts
    pub sequence: u64,
    pub operation_type: OperationType,
    pub entity_kind: EntityKind,
    pub payload: Value,
    /// Epoch millis
    pub created_at: i64,
    pub attempts: u32,
    /// Provisional id for creates
    #[serde(default)]
    pub local_id: Option<String>,
    /// Target record for deletes
    #[serde(default)]
    pub target: Option<EntityRef>,
    /// Backoff: not replayed before this epoch millis
    #[serde(default)]
    pub next_attempt_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    #[must_use]
    pub fn is_due_at(&self, now_millis: i64) -> bool {
        self.next_attempt_at.map_or(true, |t| now_millis >= t)
    }
}

/// A write that has not been sequenced yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub operation_type: OperationType,
    pub entity_kind: EntityKind,
    pub payload: Value,
    pub local_id: Option<String>,
    pub target: Option<EntityRef>,
}

impl NewItem {
    pub fn create(entity_kind: EntityKind, payload: Value, local_id: impl Into<String>) -> Self {
        Self {
            operation_type: OperationType::Create,
            entity_kind,
            payload,
            local_id: Some(local_id.into()),
            target: None,
        }
    }

    pub fn update(entity_kind: EntityKind, payload: Value) -> Self {
        Self {
            operation_type: OperationType::Update,
            entity_kind,
            payload,
            local_id: None,
            target: None,
        }
    }

    pub fn delete(entity_kind: EntityKind, target: EntityRef) -> Self {
        Self {
            operation_type: OperationType::Delete,
            entity_kind,
            payload: Value::Null,
            local_id: None,
            target: Some(target),
        }
    }
}
