//! The remote operation surface and its classified errors.
//!
//! The engine treats every server call as an opaque async operation that
//! either yields a serializable payload or fails with a [`RemoteError`].
//! Classification happens at this boundary; everything downstream
//! (fallback, queueing, retry) branches on [`ErrorKind`] only.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{CustomFood, FoodEntry, FoodSearchHit, Profile, Recipe, Record};

/// Error class used for routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connectivity loss or timeout.
    Network,
    /// Unauthorized or expired session.
    Auth,
    /// Payload rejected by the server.
    Validation,
    /// 5xx or anything unexpected.
    Server,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "NETWORK_ERROR"),
            Self::Auth => write!(f, "AUTH_ERROR"),
            Self::Validation => write!(f, "VALIDATION_ERROR"),
            Self::Server => write!(f, "SERVER_ERROR"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication required: {0}")]
    Auth(String),
    #[error("rejected by server: {0}")]
    Validation(String),
    #[error("server error: {0}")]
    Server(String),
}

impl RemoteError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Server(_) => ErrorKind::Server,
        }
    }

    /// Network and server failures may succeed later; auth and validation won't.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Server)
    }

    /// Map an HTTP status to its class. Callers wiring a real HTTP client use
    /// this so classification stays in one place.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            400 | 404 | 409 | 422 => Self::Validation(message),
            408 | 504 => Self::Network(message),
            _ => Self::Server(message),
        }
    }

    pub(crate) fn offline() -> Self {
        Self::Network("device is offline".to_string())
    }
}

/// Run a remote call under a deadline. Elapsed deadlines become
/// [`RemoteError::Network`] so they route like any connectivity failure.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            crate::metrics::record_timeout(operation);
            Err(RemoteError::Network(format!(
                "{} timed out after {:?}",
                operation, limit
            )))
        }
    }
}

/// Domain calls offered by the backend, already scoped to the signed-in user.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn get_profile(&self) -> Result<Record<Profile>, RemoteError>;
    async fn update_profile(&self, profile: &Profile) -> Result<Record<Profile>, RemoteError>;

    async fn list_food_entries(&self, date: NaiveDate) -> Result<Vec<Record<FoodEntry>>, RemoteError>;
    async fn log_food_entry(&self, entry: &FoodEntry) -> Result<Record<FoodEntry>, RemoteError>;
    async fn delete_food_entry(&self, id: &str) -> Result<(), RemoteError>;
    async fn search_foods(&self, query: &str) -> Result<Vec<FoodSearchHit>, RemoteError>;

    async fn list_custom_foods(&self) -> Result<Vec<Record<CustomFood>>, RemoteError>;
    async fn create_custom_food(&self, food: &CustomFood) -> Result<Record<CustomFood>, RemoteError>;

    async fn list_recipes(&self) -> Result<Vec<Record<Recipe>>, RemoteError>;
    async fn create_recipe(&self, recipe: &Recipe) -> Result<Record<Recipe>, RemoteError>;
}
