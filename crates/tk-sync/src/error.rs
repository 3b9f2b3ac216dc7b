//! Error types for the sync layer.

use thiserror::Error;
use tk_core::ValidationError;
use tk_db::DbError;

/// Failure of the local record store.
///
/// Fatal to the single call that hit it; the store never leaves a partially
/// written schedule or record behind.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DbError),
    /// The blocking worker running the operation panicked or was cancelled.
    #[error("store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a remote log or health store.
///
/// Always logged and swallowed by the coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// The authentication capability could not run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("authentication error: {0}")]
pub struct AuthError(pub String);

/// The dosing engine failed to recompute.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("dosing engine error: {0}")]
pub struct EngineError(pub String);

/// Errors surfaced to callers of the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Insulin deletion was not authorized. Nothing was changed.
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("deletion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
