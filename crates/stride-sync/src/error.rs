//! Error types for the sync engine.

use stride_cache::{CacheError, FetchError};
use stride_store::StoreError;
use stride_types::VersionStatus;
use thiserror::Error;

/// Failure reported by the remote document provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transient: the provider could not be reached.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("Remote rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

impl From<RemoteError> for FetchError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(reason) => FetchError::Unavailable(reason),
            RemoteError::Rejected(reason) => FetchError::Failed(reason),
        }
    }
}

/// Result type for remote provider calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Error type for sync engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No version record exists for the resource.
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for {resource_id}: {from} -> {to}")]
    InvalidTransition {
        resource_id: String,
        from: VersionStatus,
        to: VersionStatus,
    },

    /// The resource has an update in flight.
    #[error("Update in progress for {0}")]
    Busy(String),
}

/// Result type for sync engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
