//! Error types for cache operations.

use stride_types::ResourceKey;

use crate::shape::ShapeError;

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The payload failed its structural check; any previous entry was evicted.
    #[error("Payload for {key} rejected: {source}")]
    Validation {
        key: ResourceKey,
        #[source]
        source: ShapeError,
    },

    /// The local store could not be written. The in-memory entry stands.
    #[error("Persistence error: {0}")]
    Persistence(#[from] stride_store::StoreError),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Failure reported by a background fetcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Transient: the source could not be reached. Cached data is kept.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The source answered but the request cannot succeed as issued.
    #[error("Fetch failed: {0}")]
    Failed(String),
}
