//! Shared types for the Stride content sync engine.
//!
//! Everything in here is vocabulary that more than one crate needs: resource
//! identity, the reconciliation status enum, the clock abstraction and the
//! configuration capability traits.

pub mod clock;
pub mod config;
pub mod key;
pub mod status;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    CacheConfigProvider, ConfigProvider, HasCacheConfig, HasStorageConfig, HasSyncConfig,
    StorageConfigProvider, SyncConfigProvider, defaults as config_defaults,
};
pub use key::{KeyParseError, ResourceKey, ResourceKind};
pub use status::VersionStatus;

/// An opaque structured document as exchanged with the store and the remote.
pub type Document = serde_json::Value;
