//! Version reconciliation and aggregated loading for Stride.
//!
//! ```text
//! SyncEngine
//!     ├── VersionEngine          - Ready / Updating / Failed per resource
//!     ├── AggregateOrchestrator  - per-owner snapshot now, reconcile later
//!     ├── StorageAccounting      - download index, usage, expiry sweep
//!     ├── NotificationBus        - complete / failed events
//!     └── CacheLayer + SyncRuntime (stride-cache)
//! RemoteDocuments                - remote provider contract (MockRemote for tests)
//! ```

pub mod accounting;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod remote;
pub mod version;

pub use accounting::{
    DownloadMetadata, STORAGE_INDEX_KEY, StorageAccounting, StorageIndexEntry, UsageSummary,
    content_key,
};
pub use bus::{BusEvent, EventKind, NotificationBus, Subscription};
pub use config::{EngineSettings, StorageSettings, SyncSettings};
pub use engine::{SHUTDOWN_GRACE, SyncEngine};
pub use error::{RemoteError, RemoteResult, Result, SyncError};
pub use orchestrator::{AggregateItem, AggregateOrchestrator, AggregateSnapshot};
pub use remote::{
    MirrorPatch, MockRemote, OwnedResource, OwnerDocument, RemoteDocuments, RemoteResource,
    SharedRemote,
};
pub use version::{SyncOutcome, VERSION_PREFIX, VersionEngine, VersionRecord};
