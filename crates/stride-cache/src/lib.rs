//! Local content cache for Stride.
//!
//! ```text
//! CacheLayer          - TTL-aware read-through / write-through cache
//!     ├── LRU front   - bounded in-memory entries
//!     └── SharedStore - persistent backing (stride-store)
//! SyncRuntime         - registries shared by cache and sync engine
//!     ├── SyncGuard       - per-key admission set
//!     ├── TaskSupervisor  - labelled background tasks
//!     ├── Epoch           - generation counter for superseded results
//!     └── SharedClock     - injectable "now"
//! ShapeRegistry       - structural validation per resource kind
//! ```

pub mod config;
pub mod entry;
pub mod epoch;
pub mod error;
pub mod guard;
pub mod layer;
pub mod runtime;
pub mod shape;
pub mod tasks;

pub use config::CacheSettings;
pub use entry::{CacheEntry, Freshness, Loaded, is_stale};
pub use epoch::{Epoch, EpochTag};
pub use error::{CacheError, FetchError, Result};
pub use guard::{GuardTicket, SyncGuard};
pub use layer::{CACHE_PREFIX, CacheLayer, CacheStats, FetchResult, RefreshOutcome, store_key};
pub use runtime::SyncRuntime;
pub use shape::{Shape, ShapeError, ShapeRegistry};
pub use tasks::TaskSupervisor;
