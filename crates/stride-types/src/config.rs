//! Configuration traits for decoupled config passing between crates.
//!
//! The cache, engine and storage accounting only need a handful of knobs
//! each. They depend on these capability traits rather than on the full
//! `stride-config` structure.

use std::time::Duration;

use crate::key::ResourceKind;

/// Base trait for all configuration types.
pub trait ConfigProvider: Clone + Send + Sync + 'static {}

/// Cache layer configuration.
pub trait HasCacheConfig: ConfigProvider {
    /// Time-to-live for entries of the given kind.
    fn ttl_for(&self, kind: ResourceKind) -> Duration;

    /// Maximum number of entries held in the in-memory front.
    fn max_entries(&self) -> usize;
}

/// Version reconciliation and aggregation configuration.
pub trait HasSyncConfig: ConfigProvider {
    /// How long a resource may sit in `Updating` before the watchdog resets it.
    fn stuck_threshold(&self) -> Duration;

    /// Whether a watchdog reset re-compares versions in the same check.
    fn watchdog_reverify(&self) -> bool {
        true
    }

    /// Window within which a repeated aggregate load reuses the cached id list.
    fn aggregate_window(&self) -> Duration;
}

/// Downloaded-content accounting configuration.
pub trait HasStorageConfig: ConfigProvider {
    /// How long downloaded content is retained before it expires.
    fn content_retention(&self) -> Duration;

    /// Interval between background expiry sweeps.
    fn sweep_interval(&self) -> Duration;
}

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    use crate::key::ResourceKind;

    pub const PROFILE_TTL_SECS: u64 = 300;
    pub const CATALOG_TTL_SECS: u64 = 3600;
    pub const COURSE_TTL_SECS: u64 = 86_400;
    pub const PROGRESS_TTL_SECS: u64 = 60;
    pub const AGGREGATE_TTL_SECS: u64 = 30;
    pub const MAX_ENTRIES: usize = 512;
    /// Five minutes.
    pub const STUCK_THRESHOLD_SECS: u64 = 300;
    pub const CONTENT_RETENTION_DAYS: u64 = 30;
    pub const SWEEP_INTERVAL_SECS: u64 = 3600;

    pub fn ttl_for(kind: ResourceKind) -> Duration {
        let secs = match kind {
            ResourceKind::Profile => PROFILE_TTL_SECS,
            ResourceKind::Catalog => CATALOG_TTL_SECS,
            ResourceKind::Course => COURSE_TTL_SECS,
            ResourceKind::Progress => PROGRESS_TTL_SECS,
            ResourceKind::Aggregate => AGGREGATE_TTL_SECS,
        };
        Duration::from_secs(secs)
    }

    pub fn stuck_threshold() -> Duration {
        Duration::from_secs(STUCK_THRESHOLD_SECS)
    }

    pub fn content_retention() -> Duration {
        Duration::from_secs(CONTENT_RETENTION_DAYS * 24 * 3600)
    }

    pub fn sweep_interval() -> Duration {
        Duration::from_secs(SWEEP_INTERVAL_SECS)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simple wrapper types for standalone config passing
// ─────────────────────────────────────────────────────────────────────────────

/// Standalone cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfigProvider {
    pub profile_ttl: Duration,
    pub catalog_ttl: Duration,
    pub course_ttl: Duration,
    pub progress_ttl: Duration,
    pub aggregate_ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfigProvider {
    fn default() -> Self {
        Self {
            profile_ttl: defaults::ttl_for(ResourceKind::Profile),
            catalog_ttl: defaults::ttl_for(ResourceKind::Catalog),
            course_ttl: defaults::ttl_for(ResourceKind::Course),
            progress_ttl: defaults::ttl_for(ResourceKind::Progress),
            aggregate_ttl: defaults::ttl_for(ResourceKind::Aggregate),
            max_entries: defaults::MAX_ENTRIES,
        }
    }
}

impl ConfigProvider for CacheConfigProvider {}

impl HasCacheConfig for CacheConfigProvider {
    fn ttl_for(&self, kind: ResourceKind) -> Duration {
        match kind {
            ResourceKind::Profile => self.profile_ttl,
            ResourceKind::Catalog => self.catalog_ttl,
            ResourceKind::Course => self.course_ttl,
            ResourceKind::Progress => self.progress_ttl,
            ResourceKind::Aggregate => self.aggregate_ttl,
        }
    }

    fn max_entries(&self) -> usize {
        self.max_entries
    }
}

/// Standalone sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfigProvider {
    pub stuck_threshold: Duration,
    pub watchdog_reverify: bool,
    pub aggregate_window: Duration,
}

impl Default for SyncConfigProvider {
    fn default() -> Self {
        Self {
            stuck_threshold: defaults::stuck_threshold(),
            watchdog_reverify: true,
            aggregate_window: defaults::ttl_for(ResourceKind::Aggregate),
        }
    }
}

impl ConfigProvider for SyncConfigProvider {}

impl HasSyncConfig for SyncConfigProvider {
    fn stuck_threshold(&self) -> Duration {
        self.stuck_threshold
    }

    fn watchdog_reverify(&self) -> bool {
        self.watchdog_reverify
    }

    fn aggregate_window(&self) -> Duration {
        self.aggregate_window
    }
}

/// Standalone storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfigProvider {
    pub content_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for StorageConfigProvider {
    fn default() -> Self {
        Self {
            content_retention: defaults::content_retention(),
            sweep_interval: defaults::sweep_interval(),
        }
    }
}

impl ConfigProvider for StorageConfigProvider {}

impl HasStorageConfig for StorageConfigProvider {
    fn content_retention(&self) -> Duration {
        self.content_retention
    }

    fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttls_differ_per_kind() {
        let config = CacheConfigProvider::default();
        assert_ne!(
            config.ttl_for(ResourceKind::Profile),
            config.ttl_for(ResourceKind::Catalog)
        );
        assert_eq!(
            config.ttl_for(ResourceKind::Progress),
            Duration::from_secs(defaults::PROGRESS_TTL_SECS)
        );
    }

    #[test]
    fn test_sync_defaults() {
        let config = SyncConfigProvider::default();
        assert_eq!(config.stuck_threshold(), Duration::from_secs(300));
        assert!(config.watchdog_reverify());
    }
}
