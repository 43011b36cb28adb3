//! Settings for the sync engine components.

use std::time::Duration;

use stride_cache::CacheSettings;
use stride_types::{HasCacheConfig, HasStorageConfig, HasSyncConfig, config_defaults};

/// Version reconciliation and aggregation settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// How long a resource may sit in `Updating` before the watchdog resets it.
    pub stuck_threshold: Duration,

    /// After a watchdog reset, compare versions again in the same check and
    /// start a fresh update on mismatch. When false the reset is all that
    /// happens.
    pub watchdog_reverify: bool,

    /// How long an aggregate result is reused before the id list is
    /// resolved again.
    pub aggregate_window: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            stuck_threshold: config_defaults::stuck_threshold(),
            watchdog_reverify: true,
            aggregate_window: config_defaults::ttl_for(stride_types::ResourceKind::Aggregate),
        }
    }
}

impl SyncSettings {
    pub fn from_config<C: HasSyncConfig>(config: &C) -> Self {
        Self {
            stuck_threshold: config.stuck_threshold(),
            watchdog_reverify: config.watchdog_reverify(),
            aggregate_window: config.aggregate_window(),
        }
    }

    pub fn with_stuck_threshold(mut self, threshold: Duration) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    pub fn with_watchdog_reverify(mut self, reverify: bool) -> Self {
        self.watchdog_reverify = reverify;
        self
    }

    pub fn with_aggregate_window(mut self, window: Duration) -> Self {
        self.aggregate_window = window;
        self
    }
}

/// Downloaded content retention settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// How long downloaded content is kept before the sweep removes it.
    pub content_retention: Duration,

    /// Interval of the background expiry sweep.
    pub sweep_interval: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            content_retention: config_defaults::content_retention(),
            sweep_interval: config_defaults::sweep_interval(),
        }
    }
}

impl StorageSettings {
    pub fn from_config<C: HasStorageConfig>(config: &C) -> Self {
        Self {
            content_retention: config.content_retention(),
            sweep_interval: config.sweep_interval(),
        }
    }

    pub fn with_content_retention(mut self, retention: Duration) -> Self {
        self.content_retention = retention;
        self
    }
}

/// Everything a [`SyncEngine`](crate::SyncEngine) needs to be configured.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub cache: CacheSettings,
    pub sync: SyncSettings,
    pub storage: StorageSettings,
}

impl EngineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any config that provides all three capabilities.
    pub fn from_config<C>(config: &C) -> Self
    where
        C: HasCacheConfig + HasSyncConfig + HasStorageConfig,
    {
        Self {
            cache: CacheSettings::from_config(config),
            sync: SyncSettings::from_config(config),
            storage: StorageSettings::from_config(config),
        }
    }

    pub fn with_sync(mut self, sync: SyncSettings) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_storage(mut self, storage: StorageSettings) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }
}
