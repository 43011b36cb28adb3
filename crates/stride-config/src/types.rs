//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [cache]      # per-kind TTLs, in-memory front size
//! [sync]       # watchdog threshold, aggregate window
//! [storage]    # retention, sweep interval, database path
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stride_types::config::defaults;
use stride_types::{
    ConfigProvider, HasCacheConfig, HasStorageConfig, HasSyncConfig, ResourceKind,
};

use crate::{ConfigError, Result};

/// Application name used for the data directory.
const APP_NAME: &str = "stride";

/// Default database filename inside the data directory.
const DATABASE_FILE: &str = "stride.db";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local
/// override) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrideConfig {
    /// Cache layer configuration.
    pub cache: Option<CacheConfig>,

    /// Version reconciliation configuration.
    pub sync: Option<SyncConfig>,

    /// Downloaded-content storage configuration.
    pub storage: Option<StorageConfig>,
}

impl StrideConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: StrideConfig) {
        if other.cache.is_some() {
            self.cache = other.cache;
        }

        if other.sync.is_some() {
            self.sync = other.sync;
        }

        if other.storage.is_some() {
            self.storage = other.storage;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(cache) = &self.cache
            && cache.max_entries == 0
        {
            return Err(invalid("cache.max_entries", "must be at least 1"));
        }
        if let Some(sync) = &self.sync
            && sync.stuck_threshold_secs == 0
        {
            return Err(invalid("sync.stuck_threshold_secs", "must be positive"));
        }
        if let Some(storage) = &self.storage {
            if storage.content_retention_days == 0 {
                return Err(invalid(
                    "storage.content_retention_days",
                    "must be at least 1",
                ));
            }
            if storage.sweep_interval_secs == 0 {
                return Err(invalid("storage.sweep_interval_secs", "must be positive"));
            }
        }
        Ok(())
    }

    pub fn cache_section(&self) -> CacheConfig {
        self.cache.clone().unwrap_or_default()
    }

    pub fn sync_section(&self) -> SyncConfig {
        self.sync.clone().unwrap_or_default()
    }

    pub fn storage_section(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Location of the SQLite database: the configured path, or
    /// `<data dir>/stride/stride.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage
            .as_ref()
            .and_then(|s| s.database.clone())
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_NAME).join(DATABASE_FILE)))
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl ConfigProvider for StrideConfig {}

impl HasCacheConfig for StrideConfig {
    fn ttl_for(&self, kind: ResourceKind) -> Duration {
        self.cache_section().ttl_for(kind)
    }

    fn max_entries(&self) -> usize {
        self.cache_section().max_entries
    }
}

impl HasSyncConfig for StrideConfig {
    fn stuck_threshold(&self) -> Duration {
        self.sync_section().stuck_threshold()
    }

    fn watchdog_reverify(&self) -> bool {
        self.sync_section().watchdog_reverify
    }

    fn aggregate_window(&self) -> Duration {
        self.sync_section().aggregate_window()
    }
}

impl HasStorageConfig for StrideConfig {
    fn content_retention(&self) -> Duration {
        self.storage_section().content_retention()
    }

    fn sweep_interval(&self) -> Duration {
        self.storage_section().sweep_interval()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Cache layer configuration section.
///
/// ```toml
/// [cache]
/// profile_ttl_secs = 300
/// progress_ttl_secs = 60
/// max_entries = 512
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub profile_ttl_secs: u64,
    pub catalog_ttl_secs: u64,
    pub course_ttl_secs: u64,
    pub progress_ttl_secs: u64,
    pub aggregate_ttl_secs: u64,
    /// Entries held in the in-memory front before LRU eviction.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl_secs: defaults::PROFILE_TTL_SECS,
            catalog_ttl_secs: defaults::CATALOG_TTL_SECS,
            course_ttl_secs: defaults::COURSE_TTL_SECS,
            progress_ttl_secs: defaults::PROGRESS_TTL_SECS,
            aggregate_ttl_secs: defaults::AGGREGATE_TTL_SECS,
            max_entries: defaults::MAX_ENTRIES,
        }
    }
}

impl ConfigProvider for CacheConfig {}

impl HasCacheConfig for CacheConfig {
    fn ttl_for(&self, kind: ResourceKind) -> Duration {
        let secs = match kind {
            ResourceKind::Profile => self.profile_ttl_secs,
            ResourceKind::Catalog => self.catalog_ttl_secs,
            ResourceKind::Course => self.course_ttl_secs,
            ResourceKind::Progress => self.progress_ttl_secs,
            ResourceKind::Aggregate => self.aggregate_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    fn max_entries(&self) -> usize {
        self.max_entries
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Version reconciliation configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds a resource may stay `Updating` before the watchdog resets it.
    pub stuck_threshold_secs: u64,
    /// Re-compare versions right after a watchdog reset.
    pub watchdog_reverify: bool,
    /// Seconds a cached aggregate id list is reused without asking the remote.
    pub aggregate_window_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_secs: defaults::STUCK_THRESHOLD_SECS,
            watchdog_reverify: true,
            aggregate_window_secs: defaults::AGGREGATE_TTL_SECS,
        }
    }
}

impl ConfigProvider for SyncConfig {}

impl HasSyncConfig for SyncConfig {
    fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }

    fn watchdog_reverify(&self) -> bool {
        self.watchdog_reverify
    }

    fn aggregate_window(&self) -> Duration {
        Duration::from_secs(self.aggregate_window_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Downloaded-content storage configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub content_retention_days: u64,
    pub sweep_interval_secs: u64,
    /// SQLite database file. Defaults to the platform data directory.
    pub database: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_retention_days: defaults::CONTENT_RETENTION_DAYS,
            sweep_interval_secs: defaults::SWEEP_INTERVAL_SECS,
            database: None,
        }
    }
}

impl ConfigProvider for StorageConfig {}

impl HasStorageConfig for StorageConfig {
    fn content_retention(&self) -> Duration {
        Duration::from_secs(self.content_retention_days * 24 * 3600)
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = StrideConfig::from_toml("").unwrap();

        assert_eq!(config, StrideConfig::new());
        assert_eq!(
            config.ttl_for(ResourceKind::Progress),
            Duration::from_secs(60)
        );
        assert_eq!(config.stuck_threshold(), Duration::from_secs(300));
        assert!(config.watchdog_reverify());
        assert_eq!(
            config.content_retention(),
            Duration::from_secs(30 * 24 * 3600)
        );
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config = StrideConfig::from_toml(
            r#"
[cache]
progress_ttl_secs = 10

[sync]
watchdog_reverify = false
"#,
        )
        .unwrap();

        assert_eq!(
            config.ttl_for(ResourceKind::Progress),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.ttl_for(ResourceKind::Profile),
            Duration::from_secs(300)
        );
        assert!(!config.watchdog_reverify());
        assert_eq!(config.stuck_threshold(), Duration::from_secs(300));
    }

    #[test]
    fn test_merge_replaces_whole_sections() {
        let mut base = StrideConfig::from_toml(
            r#"
[cache]
max_entries = 64

[storage]
content_retention_days = 7
"#,
        )
        .unwrap();
        let overlay = StrideConfig::from_toml(
            r#"
[storage]
sweep_interval_secs = 60
"#,
        )
        .unwrap();

        base.merge(overlay);

        assert_eq!(base.max_entries(), 64);
        assert_eq!(base.sweep_interval(), Duration::from_secs(60));
        // The overlay's storage section wins as a whole.
        assert_eq!(
            base.content_retention(),
            Duration::from_secs(30 * 24 * 3600)
        );
    }

    #[test]
    fn test_rejects_zero_values() {
        let err = StrideConfig::from_toml("[sync]\nstuck_threshold_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "sync.stuck_threshold_secs"));

        let err = StrideConfig::from_toml("[cache]\nmax_entries = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_toml_roundtrip_keeps_database_path() {
        let mut config = StrideConfig::new();
        config.storage = Some(StorageConfig {
            database: Some(PathBuf::from("/tmp/stride-test.db")),
            ..StorageConfig::default()
        });

        let parsed = StrideConfig::from_toml(&config.to_toml().unwrap()).unwrap();

        assert_eq!(parsed, config);
        assert_eq!(
            parsed.database_path(),
            Some(PathBuf::from("/tmp/stride-test.db"))
        );
    }
}
