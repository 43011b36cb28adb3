//! Storage accounting for downloaded content.
//!
//! Keeps an index of what has been downloaded, how large it is and when it
//! expires. The index is persisted as a single document; the content itself
//! lives in the cache under the resource's course key. Content is removed
//! before its index entry, so a failed removal leaves the entry in place
//! instead of orphaning content on disk.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stride_cache::CacheLayer;
use stride_store::StoreExt;
use stride_types::ResourceKey;
use tracing::{debug, info, warn};

use crate::config::StorageSettings;
use crate::error::Result;

/// Persistent-store key of the storage index.
pub const STORAGE_INDEX_KEY: &str = "stride:storage:index";

/// Cache key under which a versioned resource's content is stored.
pub fn content_key(resource_id: &str) -> ResourceKey {
    ResourceKey::course(resource_id)
}

/// Index entry for one downloaded resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageIndexEntry {
    pub resource_id: String,
    /// Serialized size of the content in bytes.
    pub size_estimate: u64,
    pub downloaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Version of the content that was stored.
    #[serde(default)]
    pub version: Option<String>,
}

impl StorageIndexEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What the caller knows about a download.
#[derive(Debug, Clone, Default)]
pub struct DownloadMetadata {
    pub size_estimate: u64,
    /// Overrides the configured retention for this resource.
    pub retention: Option<std::time::Duration>,
    pub version: Option<String>,
}

impl DownloadMetadata {
    pub fn sized(size_estimate: u64) -> Self {
        Self {
            size_estimate,
            retention: None,
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_retention(mut self, retention: std::time::Duration) -> Self {
        self.retention = Some(retention);
        self
    }
}

/// Aggregate usage numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub count: usize,
    pub total_size_estimate: u64,
}

/// Index of downloaded content.
pub struct StorageAccounting {
    cache: CacheLayer,
    settings: StorageSettings,
    index: Mutex<BTreeMap<String, StorageIndexEntry>>,
}

impl std::fmt::Debug for StorageAccounting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAccounting")
            .field("entries", &self.index.lock().len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl StorageAccounting {
    /// Create an accounting index with no entries. Call [`load`](Self::load)
    /// to pick up a persisted index.
    pub fn new(cache: CacheLayer, settings: StorageSettings) -> Self {
        Self {
            cache,
            settings,
            index: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    /// Read the persisted index. Returns the number of entries loaded.
    pub async fn load(&self) -> Result<usize> {
        let stored: Option<Vec<StorageIndexEntry>> =
            match self.cache.store().get_json(STORAGE_INDEX_KEY).await {
                Ok(stored) => stored,
                Err(stride_store::StoreError::Serde(e)) => {
                    warn!(error = %e, "Storage index is unreadable, starting empty");
                    None
                }
                Err(e) => return Err(e.into()),
            };

        let entries = stored.unwrap_or_default();
        let count = entries.len();
        let mut index = self.index.lock();
        for entry in entries {
            index.insert(entry.resource_id.clone(), entry);
        }
        debug!(count, "Storage index loaded");
        Ok(count)
    }

    async fn persist(&self) {
        let snapshot: Vec<StorageIndexEntry> = self.index.lock().values().cloned().collect();
        if let Err(e) = self.cache.store().set_json(STORAGE_INDEX_KEY, &snapshot).await {
            warn!(error = %e, "Failed to persist storage index");
        }
    }

    /// Record (or refresh) a download.
    pub async fn record_download(
        &self,
        resource_id: &str,
        metadata: DownloadMetadata,
    ) -> StorageIndexEntry {
        let now = self.cache.runtime().now();
        let retention = metadata.retention.unwrap_or(self.settings.content_retention);
        let expires_at = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let entry = StorageIndexEntry {
            resource_id: resource_id.to_string(),
            size_estimate: metadata.size_estimate,
            downloaded_at: now,
            expires_at,
            last_accessed: now,
            version: metadata.version,
        };
        self.index
            .lock()
            .insert(resource_id.to_string(), entry.clone());
        self.persist().await;

        debug!(resource_id, size = entry.size_estimate, %expires_at, "Download recorded");
        entry
    }

    /// Mark a resource as accessed. Returns false if it is not indexed.
    pub async fn touch(&self, resource_id: &str) -> bool {
        let now = self.cache.runtime().now();
        let found = match self.index.lock().get_mut(resource_id) {
            Some(entry) => {
                entry.last_accessed = now;
                true
            }
            None => false,
        };
        if found {
            self.persist().await;
        }
        found
    }

    /// Remove a resource's content and its index entry.
    ///
    /// If the content cannot be removed the index entry is kept and the
    /// error is returned. Returns whether an index entry existed.
    pub async fn remove(&self, resource_id: &str) -> Result<bool> {
        self.cache.remove(&content_key(resource_id)).await?;
        let existed = self.index.lock().remove(resource_id).is_some();
        if existed {
            self.persist().await;
        }
        Ok(existed)
    }

    /// Remove every entry whose expiry is at or before `now`, together with
    /// its content. Returns the ids actually removed.
    ///
    /// A content-removal failure keeps that id in the index and the sweep
    /// carries on with the others.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .index
            .lock()
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.resource_id.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for resource_id in expired {
            match self.cache.remove(&content_key(&resource_id)).await {
                Ok(()) => {
                    self.index.lock().remove(&resource_id);
                    removed.push(resource_id);
                }
                Err(e) => {
                    warn!(resource_id = %resource_id, error = %e, "Failed to remove expired content, keeping index entry");
                }
            }
        }

        if !removed.is_empty() {
            self.persist().await;
            info!(count = removed.len(), "Swept expired content");
        }
        removed
    }

    pub fn usage_summary(&self) -> UsageSummary {
        let index = self.index.lock();
        UsageSummary {
            count: index.len(),
            total_size_estimate: index.values().map(|e| e.size_estimate).sum(),
        }
    }

    /// All index entries, ordered by resource id.
    pub fn entries(&self) -> Vec<StorageIndexEntry> {
        self.index.lock().values().cloned().collect()
    }

    pub fn get(&self, resource_id: &str) -> Option<StorageIndexEntry> {
        self.index.lock().get(resource_id).cloned()
    }

    /// Version of the content stored on this device. Needs both an index
    /// entry carrying a version and the content itself.
    pub async fn local_version(&self, resource_id: &str) -> Option<String> {
        let version = self
            .index
            .lock()
            .get(resource_id)
            .and_then(|entry| entry.version.clone())?;
        self.cache
            .read(&content_key(resource_id))
            .await
            .map(|_| version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use stride_cache::{CacheSettings, SyncRuntime, store_key};
    use stride_store::MemoryStore;
    use stride_types::{Clock, ManualClock};

    fn accounting() -> (StorageAccounting, Arc<MemoryStore>, ManualClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();
        let runtime = SyncRuntime::with_clock(Arc::new(clock.clone()));
        let cache = CacheLayer::new(store.clone(), CacheSettings::new(), runtime);
        (
            StorageAccounting::new(cache, StorageSettings::default()),
            store,
            clock,
        )
    }

    async fn download(accounting: &StorageAccounting, id: &str, size: u64, retention_secs: u64) {
        accounting
            .cache
            .write(&content_key(id), json!({"id": id}))
            .await
            .unwrap();
        accounting
            .record_download(
                id,
                DownloadMetadata::sized(size).with_retention(Duration::from_secs(retention_secs)),
            )
            .await;
    }

    #[tokio::test]
    async fn test_record_download_sets_expiry_and_persists() {
        let (accounting, store, clock) = accounting();
        let entry = accounting
            .record_download("c1", DownloadMetadata::sized(1024))
            .await;

        assert_eq!(entry.downloaded_at, clock.now());
        assert_eq!(
            entry.expires_at,
            clock.now() + chrono::Duration::days(30)
        );
        assert!(store.contains(STORAGE_INDEX_KEY));
    }

    #[tokio::test]
    async fn test_local_version_needs_index_and_content() {
        let (accounting, _store, _clock) = accounting();
        assert_eq!(accounting.local_version("c1").await, None);

        accounting
            .record_download("c1", DownloadMetadata::sized(10).with_version("v3"))
            .await;
        // Indexed but nothing stored.
        assert_eq!(accounting.local_version("c1").await, None);

        accounting
            .cache
            .write(&content_key("c1"), json!({"id": "c1"}))
            .await
            .unwrap();
        assert_eq!(accounting.local_version("c1").await.as_deref(), Some("v3"));

        accounting.remove("c1").await.unwrap();
        assert_eq!(accounting.local_version("c1").await, None);
    }

    #[tokio::test]
    async fn test_usage_summary() {
        let (accounting, _store, _clock) = accounting();
        download(&accounting, "c1", 100, 60).await;
        download(&accounting, "c2", 250, 60).await;

        assert_eq!(
            accounting.usage_summary(),
            UsageSummary {
                count: 2,
                total_size_estimate: 350
            }
        );
    }

    #[tokio::test]
    async fn test_touch_updates_last_accessed() {
        let (accounting, _store, clock) = accounting();
        download(&accounting, "c1", 10, 60).await;
        clock.advance(chrono::Duration::seconds(30));

        assert!(accounting.touch("c1").await);
        assert!(!accounting.touch("missing").await);
        assert_eq!(accounting.get("c1").unwrap().last_accessed, clock.now());
    }

    #[tokio::test]
    async fn test_sweep_removes_exactly_expired_entries_and_content() {
        let (accounting, store, clock) = accounting();
        download(&accounting, "old-1", 10, 60).await;
        download(&accounting, "old-2", 10, 120).await;
        download(&accounting, "keep", 10, 3600).await;
        clock.advance(chrono::Duration::seconds(600));

        let mut removed = accounting.sweep_expired(clock.now()).await;
        removed.sort();

        assert_eq!(removed, vec!["old-1", "old-2"]);
        assert_eq!(accounting.entries().len(), 1);
        assert!(!store.contains(&store_key(&content_key("old-1"))));
        assert!(!store.contains(&store_key(&content_key("old-2"))));
        assert!(store.contains(&store_key(&content_key("keep"))));
    }

    #[tokio::test]
    async fn test_sweep_keeps_entry_when_content_removal_fails() {
        let (accounting, store, clock) = accounting();
        download(&accounting, "stuck", 10, 60).await;
        download(&accounting, "gone", 10, 60).await;
        store.fail_removal_of(store_key(&content_key("stuck")));
        clock.advance(chrono::Duration::seconds(61));

        let removed = accounting.sweep_expired(clock.now()).await;

        assert_eq!(removed, vec!["gone"]);
        assert!(accounting.get("stuck").is_some());
        assert!(store.contains(&store_key(&content_key("stuck"))));
    }

    #[tokio::test]
    async fn test_remove_and_reload() {
        let (accounting, store, _clock) = accounting();
        download(&accounting, "c1", 10, 60).await;
        download(&accounting, "c2", 10, 60).await;

        assert!(accounting.remove("c1").await.unwrap());
        assert!(!accounting.remove("c1").await.unwrap());

        let runtime = SyncRuntime::new();
        let reloaded = StorageAccounting::new(
            CacheLayer::new(store.clone(), CacheSettings::new(), runtime),
            StorageSettings::default(),
        );
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(reloaded.entries()[0].resource_id, "c2");
    }
}
