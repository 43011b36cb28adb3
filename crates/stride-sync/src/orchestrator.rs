//! Aggregated fetch orchestrator.
//!
//! Loads everything an owner holds in one call. The caller gets an immediate
//! snapshot assembled from the cache; a background pass then reconciles each
//! resource and republishes the merged result to [`watch`] subscribers after
//! every completion.
//!
//! The resource id list itself is cached as an `aggregate` cache entry for
//! a short window, so repeated loads do not resolve it again. That entry
//! holds ids, statuses and versions only; content always comes from the
//! per-resource entries.
//!
//! [`watch`]: AggregateOrchestrator::watch

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stride_cache::{CacheLayer, EpochTag};
use stride_types::{Document, ResourceKey, VersionStatus};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::accounting::content_key;
use crate::remote::SharedRemote;
use crate::version::VersionEngine;

/// One resource in an aggregate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateItem {
    pub resource_id: String,
    /// Best cached content, if any. Never persisted with the aggregate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Document>,
    #[serde(default)]
    pub status: VersionStatus,
    /// Locally downloaded version, if known.
    #[serde(default)]
    pub version: Option<String>,
}

/// Merged view of every resource an owner holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub owner_id: String,
    pub resources: Vec<AggregateItem>,
}

impl AggregateSnapshot {
    pub fn resource_ids(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|item| item.resource_id.clone())
            .collect()
    }

    pub fn item(&self, resource_id: &str) -> Option<&AggregateItem> {
        self.resources
            .iter()
            .find(|item| item.resource_id == resource_id)
    }

    /// Copy without content, as written to the aggregate cache entry.
    pub fn without_payloads(&self) -> Self {
        Self {
            owner_id: self.owner_id.clone(),
            resources: self
                .resources
                .iter()
                .map(|item| AggregateItem {
                    payload: None,
                    ..item.clone()
                })
                .collect(),
        }
    }
}

/// Where the id list for a load came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdSource {
    /// Aggregate cache, within its window.
    Cache,
    /// Owner document.
    Remote,
    /// Expired aggregate cache, used because the remote was unavailable.
    Fallback,
}

type SnapshotSender = watch::Sender<Option<AggregateSnapshot>>;

struct OrchestratorInner {
    cache: CacheLayer,
    remote: SharedRemote,
    versions: VersionEngine,
    watchers: Mutex<HashMap<String, SnapshotSender>>,
}

/// Composes per-owner loads from the cache and the version engine.
#[derive(Clone)]
pub struct AggregateOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for AggregateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateOrchestrator")
            .field("watched_owners", &self.inner.watchers.lock().len())
            .finish_non_exhaustive()
    }
}

impl AggregateOrchestrator {
    pub fn new(cache: CacheLayer, remote: SharedRemote, versions: VersionEngine) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                cache,
                remote,
                versions,
                watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to merged results for an owner. The receiver holds `None`
    /// until the first load.
    pub fn watch(&self, owner_id: &str) -> watch::Receiver<Option<AggregateSnapshot>> {
        self.inner
            .watchers
            .lock()
            .entry(owner_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Drop the watch channel of an owner. Receivers see the channel close.
    pub fn forget_owner(&self, owner_id: &str) {
        self.inner.watchers.lock().remove(owner_id);
    }

    fn publish(&self, snapshot: &AggregateSnapshot) {
        if let Some(sender) = self.inner.watchers.lock().get(&snapshot.owner_id) {
            sender.send_replace(Some(snapshot.clone()));
        }
    }

    /// Return the best available snapshot for an owner now, and reconcile
    /// every resource in the background.
    pub async fn load_owned(&self, owner_id: &str) -> AggregateSnapshot {
        let tag = self.inner.cache.runtime().epoch.tag();
        let (ids, source) = self.resolve_ids(owner_id).await;
        let snapshot = self.assemble(owner_id, &ids).await;

        if source == IdSource::Remote {
            self.store_aggregate(&snapshot).await;
        }
        self.publish(&snapshot);
        debug!(owner = %owner_id, count = ids.len(), ?source, "Aggregate snapshot assembled");

        if !ids.is_empty() {
            let orchestrator = self.clone();
            let owner = owner_id.to_string();
            let task_tag = tag.clone();
            self.inner
                .cache
                .runtime()
                .tasks
                .spawn("aggregate-refresh", &tag, async move {
                    orchestrator.refresh_all(&owner, &ids, &task_tag).await;
                });
        }

        snapshot
    }

    async fn resolve_ids(&self, owner_id: &str) -> (Vec<String>, IdSource) {
        let key = ResourceKey::aggregate(owner_id);
        let window = self.inner.versions.settings().aggregate_window;

        let cached = match self.inner.cache.read(&key).await {
            Some(entry) => match serde_json::from_value::<AggregateSnapshot>(entry.payload) {
                Ok(snapshot) if snapshot.owner_id == owner_id => {
                    Some((snapshot, entry.last_synced_at))
                }
                Ok(_) | Err(_) => {
                    warn!(owner = %owner_id, "Malformed aggregate cache entry, evicting");
                    self.inner.cache.invalidate(&key).await;
                    None
                }
            },
            None => None,
        };

        if let Some((snapshot, synced_at)) = &cached
            && !self.inner.cache.is_stale(*synced_at, window)
        {
            return (snapshot.resource_ids(), IdSource::Cache);
        }

        match self.inner.remote.owner_document(owner_id).await {
            Ok(Some(document)) => (document.resource_ids(), IdSource::Remote),
            Ok(None) => (Vec::new(), IdSource::Remote),
            Err(e) => {
                warn!(owner = %owner_id, error = %e, "Owner document unavailable, using last aggregate");
                let ids = cached
                    .map(|(snapshot, _)| snapshot.resource_ids())
                    .unwrap_or_default();
                (ids, IdSource::Fallback)
            }
        }
    }

    /// Assemble a snapshot from cached content and local version records,
    /// without any version check.
    async fn assemble(&self, owner_id: &str, ids: &[String]) -> AggregateSnapshot {
        let mut resources = Vec::with_capacity(ids.len());
        for resource_id in ids {
            let payload = self
                .inner
                .cache
                .read(&content_key(resource_id))
                .await
                .map(|entry| entry.payload);
            let record = self.inner.versions.record(resource_id);
            resources.push(AggregateItem {
                resource_id: resource_id.clone(),
                payload,
                status: record.as_ref().map(|r| r.status).unwrap_or_default(),
                version: record.and_then(|r| r.downloaded_version),
            });
        }
        AggregateSnapshot {
            owner_id: owner_id.to_string(),
            resources,
        }
    }

    async fn store_aggregate(&self, snapshot: &AggregateSnapshot) {
        let key = ResourceKey::aggregate(&snapshot.owner_id);
        match serde_json::to_value(snapshot.without_payloads()) {
            Ok(value) => {
                if let Err(e) = self.inner.cache.write(&key, value).await {
                    warn!(owner = %snapshot.owner_id, error = %e, "Failed to cache aggregate");
                }
            }
            Err(e) => warn!(owner = %snapshot.owner_id, error = %e, "Failed to encode aggregate"),
        }
    }

    /// Replace the cached aggregate's contents without restarting its window.
    async fn update_aggregate(&self, snapshot: &AggregateSnapshot) {
        let key = ResourceKey::aggregate(&snapshot.owner_id);
        let Ok(value) = serde_json::to_value(snapshot.without_payloads()) else {
            return;
        };
        if let Err(e) = self
            .inner
            .cache
            .update_optimistic(&key, move |doc| *doc = value)
            .await
        {
            warn!(owner = %snapshot.owner_id, error = %e, "Failed to update cached aggregate");
        }
    }

    async fn refresh_all(&self, owner_id: &str, ids: &[String], tag: &EpochTag) {
        for resource_id in ids {
            let outcome = self
                .inner
                .versions
                .reconcile_tagged(owner_id, resource_id, tag)
                .await;
            if !tag.is_current() {
                debug!(owner = %owner_id, "Owner context changed, dropping aggregate refresh");
                return;
            }
            debug!(owner = %owner_id, resource_id = %resource_id, ?outcome, "Aggregate member reconciled");

            let snapshot = self.assemble(owner_id, ids).await;
            self.update_aggregate(&snapshot).await;
            self.publish(&snapshot);
        }
    }
}
