//! Remote document provider interface.
//!
//! The provider holds one document per owner mapping each owned resource id
//! to its authoritative version, plus the owner-scoped mirror of what this
//! owner has downloaded and whether an update is running. Resource content is
//! fetched by id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stride_types::{Document, VersionStatus};
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};

/// Shared handle to a remote provider.
pub type SharedRemote = Arc<dyn RemoteDocuments>;

/// Authoritative metadata for one resource in an owner document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedResource {
    pub remote_version: String,

    /// Mirror: the version this owner last finished downloading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_version: Option<String>,

    /// Mirror: reconciliation status, visible to other processes.
    #[serde(default)]
    pub status: VersionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl OwnedResource {
    pub fn at_version(version: impl Into<String>) -> Self {
        Self {
            remote_version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_downloaded(mut self, version: impl Into<String>) -> Self {
        self.downloaded_version = Some(version.into());
        self
    }
}

/// Per-owner document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerDocument {
    pub owner_id: String,
    #[serde(default)]
    pub resources: BTreeMap<String, OwnedResource>,
}

impl OwnerDocument {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>, resource: OwnedResource) -> Self {
        self.resources.insert(resource_id.into(), resource);
        self
    }

    /// Owned resource ids in ascending order.
    pub fn resource_ids(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }
}

/// Resource content as served by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResource {
    pub id: String,
    pub version: String,
    pub content: Document,
}

/// Partial update of one resource's mirror fields in an owner document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorPatch {
    pub resource_id: String,
    /// Left untouched when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_version: Option<String>,
    pub status: VersionStatus,
    pub status_changed_at: DateTime<Utc>,
}

/// Remote document provider.
///
/// Absence is `Ok(None)`, never an error.
#[async_trait]
pub trait RemoteDocuments: Send + Sync {
    /// Fetch an owner's document.
    async fn owner_document(&self, owner_id: &str) -> RemoteResult<Option<OwnerDocument>>;

    /// Fetch a resource's current content and version.
    async fn resource(&self, resource_id: &str) -> RemoteResult<Option<RemoteResource>>;

    /// Apply a partial update to an owner's document.
    async fn update_owner(&self, owner_id: &str, patch: MirrorPatch) -> RemoteResult<()>;
}

#[derive(Debug, Default)]
struct MockState {
    owners: HashMap<String, OwnerDocument>,
    resources: HashMap<String, RemoteResource>,
    offline: bool,
    reject_updates: bool,
    fetch_delay: Option<Duration>,
    /// Remaining forced failures per resource id.
    failing: HashMap<String, usize>,
    /// Remaining malformed responses per resource id.
    malformed: HashMap<String, usize>,
    resource_fetches: HashMap<String, usize>,
    owner_fetches: HashMap<String, usize>,
    patches: Vec<(String, MirrorPatch)>,
}

/// In-memory provider with failure injection.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: RwLock<MockState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an owner document.
    pub fn put_owner(&self, document: OwnerDocument) {
        self.state
            .write()
            .owners
            .insert(document.owner_id.clone(), document);
    }

    /// Publish new content for a resource.
    pub fn put_resource(
        &self,
        id: impl Into<String>,
        version: impl Into<String>,
        content: Document,
    ) {
        let id = id.into();
        self.state.write().resources.insert(
            id.clone(),
            RemoteResource {
                id,
                version: version.into(),
                content,
            },
        );
    }

    /// Bump the authoritative version of a resource in an owner document.
    pub fn set_remote_version(&self, owner_id: &str, resource_id: &str, version: impl Into<String>) {
        let mut state = self.state.write();
        let owner = state
            .owners
            .entry(owner_id.to_string())
            .or_insert_with(|| OwnerDocument::new(owner_id));
        owner
            .resources
            .entry(resource_id.to_string())
            .or_default()
            .remote_version = version.into();
    }

    pub fn remove_resource(&self, resource_id: &str) {
        self.state.write().resources.remove(resource_id);
    }

    /// Every call fails with `Unavailable` while offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.write().offline = offline;
    }

    /// Reject owner document updates.
    pub fn set_reject_updates(&self, reject: bool) {
        self.state.write().reject_updates = reject;
    }

    /// Delay every resource fetch.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.state.write().fetch_delay = delay;
    }

    /// Fail the next `times` fetches of a resource with `Rejected`.
    pub fn fail_resource(&self, resource_id: &str, times: usize) {
        self.state
            .write()
            .failing
            .insert(resource_id.to_string(), times);
    }

    /// Serve content missing its identifier for the next `times` fetches.
    pub fn serve_malformed(&self, resource_id: &str, times: usize) {
        self.state
            .write()
            .malformed
            .insert(resource_id.to_string(), times);
    }

    pub fn resource_fetch_count(&self, resource_id: &str) -> usize {
        self.state
            .read()
            .resource_fetches
            .get(resource_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn owner_fetch_count(&self, owner_id: &str) -> usize {
        self.state
            .read()
            .owner_fetches
            .get(owner_id)
            .copied()
            .unwrap_or(0)
    }

    /// Current copy of an owner document.
    pub fn owner(&self, owner_id: &str) -> Option<OwnerDocument> {
        self.state.read().owners.get(owner_id).cloned()
    }

    /// Every patch applied so far, in order.
    pub fn patches(&self) -> Vec<(String, MirrorPatch)> {
        self.state.read().patches.clone()
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.state.read().offline {
            return Err(RemoteError::Unavailable("remote offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDocuments for MockRemote {
    async fn owner_document(&self, owner_id: &str) -> RemoteResult<Option<OwnerDocument>> {
        self.check_online()?;
        let mut state = self.state.write();
        *state.owner_fetches.entry(owner_id.to_string()).or_default() += 1;
        Ok(state.owners.get(owner_id).cloned())
    }

    async fn resource(&self, resource_id: &str) -> RemoteResult<Option<RemoteResource>> {
        self.check_online()?;
        let delay = {
            let mut state = self.state.write();
            *state
                .resource_fetches
                .entry(resource_id.to_string())
                .or_default() += 1;
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write();
        if let Some(remaining) = state.failing.get_mut(resource_id)
            && *remaining > 0
        {
            *remaining -= 1;
            debug!(resource_id, "Injected fetch failure");
            return Err(RemoteError::Rejected(format!("fetch of {resource_id} failed")));
        }

        let mut resource = state.resources.get(resource_id).cloned();
        if let Some(remaining) = state.malformed.get_mut(resource_id)
            && *remaining > 0
        {
            *remaining -= 1;
            if let Some(resource) = resource.as_mut() {
                resource.content = serde_json::json!({"sessions": []});
            }
        }
        Ok(resource)
    }

    async fn update_owner(&self, owner_id: &str, patch: MirrorPatch) -> RemoteResult<()> {
        self.check_online()?;
        let mut state = self.state.write();
        if state.reject_updates {
            return Err(RemoteError::Rejected("updates disabled".into()));
        }
        let Some(owner) = state.owners.get_mut(owner_id) else {
            return Err(RemoteError::Rejected(format!("unknown owner {owner_id}")));
        };

        let entry = owner.resources.entry(patch.resource_id.clone()).or_default();
        if let Some(version) = &patch.downloaded_version {
            entry.downloaded_version = Some(version.clone());
        }
        entry.status = patch.status;
        entry.status_changed_at = Some(patch.status_changed_at);

        state.patches.push((owner_id.to_string(), patch));
        Ok(())
    }
}
