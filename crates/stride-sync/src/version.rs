//! Version reconciliation engine.
//!
//! One [`VersionRecord`] per versioned resource, driven through a small state
//! machine:
//!
//! ```text
//!            mismatch + admitted            replacement ok
//!   Ready ───────────────────────▶ Updating ───────────────▶ Ready
//!     ▲                              │  │
//!     │      watchdog (stuck)        │  │ replacement failed
//!     └──────────────────────────────┘  ▼
//!                                     Failed ──retry──▶ Updating
//! ```
//!
//! The sync guard admission for a resource's content key is held for the
//! whole time its record is `Updating`. The `Updating` transition is mirrored
//! into the owner document before content replacement starts, so other
//! processes can see it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stride_cache::{CacheLayer, EpochTag, GuardTicket};
use stride_store::StoreExt;
use stride_types::{Document, ResourceKind, VersionStatus};
use tracing::{debug, error, info, warn};

use crate::accounting::{DownloadMetadata, StorageAccounting, content_key};
use crate::bus::{BusEvent, NotificationBus};
use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::remote::{MirrorPatch, OwnedResource, RemoteResource, SharedRemote};

/// Namespace for version records in the persistent store.
pub const VERSION_PREFIX: &str = "stride:version:";

fn record_key(resource_id: &str) -> String {
    format!("{VERSION_PREFIX}{resource_id}")
}

/// Local reconciliation state of one versioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub resource_id: String,
    /// Version of the content currently stored locally. `None` until the
    /// first successful download.
    #[serde(default)]
    pub downloaded_version: Option<String>,
    /// Last authoritative version observed.
    pub remote_version: String,
    #[serde(default)]
    pub status: VersionStatus,
    pub last_status_change_at: DateTime<Utc>,
}

impl VersionRecord {
    pub fn new(
        resource_id: impl Into<String>,
        downloaded_version: Option<String>,
        remote_version: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            downloaded_version,
            remote_version: remote_version.into(),
            status: VersionStatus::Ready,
            last_status_change_at: now,
        }
    }

    /// Whether the local content lags the remote version.
    pub fn needs_update(&self) -> bool {
        self.downloaded_version.as_deref() != Some(self.remote_version.as_str())
    }

    fn transition(&mut self, status: VersionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.last_status_change_at = now;
    }
}

/// Result of a version check or reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Local content matches the remote version.
    UpToDate { version: String },

    /// A replacement was admitted and started in the background.
    UpdateStarted { from: Option<String>, to: String },

    /// A replacement ran to completion.
    Updated { version: String },

    /// A replacement ran and failed; the resource now needs a retry.
    Failed { reason: String },

    /// The resource rests in `Failed`; only an explicit retry moves it.
    NeedsRetry,

    /// Another update holds the resource. Carries the best cached payload.
    AlreadyInProgress { cached: Option<Document> },

    /// A stuck update was reset and versions were not compared again.
    WatchdogReset,

    /// The remote could not be reached. Carries the best cached payload.
    Unavailable { cached: Option<Document> },

    /// The owner or the resource does not exist remotely.
    NotFound,

    /// The calling context changed before the work completed.
    Superseded,
}

impl SyncOutcome {
    /// Cached payload handed back with a short-circuited check.
    pub fn cached(&self) -> Option<&Document> {
        match self {
            SyncOutcome::AlreadyInProgress { cached } | SyncOutcome::Unavailable { cached } => {
                cached.as_ref()
            }
            _ => None,
        }
    }
}

/// An admitted replacement that has not run yet.
struct Replacement {
    ticket: GuardTicket,
    owner_id: String,
    resource_id: String,
    from: Option<String>,
    target: String,
    /// Status to return to if the result is discarded.
    prior: VersionStatus,
    tag: EpochTag,
}

enum Decision {
    Settled(SyncOutcome),
    Start(Replacement),
}

struct VersionInner {
    cache: CacheLayer,
    remote: SharedRemote,
    accounting: Arc<StorageAccounting>,
    bus: NotificationBus,
    settings: SyncSettings,
    records: Mutex<HashMap<String, VersionRecord>>,
}

/// Per-resource version state machine.
///
/// Cheap to clone; clones share records and collaborators.
#[derive(Clone)]
pub struct VersionEngine {
    inner: Arc<VersionInner>,
}

impl std::fmt::Debug for VersionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionEngine")
            .field("records", &self.inner.records.lock().len())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl VersionEngine {
    pub fn new(
        cache: CacheLayer,
        remote: SharedRemote,
        accounting: Arc<StorageAccounting>,
        bus: NotificationBus,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(VersionInner {
                cache,
                remote,
                accounting,
                bus,
                settings,
                records: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.cache.runtime().now()
    }

    /// Current record for a resource.
    pub fn record(&self, resource_id: &str) -> Option<VersionRecord> {
        self.inner.records.lock().get(resource_id).cloned()
    }

    pub fn status(&self, resource_id: &str) -> Option<VersionStatus> {
        self.inner
            .records
            .lock()
            .get(resource_id)
            .map(|record| record.status)
    }

    /// All records, ordered by resource id.
    pub fn records(&self) -> Vec<VersionRecord> {
        let mut records: Vec<_> = self.inner.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        records
    }

    /// Load persisted records into memory. Returns how many were restored.
    ///
    /// No update of this process can be running yet, so a record persisted as
    /// `Updating` is restored as `Ready`.
    pub async fn load_records(&self) -> Result<usize> {
        let store = self.inner.cache.store();
        let keys = store.keys_with_prefix(VERSION_PREFIX).await?;
        let now = self.now();

        let mut restored = Vec::with_capacity(keys.len());
        for key in keys {
            match store.get_json::<VersionRecord>(&key).await {
                Ok(Some(mut record)) => {
                    if record.status.is_updating() {
                        info!(resource_id = %record.resource_id, "Interrupted update found, resetting to ready");
                        record.transition(VersionStatus::Ready, now);
                    }
                    restored.push(record);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable version record"),
            }
        }

        let count = restored.len();
        let mut records = self.inner.records.lock();
        for record in restored {
            records.insert(record.resource_id.clone(), record);
        }
        debug!(count, "Version records restored");
        Ok(count)
    }

    async fn save(&self, record: VersionRecord) {
        self.inner
            .records
            .lock()
            .insert(record.resource_id.clone(), record.clone());
        if let Err(e) = self
            .inner
            .cache
            .store()
            .set_json(&record_key(&record.resource_id), &record)
            .await
        {
            warn!(resource_id = %record.resource_id, error = %e, "Failed to persist version record");
        }
    }

    async fn mirror(&self, owner_id: &str, record: &VersionRecord) {
        let patch = MirrorPatch {
            resource_id: record.resource_id.clone(),
            downloaded_version: record.downloaded_version.clone(),
            status: record.status,
            status_changed_at: record.last_status_change_at,
        };
        if let Err(e) = self.inner.remote.update_owner(owner_id, patch).await {
            warn!(owner = %owner_id, resource_id = %record.resource_id, error = %e, "Failed to mirror status to owner document");
        }
    }

    async fn cached_payload(&self, resource_id: &str) -> Option<Document> {
        self.inner
            .cache
            .read(&content_key(resource_id))
            .await
            .map(|entry| entry.payload)
    }

    fn is_stuck(&self, changed_at: DateTime<Utc>) -> bool {
        self.inner
            .cache
            .is_stale(changed_at, self.inner.settings.stuck_threshold)
    }

    /// Force a stuck record back to `Ready` and release its admission.
    async fn watchdog_reset(&self, mut record: VersionRecord) {
        warn!(
            resource_id = %record.resource_id,
            since = %record.last_status_change_at,
            "Update stuck past threshold, resetting to ready"
        );
        record.transition(VersionStatus::Ready, self.now());
        let resource_id = record.resource_id.clone();
        self.save(record).await;
        self.inner
            .cache
            .runtime()
            .guard
            .release(&content_key(&resource_id));
    }

    /// Reset every record stuck in `Updating`. Returns the ids reset.
    pub async fn run_watchdog(&self) -> Vec<String> {
        let stuck: Vec<VersionRecord> = self
            .inner
            .records
            .lock()
            .values()
            .filter(|r| r.status.is_updating())
            .cloned()
            .collect();

        let mut reset = Vec::new();
        for record in stuck {
            if self.is_stuck(record.last_status_change_at) {
                reset.push(record.resource_id.clone());
                self.watchdog_reset(record).await;
            }
        }
        reset
    }

    /// Compare local and remote versions and start a background replacement
    /// on mismatch.
    ///
    /// Safe to call redundantly: apart from the `Ready -> Updating`
    /// transition (and a watchdog reset of a stuck update) it changes
    /// nothing.
    pub async fn check_version_mismatch(&self, owner_id: &str, resource_id: &str) -> SyncOutcome {
        let tag = self.inner.cache.runtime().epoch.tag();
        match self.decide(owner_id, resource_id, &tag).await {
            Decision::Settled(outcome) => outcome,
            Decision::Start(job) => {
                let outcome = SyncOutcome::UpdateStarted {
                    from: job.from.clone(),
                    to: job.target.clone(),
                };
                let engine = self.clone();
                self.inner
                    .cache
                    .runtime()
                    .tasks
                    .spawn("version-replacement", &tag, async move {
                        let resource_id = job.resource_id.clone();
                        let outcome = engine.run_replacement(job).await;
                        debug!(resource_id = %resource_id, ?outcome, "Background replacement finished");
                    });
                outcome
            }
        }
    }

    /// Like [`check_version_mismatch`](Self::check_version_mismatch), but
    /// runs any replacement inline and returns its terminal outcome.
    pub async fn reconcile(&self, owner_id: &str, resource_id: &str) -> SyncOutcome {
        let tag = self.inner.cache.runtime().epoch.tag();
        self.reconcile_tagged(owner_id, resource_id, &tag).await
    }

    pub(crate) async fn reconcile_tagged(
        &self,
        owner_id: &str,
        resource_id: &str,
        tag: &EpochTag,
    ) -> SyncOutcome {
        match self.decide(owner_id, resource_id, tag).await {
            Decision::Settled(outcome) => outcome,
            Decision::Start(job) => self.run_replacement(job).await,
        }
    }

    /// Re-run the full replacement for a resource resting in `Failed`.
    pub async fn retry(&self, owner_id: &str, resource_id: &str) -> Result<SyncOutcome> {
        let record = self
            .record(resource_id)
            .ok_or_else(|| SyncError::NotFound(resource_id.to_string()))?;
        if record.status != VersionStatus::Failed {
            return Err(SyncError::InvalidTransition {
                resource_id: resource_id.to_string(),
                from: record.status,
                to: VersionStatus::Updating,
            });
        }

        let tag = self.inner.cache.runtime().epoch.tag();
        let Some(ticket) = self
            .inner
            .cache
            .runtime()
            .guard
            .admit(&content_key(resource_id))
        else {
            return Ok(SyncOutcome::AlreadyInProgress {
                cached: self.cached_payload(resource_id).await,
            });
        };

        info!(resource_id, "Retrying failed update");
        let job = self.begin(ticket, owner_id, record, &tag).await;
        Ok(self.run_replacement(job).await)
    }

    /// Mark a resource's local content as gone so the next check downloads
    /// it again. Records with an update in flight are left alone.
    pub async fn clear_download(&self, resource_id: &str) {
        let Some(mut record) = self.record(resource_id) else {
            return;
        };
        if record.status.is_updating() || record.downloaded_version.is_none() {
            return;
        }
        record.downloaded_version = None;
        self.save(record).await;
        debug!(resource_id, "Download cleared");
    }

    /// Drop everything known about a resource: its record, its content and
    /// its storage index entry.
    pub async fn forget(&self, resource_id: &str) -> Result<()> {
        if self.status(resource_id) == Some(VersionStatus::Updating) {
            return Err(SyncError::Busy(resource_id.to_string()));
        }

        self.inner.accounting.remove(resource_id).await?;
        self.inner.records.lock().remove(resource_id);
        self.inner
            .cache
            .store()
            .remove(&record_key(resource_id))
            .await?;
        info!(resource_id, "Resource forgotten");
        Ok(())
    }

    async fn decide(&self, owner_id: &str, resource_id: &str, tag: &EpochTag) -> Decision {
        // A live local update short-circuits; a stuck one is taken over.
        if let Some(record) = self.record(resource_id)
            && record.status.is_updating()
        {
            if !self.is_stuck(record.last_status_change_at) {
                debug!(resource_id, "Update already in progress");
                return Decision::Settled(SyncOutcome::AlreadyInProgress {
                    cached: self.cached_payload(resource_id).await,
                });
            }
            self.watchdog_reset(record).await;
            if !self.inner.settings.watchdog_reverify {
                return Decision::Settled(SyncOutcome::WatchdogReset);
            }
        }

        let owned = match self.inner.remote.owner_document(owner_id).await {
            Ok(Some(document)) => document.resources.get(resource_id).cloned(),
            Ok(None) => None,
            Err(e) => {
                warn!(owner = %owner_id, resource_id, error = %e, "Owner document unavailable, using cached content");
                return Decision::Settled(SyncOutcome::Unavailable {
                    cached: self.cached_payload(resource_id).await,
                });
            }
        };

        if !tag.is_current() {
            debug!(resource_id, "Discarding version check from a superseded context");
            return Decision::Settled(SyncOutcome::Superseded);
        }

        let Some(owned) = owned else {
            debug!(owner = %owner_id, resource_id, "Resource not in owner document");
            return Decision::Settled(SyncOutcome::NotFound);
        };

        if self.mirror_shows_live_update(resource_id, &owned) {
            debug!(resource_id, "Owner document shows an update running elsewhere");
            return Decision::Settled(SyncOutcome::AlreadyInProgress {
                cached: self.cached_payload(resource_id).await,
            });
        }

        // A first check only trusts content that is actually stored here.
        let mut record = match self.record(resource_id) {
            Some(record) => record,
            None => VersionRecord::new(
                resource_id,
                self.inner.accounting.local_version(resource_id).await,
                owned.remote_version.clone(),
                self.now(),
            ),
        };

        if record.status == VersionStatus::Failed {
            return Decision::Settled(SyncOutcome::NeedsRetry);
        }
        if record.status.is_updating() {
            // Started by a concurrent check while the owner document was in flight.
            return Decision::Settled(SyncOutcome::AlreadyInProgress {
                cached: self.cached_payload(resource_id).await,
            });
        }

        let observed_changed = record.remote_version != owned.remote_version;
        record.remote_version = owned.remote_version.clone();

        if !record.needs_update() {
            if observed_changed || self.record(resource_id).is_none() {
                self.save(record.clone()).await;
            }
            return Decision::Settled(SyncOutcome::UpToDate {
                version: record.remote_version,
            });
        }

        let Some(ticket) = self
            .inner
            .cache
            .runtime()
            .guard
            .admit(&content_key(resource_id))
        else {
            debug!(resource_id, "Sync guard refused admission");
            return Decision::Settled(SyncOutcome::AlreadyInProgress {
                cached: self.cached_payload(resource_id).await,
            });
        };

        Decision::Start(self.begin(ticket, owner_id, record, tag).await)
    }

    /// Whether the owner document reports an `Updating` that this process
    /// does not hold and that is still within the stuck threshold.
    fn mirror_shows_live_update(&self, resource_id: &str, owned: &OwnedResource) -> bool {
        if !owned.status.is_updating()
            || self
                .inner
                .cache
                .runtime()
                .guard
                .contains(&content_key(resource_id))
        {
            return false;
        }
        match owned.status_changed_at {
            Some(changed_at) => !self.is_stuck(changed_at),
            None => false,
        }
    }

    /// Move an admitted record to `Updating`, persist it and mirror it to
    /// the owner document before any content is fetched.
    async fn begin(
        &self,
        ticket: GuardTicket,
        owner_id: &str,
        mut record: VersionRecord,
        tag: &EpochTag,
    ) -> Replacement {
        let prior = record.status;
        record.transition(VersionStatus::Updating, self.now());
        self.save(record.clone()).await;
        self.mirror(owner_id, &record).await;

        info!(
            resource_id = %record.resource_id,
            from = ?record.downloaded_version,
            to = %record.remote_version,
            "Update started"
        );
        Replacement {
            ticket,
            owner_id: owner_id.to_string(),
            resource_id: record.resource_id,
            from: record.downloaded_version,
            target: record.remote_version,
            prior,
            tag: tag.clone(),
        }
    }

    /// Fetch the resource content, forcing one re-fetch if it fails
    /// validation.
    async fn fetch_content(&self, resource_id: &str) -> std::result::Result<RemoteResource, String> {
        let shapes = &self.inner.cache.settings().shapes;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let resource = match self.inner.remote.resource(resource_id).await {
                Ok(Some(resource)) => resource,
                Ok(None) => return Err("resource no longer exists remotely".to_string()),
                Err(e) => return Err(e.to_string()),
            };
            match shapes.validate(ResourceKind::Course, &resource.content) {
                Ok(()) => return Ok(resource),
                Err(e) if attempts < 2 => {
                    warn!(resource_id, error = %e, "Fetched content failed validation, re-fetching");
                    self.inner.cache.invalidate(&content_key(resource_id)).await;
                }
                Err(e) => return Err(format!("content failed validation twice: {e}")),
            }
        }
    }

    async fn run_replacement(&self, job: Replacement) -> SyncOutcome {
        let Replacement {
            ticket,
            owner_id,
            resource_id,
            target,
            prior,
            tag,
            ..
        } = job;

        let fetched = self.fetch_content(&resource_id).await;

        if !ticket.is_held() {
            debug!(resource_id = %resource_id, "Admission taken over while replacing, discarding result");
            return SyncOutcome::Superseded;
        }
        let Some(mut record) = self.record(&resource_id) else {
            return SyncOutcome::Superseded;
        };

        if !tag.is_current() {
            debug!(resource_id = %resource_id, epoch = tag.value(), "Discarding replacement from a superseded context");
            record.transition(prior, self.now());
            self.mirror(&owner_id, &record).await;
            self.save(record).await;
            ticket.release();
            return SyncOutcome::Superseded;
        }

        let fetched = match fetched {
            Ok(resource) => {
                let size = resource.content.to_string().len() as u64;
                match self
                    .inner
                    .cache
                    .write(&content_key(&resource_id), resource.content)
                    .await
                {
                    Ok(_) => Ok((resource.version, size)),
                    Err(e) => Err(e.to_string()),
                }
            }
            Err(reason) => Err(reason),
        };

        match fetched {
            Ok((version, size)) => {
                self.inner
                    .accounting
                    .record_download(
                        &resource_id,
                        DownloadMetadata::sized(size).with_version(version.clone()),
                    )
                    .await;

                if version != target {
                    debug!(resource_id = %resource_id, expected = %target, fetched = %version, "Remote moved on during update");
                }
                record.downloaded_version = Some(version.clone());
                record.transition(VersionStatus::Ready, self.now());
                self.save(record.clone()).await;
                self.mirror(&owner_id, &record).await;
                ticket.release();

                info!(resource_id = %resource_id, version = %version, "Update complete");
                self.inner
                    .bus
                    .publish(&BusEvent::complete(&resource_id, &version));
                SyncOutcome::Updated { version }
            }
            Err(reason) => {
                record.transition(VersionStatus::Failed, self.now());
                self.save(record.clone()).await;
                self.mirror(&owner_id, &record).await;
                ticket.release();

                error!(resource_id = %resource_id, %reason, "Update failed");
                self.inner.bus.publish(&BusEvent::failed(&resource_id));
                SyncOutcome::Failed { reason }
            }
        }
    }
}
