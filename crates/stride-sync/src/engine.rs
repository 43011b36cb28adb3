//! Engine composition.
//!
//! [`SyncEngine`] owns one instance of every registry (cache, guard,
//! supervisor, epoch, accounting, bus) and wires the components together.
//! Nothing here is global; two engines over two stores are fully independent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stride_cache::{CacheLayer, FetchResult, Loaded, RefreshOutcome, SyncRuntime};
use stride_store::SharedStore;
use stride_types::{Document, ResourceKey};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::accounting::{StorageAccounting, content_key};
use crate::bus::{BusEvent, NotificationBus};
use crate::config::EngineSettings;
use crate::error::Result;
use crate::orchestrator::AggregateOrchestrator;
use crate::remote::SharedRemote;
use crate::version::{SyncOutcome, VersionEngine};

/// How long [`SyncEngine::shutdown`] waits for background tasks.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// The assembled content sync engine.
pub struct SyncEngine {
    runtime: SyncRuntime,
    cache: CacheLayer,
    accounting: Arc<StorageAccounting>,
    bus: NotificationBus,
    versions: VersionEngine,
    orchestrator: AggregateOrchestrator,
    settings: EngineSettings,
    owner: Mutex<Option<String>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("runtime", &self.runtime)
            .field("owner", &*self.owner.lock())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Wire up a fresh engine. Persisted state is not read; see
    /// [`restore`](Self::restore).
    pub fn new(
        store: SharedStore,
        remote: SharedRemote,
        settings: EngineSettings,
        runtime: SyncRuntime,
    ) -> Self {
        let cache = CacheLayer::new(store, settings.cache.clone(), runtime.clone());
        let accounting = Arc::new(StorageAccounting::new(
            cache.clone(),
            settings.storage.clone(),
        ));
        let bus = NotificationBus::new();
        let versions = VersionEngine::new(
            cache.clone(),
            Arc::clone(&remote),
            Arc::clone(&accounting),
            bus.clone(),
            settings.sync.clone(),
        );
        let orchestrator = AggregateOrchestrator::new(cache.clone(), remote, versions.clone());
        let (shutdown, _) = watch::channel(false);

        Self {
            runtime,
            cache,
            accounting,
            bus,
            versions,
            orchestrator,
            settings,
            owner: Mutex::new(None),
            shutdown,
        }
    }

    /// Wire up an engine and load persisted version records and the storage
    /// index.
    pub async fn restore(
        store: SharedStore,
        remote: SharedRemote,
        settings: EngineSettings,
        runtime: SyncRuntime,
    ) -> Result<Self> {
        let engine = Self::new(store, remote, settings, runtime);
        let records = engine.versions.load_records().await?;
        let indexed = engine.accounting.load().await?;
        info!(records, indexed, "Sync engine restored");
        Ok(engine)
    }

    pub fn runtime(&self) -> &SyncRuntime {
        &self.runtime
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn accounting(&self) -> &StorageAccounting {
        &self.accounting
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn versions(&self) -> &VersionEngine {
        &self.versions
    }

    pub fn orchestrator(&self) -> &AggregateOrchestrator {
        &self.orchestrator
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn current_owner(&self) -> Option<String> {
        self.owner.lock().clone()
    }

    /// Stale-while-revalidate load with the TTL configured for the key's kind.
    ///
    /// A background refresh whose payload fails validation twice publishes a
    /// failed event for the key.
    pub async fn load<F, Fut>(&self, key: &ResourceKey, fetcher: F) -> Loaded
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let ttl = self.cache.ttl_for(key);
        let bus = self.bus.clone();
        self.cache
            .load_observed(key, ttl, fetcher, move |key, outcome| {
                if outcome == RefreshOutcome::Invalid {
                    bus.publish(&BusEvent::failed(key.to_string()));
                }
            })
            .await
    }

    /// Cached content of a versioned resource plus a version check.
    ///
    /// The payload is whatever is cached right now; any update the check
    /// starts runs in the background.
    pub async fn open_resource(
        &self,
        owner_id: &str,
        resource_id: &str,
    ) -> (Option<Document>, SyncOutcome) {
        let payload = self
            .cache
            .read(&content_key(resource_id))
            .await
            .map(|entry| entry.payload);
        if payload.is_some() {
            self.accounting.touch(resource_id).await;
        }
        let outcome = self
            .versions
            .check_version_mismatch(owner_id, resource_id)
            .await;
        (payload, outcome)
    }

    /// Change the signed-in owner.
    ///
    /// Advances the epoch so in-flight work for the previous owner is
    /// discarded, then purges the previous owner's cached data.
    pub async fn switch_owner(&self, owner_id: Option<&str>) -> Result<()> {
        let previous = {
            let mut owner = self.owner.lock();
            if owner.as_deref() == owner_id {
                return Ok(());
            }
            std::mem::replace(&mut *owner, owner_id.map(str::to_string))
        };

        let epoch = self.runtime.epoch.advance();
        info!(from = ?previous, to = ?owner_id, epoch, "Owner switched");

        if let Some(previous) = previous {
            self.orchestrator.forget_owner(&previous);
            let purged = self.cache.purge_owner(&previous).await?;
            debug!(owner = %previous, purged, "Previous owner data purged");
        }
        Ok(())
    }

    /// Sweep expired content and reset stuck updates once. Returns the ids
    /// whose content was removed.
    pub async fn sweep_now(&self) -> Vec<String> {
        let removed = self.accounting.sweep_expired(self.runtime.now()).await;
        for resource_id in &removed {
            self.versions.clear_download(resource_id).await;
        }
        let reset = self.versions.run_watchdog().await;
        if !reset.is_empty() {
            info!(count = reset.len(), "Watchdog reset stuck updates");
        }
        removed
    }

    /// Run [`sweep_now`](Self::sweep_now) periodically on the supervisor
    /// until [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut stop = self.shutdown.subscribe();
        let interval = self.settings.storage.sweep_interval;
        let tag = self.runtime.epoch.tag();

        self.runtime.tasks.spawn("storage-sweeper", &tag, async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = engine.sweep_now().await;
                        debug!(count = removed.len(), "Periodic sweep finished");
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Sweeper stopped");
        });
    }

    /// Stop periodic work and wait for every background task to finish,
    /// aborting whatever is still running after [`SHUTDOWN_GRACE`].
    pub async fn shutdown(&self) {
        self.shutdown_within(SHUTDOWN_GRACE).await;
    }

    /// [`shutdown`](Self::shutdown) with an explicit grace period.
    pub async fn shutdown_within(&self, grace: Duration) {
        self.shutdown.send_replace(true);
        if tokio::time::timeout(grace, self.runtime.tasks.wait_idle())
            .await
            .is_err()
        {
            let aborted = self.runtime.tasks.abort_all();
            warn!(aborted, ?grace, "Background tasks outlived the shutdown grace period");
        }
        info!("Sync engine shut down");
    }
}
