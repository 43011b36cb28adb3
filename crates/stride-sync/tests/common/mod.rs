//! Shared fixtures for the sync engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use stride_cache::SyncRuntime;
use stride_store::MemoryStore;
use stride_sync::{
    BusEvent, DownloadMetadata, EngineSettings, EventKind, MockRemote, OwnedResource,
    OwnerDocument, Subscription, SyncEngine, content_key,
};
use stride_types::{Document, ManualClock};

pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<MemoryStore>,
    pub remote: Arc<MockRemote>,
    pub clock: ManualClock,
}

pub fn harness() -> Harness {
    harness_with(EngineSettings::default())
}

pub fn harness_with(settings: EngineSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MockRemote::new());
    let clock = ManualClock::starting_now();
    let runtime = SyncRuntime::with_clock(Arc::new(clock.clone()));
    let engine = SyncEngine::new(store.clone(), remote.clone(), settings, runtime);
    Harness {
        engine,
        store,
        remote,
        clock,
    }
}

/// Course content that passes the default shape check.
pub fn course(id: &str, version: &str) -> Document {
    json!({
        "id": id,
        "version": version,
        "sessions": [{"title": "warmup"}, {"title": "intervals"}]
    })
}

impl Harness {
    /// Register a resource for `owner` with the given mirror and remote
    /// versions, and publish its content at the remote version.
    ///
    /// A `downloaded` version is also stored locally, as if this device had
    /// fetched it earlier.
    pub async fn seed(&self, owner: &str, resource_id: &str, downloaded: Option<&str>, remote: &str) {
        let mut document = self
            .remote
            .owner(owner)
            .unwrap_or_else(|| OwnerDocument::new(owner));
        let mut owned = OwnedResource::at_version(remote);
        owned.downloaded_version = downloaded.map(str::to_string);
        document.resources.insert(resource_id.to_string(), owned);
        self.remote.put_owner(document);
        self.remote
            .put_resource(resource_id, remote, course(resource_id, remote));

        if let Some(version) = downloaded {
            self.store_locally(resource_id, version).await;
        }
    }

    /// Put content at `version` in the local cache and storage index only.
    pub async fn store_locally(&self, resource_id: &str, version: &str) {
        let content = course(resource_id, version);
        let size = content.to_string().len() as u64;
        self.engine
            .cache()
            .write(&content_key(resource_id), content)
            .await
            .unwrap();
        self.engine
            .accounting()
            .record_download(resource_id, DownloadMetadata::sized(size).with_version(version))
            .await;
    }

    /// Collect every bus event of `kind`.
    pub fn events(&self, kind: EventKind) -> (Arc<Mutex<Vec<BusEvent>>>, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = self
            .engine
            .bus()
            .subscribe(kind, move |event| sink.lock().push(event.clone()));
        (events, subscription)
    }

    pub async fn idle(&self) {
        self.engine.runtime().tasks.wait_idle().await;
    }
}
