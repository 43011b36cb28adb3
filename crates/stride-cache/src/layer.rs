//! TTL-aware read-through cache over the persistent store.
//!
//! Reads are served from a bounded in-memory LRU front, falling through to
//! the persistent store on a miss. Writes validate the payload shape, replace
//! the entry wholesale and write through to the store. Staleness never blocks
//! a read: [`CacheLayer::load_with_refresh`] returns whatever is cached and
//! schedules a background refresh when the entry is stale or absent.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use stride_store::{SharedStore, StoreError, StoreExt};
use stride_types::{Document, ResourceKey};
use tracing::{debug, error, trace, warn};

use crate::config::CacheSettings;
use crate::entry::{self, CacheEntry, Freshness, Loaded};
use crate::epoch::EpochTag;
use crate::error::{CacheError, FetchError, Result};
use crate::runtime::SyncRuntime;

/// Namespace for cache entries in the persistent store.
pub const CACHE_PREFIX: &str = "stride:cache:";

/// What a background fetcher produces: a document, `None` when the resource
/// does not exist at the source, or an error.
pub type FetchResult = std::result::Result<Option<Document>, FetchError>;

/// Persistent-store key for a cache entry.
pub fn store_key(key: &ResourceKey) -> String {
    format!("{CACHE_PREFIX}{key}")
}

/// How a refresh attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A fresh payload was written.
    Updated,
    /// The source no longer has the resource; the entry was evicted.
    NotFound,
    /// The source was unreachable; the cached entry was kept.
    Unavailable,
    /// The source failed the request; the cached entry was kept.
    Failed,
    /// The fetched payload failed validation twice; the entry is evicted.
    Invalid,
    /// Another refresh for the same key was already in flight.
    Skipped,
    /// The triggering context changed before the fetch completed.
    Superseded,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Payloads rejected by shape validation, on write or on read-back.
    pub rejected: u64,
    pub evictions: u64,
    /// Refreshes that actually ran a fetch.
    pub refreshes: u64,
}

struct CacheInner {
    store: SharedStore,
    front: Mutex<LruCache<ResourceKey, CacheEntry>>,
    settings: CacheSettings,
    runtime: SyncRuntime,
    stats: Mutex<CacheStats>,
}

/// Read-through, write-through cache of structured documents.
///
/// Cheap to clone; clones share the same front, store and runtime.
#[derive(Clone)]
pub struct CacheLayer {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("front_len", &self.inner.front.lock().len())
            .field("max_entries", &self.inner.settings.max_entries)
            .finish_non_exhaustive()
    }
}

impl CacheLayer {
    /// Create a cache over `store` sharing the given runtime registries.
    pub fn new(store: SharedStore, settings: CacheSettings, runtime: SyncRuntime) -> Self {
        let cap = NonZeroUsize::new(settings.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                store,
                front: Mutex::new(LruCache::new(cap)),
                settings,
                runtime,
                stats: Mutex::new(CacheStats::default()),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn runtime(&self) -> &SyncRuntime {
        &self.inner.runtime
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    /// TTL configured for the key's kind.
    pub fn ttl_for(&self, key: &ResourceKey) -> Duration {
        self.inner.settings.ttl_for(key.kind)
    }

    /// `now - last_synced_at > ttl`, against the runtime clock.
    pub fn is_stale(&self, last_synced_at: DateTime<Utc>, ttl: Duration) -> bool {
        entry::is_stale(last_synced_at, ttl, self.inner.runtime.now())
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.lock().clone()
    }

    /// Read the cached entry for `key`.
    ///
    /// Only touches the local store. Entries that cannot be decoded or fail
    /// their shape check are evicted and reported absent.
    pub async fn read(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let cached = self.inner.front.lock().get(key).cloned();
        if let Some(entry) = cached {
            trace!(key = %key, "Cache hit (memory)");
            self.inner.stats.lock().hits += 1;
            return Some(entry);
        }

        let loaded = match self.inner.store.get_json::<CacheEntry>(&store_key(key)).await {
            Ok(entry) => entry,
            Err(StoreError::Serde(e)) => {
                warn!(key = %key, error = %e, "Undecodable cache entry, evicting");
                self.inner.stats.lock().rejected += 1;
                self.invalidate(key).await;
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as absent");
                None
            }
        };

        let Some(entry) = loaded else {
            self.inner.stats.lock().misses += 1;
            return None;
        };

        if entry.key != *key {
            warn!(key = %key, stored = %entry.key, "Cache entry stored under the wrong key, evicting");
            self.reject_stored(key).await;
            return None;
        }

        if let Err(e) = self.inner.settings.shapes.validate(key.kind, &entry.payload) {
            warn!(key = %key, error = %e, "Cached payload failed validation, evicting");
            self.reject_stored(key).await;
            return None;
        }

        trace!(key = %key, "Cache hit (store)");
        self.inner.front.lock().put(key.clone(), entry.clone());
        self.inner.stats.lock().hits += 1;
        Some(entry)
    }

    /// Stored entry for `key` exactly as persisted, for inspection.
    ///
    /// Skips validation, never evicts and leaves the statistics alone.
    pub async fn peek(&self, key: &ResourceKey) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.inner.front.lock().peek(key).cloned() {
            return Ok(Some(entry));
        }
        Ok(self.inner.store.get_json::<CacheEntry>(&store_key(key)).await?)
    }

    async fn reject_stored(&self, key: &ResourceKey) {
        {
            let mut stats = self.inner.stats.lock();
            stats.rejected += 1;
            stats.misses += 1;
        }
        self.invalidate(key).await;
    }

    /// Replace the entry for `key` and stamp it with the current time.
    ///
    /// A payload that fails validation is rejected and the previous entry
    /// (if any) is evicted, so readers never see a half-valid state. A store
    /// failure is logged; the in-memory entry still takes effect.
    pub async fn write(&self, key: &ResourceKey, payload: Document) -> Result<CacheEntry> {
        if let Err(source) = self.inner.settings.shapes.validate(key.kind, &payload) {
            warn!(key = %key, error = %source, "Rejecting payload that failed validation");
            self.inner.stats.lock().rejected += 1;
            self.invalidate(key).await;
            return Err(CacheError::Validation {
                key: key.clone(),
                source,
            });
        }

        let entry = CacheEntry {
            key: key.clone(),
            payload,
            last_synced_at: self.inner.runtime.now(),
        };
        self.put_entry(&entry).await;
        self.inner.stats.lock().writes += 1;
        debug!(key = %key, "Cache entry written");
        Ok(entry)
    }

    /// Apply a local change to the cached payload and persist it immediately.
    ///
    /// The sync timestamp is left alone: an optimistic change is not a sync.
    /// Returns `Ok(None)` when nothing is cached for `key`.
    pub async fn update_optimistic<F>(
        &self,
        key: &ResourceKey,
        mutate: F,
    ) -> Result<Option<CacheEntry>>
    where
        F: FnOnce(&mut Document) + Send,
    {
        let Some(mut entry) = self.read(key).await else {
            return Ok(None);
        };
        mutate(&mut entry.payload);

        if let Err(source) = self.inner.settings.shapes.validate(key.kind, &entry.payload) {
            warn!(key = %key, error = %source, "Optimistic update produced an invalid payload");
            self.inner.stats.lock().rejected += 1;
            self.invalidate(key).await;
            return Err(CacheError::Validation {
                key: key.clone(),
                source,
            });
        }

        self.put_entry(&entry).await;
        Ok(Some(entry))
    }

    async fn put_entry(&self, entry: &CacheEntry) {
        self.inner
            .front
            .lock()
            .put(entry.key.clone(), entry.clone());
        if let Err(e) = self.inner.store.set_json(&store_key(&entry.key), entry).await {
            warn!(key = %entry.key, error = %e, "Cache entry not persisted, kept in memory");
        }
    }

    /// Drop the entry for `key` from memory and from the store, reporting a
    /// store failure to the caller.
    pub async fn remove(&self, key: &ResourceKey) -> Result<()> {
        self.inner.front.lock().pop(key);
        self.inner.store.remove(&store_key(key)).await?;
        self.inner.stats.lock().evictions += 1;
        debug!(key = %key, "Cache entry removed");
        Ok(())
    }

    /// Best-effort [`remove`](Self::remove): a store failure is only logged.
    pub async fn invalidate(&self, key: &ResourceKey) {
        if let Err(e) = self.remove(key).await {
            warn!(key = %key, error = %e, "Failed to remove cache entry from store");
        }
    }

    /// Stale-while-revalidate load.
    ///
    /// Returns the cached payload right away (or `Document::Null` when
    /// nothing is cached). When the entry is stale or absent, one background
    /// refresh is scheduled per call; the refresh itself goes through the sync
    /// guard, so concurrent calls for one key run at most one fetch. A fresh
    /// entry never schedules anything.
    pub async fn load_with_refresh<F, Fut>(
        &self,
        key: &ResourceKey,
        ttl: Duration,
        fetcher: F,
    ) -> Loaded
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        self.load_observed(key, ttl, fetcher, |_, _| {}).await
    }

    /// [`load_with_refresh`](Self::load_with_refresh) that hands the outcome
    /// of the background refresh to `on_outcome`. Not called when no refresh
    /// is scheduled.
    pub async fn load_observed<F, Fut, O>(
        &self,
        key: &ResourceKey,
        ttl: Duration,
        fetcher: F,
        on_outcome: O,
    ) -> Loaded
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
        O: FnOnce(&ResourceKey, RefreshOutcome) + Send + 'static,
    {
        let tag = self.inner.runtime.epoch.tag();

        let (payload, last_synced_at, freshness) = match self.read(key).await {
            Some(entry) if self.is_stale(entry.last_synced_at, ttl) => {
                (entry.payload, Some(entry.last_synced_at), Freshness::Stale)
            }
            Some(entry) => (entry.payload, Some(entry.last_synced_at), Freshness::Fresh),
            None => (Document::Null, None, Freshness::Absent),
        };

        let refresh_scheduled = freshness != Freshness::Fresh;
        if refresh_scheduled {
            let cache = self.clone();
            let task_key = key.clone();
            let task_tag = tag.clone();
            self.inner
                .runtime
                .tasks
                .spawn("cache-refresh", &tag, async move {
                    let outcome = cache.refresh(&task_key, &task_tag, &fetcher).await;
                    debug!(key = %task_key, ?outcome, "Background refresh finished");
                    on_outcome(&task_key, outcome);
                });
        }

        Loaded {
            payload,
            last_synced_at,
            freshness,
            refresh_scheduled,
        }
    }

    /// Fetch and apply a fresh payload for `key`, if no other refresh holds it.
    ///
    /// A payload that fails validation forces one immediate re-fetch. Results
    /// arriving after the epoch moved on are discarded.
    pub async fn refresh<F, Fut>(
        &self,
        key: &ResourceKey,
        tag: &EpochTag,
        fetcher: &F,
    ) -> RefreshOutcome
    where
        F: Fn() -> Fut + Sync,
        Fut: Future<Output = FetchResult> + Send,
    {
        let Some(ticket) = self.inner.runtime.guard.admit(key) else {
            debug!(key = %key, "Refresh already in flight, skipping");
            return RefreshOutcome::Skipped;
        };
        self.inner.stats.lock().refreshes += 1;

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let fetched = fetcher().await;

            if !tag.is_current() {
                debug!(key = %key, epoch = tag.value(), "Discarding refresh from a superseded context");
                break RefreshOutcome::Superseded;
            }

            match fetched {
                Ok(Some(doc)) => match self.write(key, doc).await {
                    Ok(_) => break RefreshOutcome::Updated,
                    Err(CacheError::Validation { .. }) if attempts < 2 => {
                        debug!(key = %key, "Re-fetching after validation failure");
                        continue;
                    }
                    Err(e) => {
                        error!(key = %key, error = %e, "Fetched payload failed validation again");
                        break RefreshOutcome::Invalid;
                    }
                },
                Ok(None) => {
                    debug!(key = %key, "Resource absent at source, evicting");
                    self.invalidate(key).await;
                    break RefreshOutcome::NotFound;
                }
                Err(FetchError::Unavailable(reason)) => {
                    warn!(key = %key, %reason, "Source unavailable, keeping cached copy");
                    break RefreshOutcome::Unavailable;
                }
                Err(FetchError::Failed(reason)) => {
                    warn!(key = %key, %reason, "Refresh failed, keeping cached copy");
                    break RefreshOutcome::Failed;
                }
            }
        };

        drop(ticket);
        outcome
    }

    /// All keys with an entry in the persistent store.
    pub async fn keys(&self) -> Result<Vec<ResourceKey>> {
        let raw = self.inner.store.keys_with_prefix(CACHE_PREFIX).await?;
        Ok(raw
            .iter()
            .filter_map(|k| {
                let suffix = &k[CACHE_PREFIX.len()..];
                match suffix.parse() {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(store_key = %k, error = %e, "Skipping unparsable cache key");
                        None
                    }
                }
            })
            .collect())
    }

    /// Remove every entry owned by `owner_id`. Returns how many were removed.
    pub async fn purge_owner(&self, owner_id: &str) -> Result<usize> {
        let mut owned: Vec<ResourceKey> = self
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.is_owned_by(owner_id))
            .collect();

        {
            let mut front = self.inner.front.lock();
            for (key, _) in front.iter() {
                if key.is_owned_by(owner_id) && !owned.contains(key) {
                    owned.push(key.clone());
                }
            }
            for key in &owned {
                front.pop(key);
            }
        }

        let store_keys: Vec<String> = owned.iter().map(store_key).collect();
        self.inner.store.remove_many(&store_keys).await?;

        debug!(owner = %owner_id, count = owned.len(), "Purged owner cache entries");
        Ok(owned.len())
    }

    /// Number of entries in the in-memory front.
    pub fn front_len(&self) -> usize {
        self.inner.front.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use stride_store::{MemoryStore, PersistentStore};
    use stride_types::{Clock, ManualClock, ResourceKind};

    struct Fixture {
        cache: CacheLayer,
        store: Arc<MemoryStore>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::starting_now();
        let runtime = SyncRuntime::with_clock(Arc::new(clock.clone()));
        let cache = CacheLayer::new(store.clone(), CacheSettings::new(), runtime);
        Fixture {
            cache,
            store,
            clock,
        }
    }

    fn course(id: &str) -> Document {
        json!({"id": id, "sessions": [{"title": "warmup"}]})
    }

    /// A fetcher that counts its calls and returns the given document.
    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
        doc: Document,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = FetchResult> + Send>> + Send + Sync + 'static
    {
        move || {
            let calls = Arc::clone(&calls);
            let doc = doc.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Some(doc))
            })
        }
    }

    #[tokio::test]
    async fn test_read_after_write_returns_payload_and_timestamp() {
        let f = fixture();
        let key = ResourceKey::course("c1");

        let written = f.cache.write(&key, course("c1")).await.unwrap();
        let read = f.cache.read(&key).await.unwrap();

        assert_eq!(read.payload, course("c1"));
        assert_eq!(read.last_synced_at, f.clock.now());
        assert_eq!(read, written);
        assert!(f.store.contains(&store_key(&key)));
    }

    #[tokio::test]
    async fn test_read_falls_through_to_store() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.cache.write(&key, course("c1")).await.unwrap();

        // A second cache over the same store starts with an empty front.
        let other = CacheLayer::new(
            f.store.clone(),
            CacheSettings::new(),
            f.cache.runtime().clone(),
        );
        assert_eq!(other.front_len(), 0);
        assert_eq!(other.read(&key).await.unwrap().payload, course("c1"));
        assert_eq!(other.front_len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_write_rejected_and_previous_entry_evicted() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.cache.write(&key, course("c1")).await.unwrap();

        let result = f.cache.write(&key, json!({"sessions": []})).await;

        assert!(matches!(result, Err(CacheError::Validation { .. })));
        assert!(f.cache.read(&key).await.is_none());
        assert!(!f.store.contains(&store_key(&key)));
    }

    #[tokio::test]
    async fn test_malformed_stored_entry_is_evicted_on_read() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.store.set(&store_key(&key), "{\"broken\":").await.unwrap();

        assert!(f.cache.read(&key).await.is_none());
        assert!(!f.store.contains(&store_key(&key)));
        assert_eq!(f.cache.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_stored_entry_with_bad_shape_is_evicted_on_read() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let entry = CacheEntry {
            key: key.clone(),
            payload: json!({"id": ""}),
            last_synced_at: f.clock.now(),
        };
        f.store.set_json(&store_key(&key), &entry).await.unwrap();

        assert!(f.cache.read(&key).await.is_none());
        assert!(!f.store.contains(&store_key(&key)));
    }

    #[tokio::test]
    async fn test_fresh_entry_triggers_no_fetch() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.cache.write(&key, course("c1")).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let loaded = f
            .cache
            .load_with_refresh(
                &key,
                Duration::from_secs(60),
                counting_fetcher(calls.clone(), course("c1")),
            )
            .await;
        f.cache.runtime().tasks.wait_idle().await;

        assert_eq!(loaded.freshness, Freshness::Fresh);
        assert!(!loaded.refresh_scheduled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.cache.runtime().tasks.spawned_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_entry_returns_cached_and_refreshes_once_per_call() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.cache.write(&key, course("old")).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(61));
        let calls = Arc::new(AtomicUsize::new(0));

        let loaded = f
            .cache
            .load_with_refresh(
                &key,
                Duration::from_secs(60),
                counting_fetcher(calls.clone(), course("new")),
            )
            .await;

        assert_eq!(loaded.freshness, Freshness::Stale);
        assert_eq!(loaded.payload, course("old"));
        f.cache.runtime().tasks.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.read(&key).await.unwrap().payload, course("new"));
    }

    #[tokio::test]
    async fn test_absent_entry_returns_default_and_fetches() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let calls = Arc::new(AtomicUsize::new(0));

        let loaded = f
            .cache
            .load_with_refresh(
                &key,
                Duration::from_secs(60),
                counting_fetcher(calls.clone(), course("c1")),
            )
            .await;

        assert!(loaded.is_absent());
        assert_eq!(loaded.payload, Document::Null);
        f.cache.runtime().tasks.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(f.cache.read(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_loads_for_same_key_fetch_at_most_once() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let loaded = f
                .cache
                .load_with_refresh(
                    &key,
                    Duration::from_secs(60),
                    counting_fetcher(calls.clone(), course("c1")),
                )
                .await;
            assert!(loaded.refresh_scheduled);
        }
        f.cache.runtime().tasks.wait_idle().await;

        assert_eq!(f.cache.runtime().tasks.spawned_count(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(f.cache.runtime().guard.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_refetches_once_after_validation_failure() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(Some(json!({"id": ""})))
                } else {
                    Ok(Some(course("c1")))
                }
            }
        };

        let tag = f.cache.runtime().epoch.tag();
        let outcome = f.cache.refresh(&key, &tag, &fetcher).await;

        assert_eq!(outcome, RefreshOutcome::Updated);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_gives_up_after_second_validation_failure() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let fetcher = || async { Ok(Some(json!({"sessions": "nope"}))) };

        let tag = f.cache.runtime().epoch.tag();
        let outcome = f.cache.refresh(&key, &tag, &fetcher).await;

        assert_eq!(outcome, RefreshOutcome::Invalid);
        assert!(f.cache.read(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_load_observed_reports_refresh_outcome() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        f.cache
            .load_observed(
                &key,
                Duration::from_secs(60),
                || async { Ok(Some(json!({"sessions": "nope"}))) },
                move |key, outcome| sink.lock().push((key.clone(), outcome)),
            )
            .await;
        f.cache.runtime().tasks.wait_idle().await;

        assert_eq!(*seen.lock(), vec![(key, RefreshOutcome::Invalid)]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_cache_when_unavailable() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.cache.write(&key, course("c1")).await.unwrap();
        let fetcher = || async { Err(FetchError::Unavailable("offline".into())) };

        let tag = f.cache.runtime().epoch.tag();
        let outcome = f.cache.refresh(&key, &tag, &fetcher).await;

        assert_eq!(outcome, RefreshOutcome::Unavailable);
        assert_eq!(f.cache.read(&key).await.unwrap().payload, course("c1"));
    }

    #[tokio::test]
    async fn test_refresh_evicts_when_not_found() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.cache.write(&key, course("c1")).await.unwrap();
        let fetcher = || async { Ok(None) };

        let tag = f.cache.runtime().epoch.tag();
        let outcome = f.cache.refresh(&key, &tag, &fetcher).await;

        assert_eq!(outcome, RefreshOutcome::NotFound);
        assert!(f.cache.read(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_from_superseded_epoch_is_discarded() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let calls = Arc::new(AtomicUsize::new(0));

        f.cache
            .load_with_refresh(
                &key,
                Duration::from_secs(60),
                counting_fetcher(calls.clone(), course("c1")),
            )
            .await;
        f.cache.runtime().epoch.advance();
        f.cache.runtime().tasks.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(f.cache.read(&key).await.is_none());
        assert!(f.cache.runtime().guard.is_empty());
    }

    #[tokio::test]
    async fn test_peek_leaves_invalid_entry_in_place() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        let entry = CacheEntry {
            key: key.clone(),
            payload: json!({"sessions": "nope"}),
            last_synced_at: f.clock.now(),
        };
        f.store.set_json(&store_key(&key), &entry).await.unwrap();

        let peeked = f.cache.peek(&key).await.unwrap().unwrap();

        assert_eq!(peeked.payload, json!({"sessions": "nope"}));
        assert!(f.store.contains(&store_key(&key)));
        assert_eq!(f.cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_entry_in_memory() {
        let f = fixture();
        let key = ResourceKey::course("c1");
        f.store.set_fail_writes(true);

        f.cache.write(&key, course("c1")).await.unwrap();

        assert!(!f.store.contains(&store_key(&key)));
        assert_eq!(f.cache.read(&key).await.unwrap().payload, course("c1"));
    }

    #[tokio::test]
    async fn test_optimistic_update_persists_without_touching_timestamp() {
        let f = fixture();
        let key = ResourceKey::progress("u1", "c1");
        let original = f
            .cache
            .write(&key, json!({"courseId": "c1", "completed": {}}))
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::seconds(5));

        let updated = f
            .cache
            .update_optimistic(&key, |doc| {
                doc["completed"]["s1"] = json!(true);
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.last_synced_at, original.last_synced_at);
        let stored: CacheEntry = f.store.get_json(&store_key(&key)).await.unwrap().unwrap();
        assert_eq!(stored.payload["completed"]["s1"], json!(true));
    }

    #[tokio::test]
    async fn test_optimistic_update_of_missing_entry_is_noop() {
        let f = fixture();
        let result = f
            .cache
            .update_optimistic(&ResourceKey::progress("u1", "c1"), |_| {})
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_purge_owner_only_removes_owned_entries() {
        let f = fixture();
        f.cache
            .write(&ResourceKey::profile("u1"), json!({"userId": "u1"}))
            .await
            .unwrap();
        f.cache
            .write(&ResourceKey::progress("u1", "c1"), json!({"courseId": "c1"}))
            .await
            .unwrap();
        f.cache
            .write(&ResourceKey::profile("u2"), json!({"userId": "u2"}))
            .await
            .unwrap();
        f.cache
            .write(&ResourceKey::course("c1"), course("c1"))
            .await
            .unwrap();

        let removed = f.cache.purge_owner("u1").await.unwrap();

        assert_eq!(removed, 2);
        let remaining = f.cache.keys().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&ResourceKey::profile("u2")));
        assert!(remaining.contains(&ResourceKey::course("c1")));
        assert!(f.cache.read(&ResourceKey::profile("u1")).await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_for_uses_kind() {
        let f = fixture();
        assert_eq!(
            f.cache.ttl_for(&ResourceKey::profile("u1")),
            f.cache.settings().ttl_for(ResourceKind::Profile)
        );
    }
}
