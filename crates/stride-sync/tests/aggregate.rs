//! Aggregated per-owner loads and owner context switches.

mod common;

use common::{course, harness};
use serde_json::json;
use stride_cache::{CacheEntry, store_key};
use stride_store::StoreExt;
use stride_sync::content_key;
use stride_types::{ResourceKey, VersionStatus};

#[tokio::test]
async fn test_load_owned_returns_cached_snapshot_before_reconciling() {
    let h = harness();
    h.seed("u1", "c1", None, "v1").await;
    h.seed("u1", "c2", None, "v1").await;
    h.engine
        .cache()
        .write(&content_key("c1"), course("c1", "v0"))
        .await
        .unwrap();
    let mut updates = h.engine.orchestrator().watch("u1");

    let snapshot = h.engine.orchestrator().load_owned("u1").await;

    assert_eq!(snapshot.resource_ids(), vec!["c1", "c2"]);
    assert_eq!(
        snapshot.item("c1").unwrap().payload,
        Some(course("c1", "v0"))
    );
    assert!(snapshot.item("c2").unwrap().payload.is_none());
    assert_eq!(h.remote.resource_fetch_count("c1"), 0);
    assert_eq!(h.remote.resource_fetch_count("c2"), 0);
    assert!(updates.has_changed().unwrap());

    h.idle().await;

    let merged = updates.borrow_and_update().clone().unwrap();
    for id in ["c1", "c2"] {
        let item = merged.item(id).unwrap();
        assert_eq!(item.payload, Some(course(id, "v1")));
        assert_eq!(item.version.as_deref(), Some("v1"));
        assert_eq!(item.status, VersionStatus::Ready);
    }
}

#[tokio::test]
async fn test_aggregate_window_skips_id_resolution() {
    let h = harness();
    h.seed("u1", "c1", Some("v1"), "v1").await;

    h.engine.orchestrator().load_owned("u1").await;
    h.idle().await;
    let fetches = h.remote.owner_fetch_count("u1");

    h.engine.orchestrator().load_owned("u1").await;
    assert_eq!(h.remote.owner_fetch_count("u1"), fetches);
    h.idle().await;

    h.clock.advance(chrono::Duration::seconds(31));
    let fetches = h.remote.owner_fetch_count("u1");
    h.engine.orchestrator().load_owned("u1").await;
    assert_eq!(h.remote.owner_fetch_count("u1"), fetches + 1);
    h.idle().await;
}

#[tokio::test]
async fn test_aggregate_entry_holds_no_content() {
    let h = harness();
    h.seed("u1", "c1", None, "v1").await;
    h.engine.orchestrator().load_owned("u1").await;
    h.idle().await;

    let stored: CacheEntry = h
        .store
        .get_json(&store_key(&ResourceKey::aggregate("u1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.payload,
        json!({
            "ownerId": "u1",
            "resources": [{"resourceId": "c1", "status": "ready", "version": "v1"}]
        })
    );

    // Content comes from the course entry, not the aggregate.
    h.engine
        .cache()
        .write(&content_key("c1"), course("c1", "local"))
        .await
        .unwrap();
    let snapshot = h.engine.orchestrator().load_owned("u1").await;
    assert_eq!(
        snapshot.item("c1").unwrap().payload,
        Some(course("c1", "local"))
    );
    h.idle().await;
}

#[tokio::test]
async fn test_offline_load_uses_expired_aggregate() {
    let h = harness();
    h.seed("u1", "c1", None, "v1").await;
    h.seed("u1", "c2", None, "v1").await;
    h.engine.orchestrator().load_owned("u1").await;
    h.idle().await;

    h.clock.advance(chrono::Duration::seconds(120));
    h.remote.set_offline(true);
    let snapshot = h.engine.orchestrator().load_owned("u1").await;
    h.idle().await;

    assert_eq!(snapshot.resource_ids(), vec!["c1", "c2"]);
    assert!(snapshot.resources.iter().all(|item| item.payload.is_some()));
}

#[tokio::test]
async fn test_malformed_aggregate_entry_is_rejected() {
    let h = harness();
    h.seed("u1", "c1", Some("v1"), "v1").await;
    let key = ResourceKey::aggregate("u1");
    let bogus = CacheEntry {
        key: key.clone(),
        payload: json!({"ownerId": "u1"}),
        last_synced_at: stride_types::Clock::now(&h.clock),
    };
    h.store.set_json(&store_key(&key), &bogus).await.unwrap();

    let snapshot = h.engine.orchestrator().load_owned("u1").await;

    assert_eq!(snapshot.resource_ids(), vec!["c1"]);
    assert_eq!(h.remote.owner_fetch_count("u1"), 1);
    h.idle().await;
}

#[tokio::test]
async fn test_unknown_owner_yields_empty_snapshot() {
    let h = harness();

    let snapshot = h.engine.orchestrator().load_owned("nobody").await;

    assert!(snapshot.resources.is_empty());
    assert_eq!(h.engine.runtime().tasks.spawned_count(), 0);
}

#[tokio::test]
async fn test_owner_switch_discards_background_results() {
    let h = harness();
    h.seed("u1", "c1", None, "v1").await;
    h.engine.switch_owner(Some("u1")).await.unwrap();
    h.engine
        .cache()
        .write(&ResourceKey::profile("u1"), json!({"userId": "u1"}))
        .await
        .unwrap();

    h.engine.orchestrator().load_owned("u1").await;
    h.engine.switch_owner(Some("u2")).await.unwrap();
    h.idle().await;

    assert_eq!(h.engine.current_owner().as_deref(), Some("u2"));
    assert!(h.engine.versions().record("c1").is_none());
    assert_eq!(h.remote.resource_fetch_count("c1"), 0);
    assert!(
        h.engine
            .cache()
            .read(&ResourceKey::profile("u1"))
            .await
            .is_none()
    );
    assert!(
        h.engine
            .cache()
            .read(&ResourceKey::aggregate("u1"))
            .await
            .is_none()
    );
}
