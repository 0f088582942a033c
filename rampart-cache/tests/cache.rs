use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rampart_cache::{CacheError, CacheLayer, CacheStore, InMemoryStore};
use rampart_core::{BeanRegistry, BoxFuture};
use serde_json::json;

/// Store whose writes always fail, reads always miss.
struct DownStore;

impl CacheStore for DownStore {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Option<Bytes>> {
        Box::pin(async { None })
    }

    fn set<'a>(&'a self, _key: &'a str, _value: Bytes, _ttl: Duration) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::Unavailable("connection refused".into())) })
    }

    fn remove<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::Unavailable("connection refused".into())) })
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn remove_by_prefix<'a>(&'a self, _prefix: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

#[tokio::test]
async fn test_in_memory_store() {
    let store = InMemoryStore::new();
    store.set("k1", Bytes::from("v1"), Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.get("k1").await, Some(Bytes::from("v1")));

    store.remove("k1").await.unwrap();
    assert_eq!(store.get("k1").await, None);
}

#[tokio::test]
async fn test_in_memory_store_expiry() {
    let store = InMemoryStore::new();
    store.set("k", Bytes::from("v"), Duration::from_millis(30)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get("k").await, None);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_in_memory_store_prefix_removal() {
    let store = InMemoryStore::new();
    store.set("widgets.a", Bytes::from("a"), Duration::from_secs(60)).await.unwrap();
    store.set("widgets.b", Bytes::from("b"), Duration::from_secs(60)).await.unwrap();
    store.set("acl.a", Bytes::from("c"), Duration::from_secs(60)).await.unwrap();

    store.remove_by_prefix("widgets.").await;
    assert_eq!(store.get("widgets.a").await, None);
    assert_eq!(store.get("acl.a").await, Some(Bytes::from("c")));

    store.clear().await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_prefix_removal_matches_only_the_prefix() {
    let store = InMemoryStore::new();
    for key in ["a.1", "a.b.2", "ab.3", "b.4", "plain", "a"] {
        store.set(key, Bytes::from(key), Duration::from_secs(60)).await.unwrap();
    }

    store.remove_by_prefix("a.").await;
    assert_eq!(store.get("a.1").await, None);
    assert_eq!(store.get("a.b.2").await, None);
    assert_eq!(store.get("ab.3").await, Some(Bytes::from("ab.3")));
    assert_eq!(store.get("a").await, Some(Bytes::from("a")));

    store.remove_by_prefix("pl").await;
    assert_eq!(store.get("plain").await, None);
    assert_eq!(store.len(), 3);

    // A key written again after removal is found by the next prefix sweep.
    store.set("a.1", Bytes::from("again"), Duration::from_secs(60)).await.unwrap();
    store.remove("b.4").await.unwrap();
    store.remove_by_prefix("").await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_expired_entries_leave_the_prefix_index() {
    let store = InMemoryStore::new();
    store.set("w.old", Bytes::from("x"), Duration::ZERO).await.unwrap();
    store.set("w.new", Bytes::from("y"), Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.get("w.old").await, None);
    assert_eq!(store.len(), 1);

    store.set("w.stale", Bytes::from("z"), Duration::ZERO).await.unwrap();
    store.evict_expired();
    assert_eq!(store.len(), 1);
    store.remove_by_prefix("w.").await;
    assert!(store.is_empty());
}

#[test]
fn test_key_is_stable_across_field_order() {
    let a = json!({"uid": "w1", "version": 2});
    let b: serde_json::Value = serde_json::from_str(r#"{"version": 2, "uid": "w1"}"#).unwrap();

    let key = CacheLayer::key("widgets", &a);
    assert_eq!(key, CacheLayer::key("widgets", &b));
    assert!(key.starts_with("widgets."));
    assert_eq!(key.len(), "widgets.".len() + 64);
    assert_ne!(key, CacheLayer::key("widgets", &json!({"uid": "w2"})));
}

#[tokio::test]
async fn test_layer_round_trips_json() {
    let cache = CacheLayer::in_memory();
    cache.set_with_ttl("k", &json!({"name": "bolt"}), 60).await;
    let hit: Option<serde_json::Value> = cache.get("k").await;
    assert_eq!(hit, Some(json!({"name": "bolt"})));

    cache.delete("k").await;
    cache.delete("k").await;
    assert_eq!(cache.get::<serde_json::Value>("k").await, None);
}

#[tokio::test]
async fn test_zero_ttl_is_noop() {
    let cache = CacheLayer::in_memory();
    cache.set_with_ttl("k", &1u32, 0).await;
    assert_eq!(cache.get::<u32>("k").await, None);
}

#[tokio::test]
async fn test_malformed_payload_is_a_miss() {
    let store = Arc::new(InMemoryStore::new());
    store.set("k", Bytes::from_static(b"{not json"), Duration::from_secs(60)).await.unwrap();
    let cache = CacheLayer::new(store);
    assert_eq!(cache.get::<serde_json::Value>("k").await, None);
}

#[tokio::test]
async fn test_store_failures_are_swallowed() {
    let cache = CacheLayer::new(Arc::new(DownStore));
    cache.set_with_ttl("k", &"v", 60).await;
    cache.delete("k").await;
    assert_eq!(cache.get::<String>("k").await, None);
}

#[tokio::test]
async fn test_layer_is_a_bean() {
    let mut registry = BeanRegistry::new();
    registry
        .provide::<Arc<dyn CacheStore>>(Arc::new(InMemoryStore::new()))
        .register::<CacheLayer>();
    let ctx = registry.resolve().await.unwrap();
    let cache: CacheLayer = ctx.get().unwrap();
    cache.set_with_ttl("k", &5u8, 10).await;
    assert_eq!(cache.get::<u8>("k").await, Some(5));
}
