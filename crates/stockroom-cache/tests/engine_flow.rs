//! End-to-end tests for the cache engine.
//!
//! These exercise the full stack over the in-memory backend: get-or-load with
//! stampede protection, tag and dependency invalidation, TTL expiry through
//! both tiers, refresh-ahead, and the admin operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use stockroom_cache::{
    CacheConfig, CacheEngine, CacheError, CacheOptions, KeyFamily, Loader, loader_fn, wrap_cached,
};
use stockroom_kv::{DynKvBackend, MemoryBackend};

fn engine() -> Arc<CacheEngine> {
    engine_with(CacheConfig::default())
}

fn engine_with(config: CacheConfig) -> Arc<CacheEngine> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Arc::new(
        CacheEngine::new(config, Arc::new(MemoryBackend::new())).expect("default config is valid"),
    )
}

/// Loader returning `value` after `delay`, counting invocations.
fn counting_loader(value: Value, delay: Duration, calls: Arc<AtomicUsize>) -> Loader {
    loader_fn(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        }
    })
}

#[tokio::test]
async fn test_get_or_load_loads_once_then_hits() {
    let engine = engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(json!({"sku": "A-1"}), Duration::ZERO, Arc::clone(&calls));

    let options = CacheOptions::new();
    let first = engine
        .get_or_load("products.detail:A-1", Arc::clone(&loader), &options)
        .await
        .unwrap();
    let second = engine
        .get_or_load("products.detail:A-1", loader, &options)
        .await
        .unwrap();

    assert_eq!(first, json!({"sku": "A-1"}));
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stat = engine.stats().get("products.detail:A-1").unwrap();
    assert_eq!(stat.access_count, 2);
    assert_eq!(stat.hit_count, 1);
}

#[tokio::test]
async fn test_concurrent_misses_coalesce_on_one_loader() {
    let engine = engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(
        json!({"rows": 40}),
        Duration::from_millis(100),
        Arc::clone(&calls),
    );

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        let loader = Arc::clone(&loader);
        handles.push(tokio::spawn(async move {
            engine
                .get_or_load("inventory.report:wh-1", loader, &CacheOptions::new())
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), json!({"rows": 40}));
    }
    // One lease winner loads; everybody else picks the value up from L2
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loader_error_propagates_and_caches_nothing() {
    let engine = engine();

    let err = engine
        .get_or_load(
            "products.detail:broken",
            loader_fn(|| async { Err("database unreachable".into()) }),
            &CacheOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Loader { .. }));
    assert!(err.to_string().contains("database unreachable"));
    assert_eq!(engine.get("products.detail:broken").await, None);

    // The failed attempt must not wedge the key for later callers
    let value = engine
        .get_or_load(
            "products.detail:broken",
            loader_fn(|| async { Ok(json!({"recovered": true})) }),
            &CacheOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(value, json!({"recovered": true}));
}

#[tokio::test]
async fn test_ttl_expiry_clears_both_tiers() {
    let engine = engine();
    let options = CacheOptions::new().with_ttl(Duration::from_millis(80));

    engine.put("orders.open", json!([1, 2, 3]), &options).await;
    assert_eq!(engine.get("orders.open").await, Some(json!([1, 2, 3])));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.get("orders.open").await, None);
}

#[tokio::test]
async fn test_invalidate_tag_removes_exactly_the_tagged_keys() {
    let engine = engine();
    let tagged = CacheOptions::new().with_tags(["products"]);

    engine.put("products.list:1", json!(["a"]), &tagged).await;
    engine.put("products.list:2", json!(["b"]), &tagged).await;
    engine
        .put("warehouses.list", json!(["wh-1"]), &CacheOptions::new())
        .await;

    let removed = engine.invalidate_tag("products").await;
    assert_eq!(removed, 2);

    assert_eq!(engine.get("products.list:1").await, None);
    assert_eq!(engine.get("products.list:2").await, None);
    assert_eq!(engine.get("warehouses.list").await, Some(json!(["wh-1"])));
}

#[tokio::test]
async fn test_invalidated_key_reloads_on_next_access() {
    let engine = engine();
    let options = CacheOptions::new()
        .with_ttl(Duration::from_secs(60))
        .with_tags(["products"]);
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(json!("v2"), Duration::ZERO, Arc::clone(&calls));

    engine.put("products.detail:1", json!("v1"), &options).await;
    assert_eq!(engine.get("products.detail:1").await, Some(json!("v1")));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    engine.invalidate_tag("products").await;

    let value = engine
        .get_or_load("products.detail:1", loader, &options)
        .await
        .unwrap();
    assert_eq!(value, json!("v2"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.get("products.detail:1").await, Some(json!("v2")));
}

#[tokio::test]
async fn test_dependency_cascade_reaches_related_entities() {
    let engine = engine();

    // products writes dirty products + product_list directly, and one hop
    // over the relation table reaches inventory and search
    engine
        .put(
            "products.detail:A-1",
            json!({"sku": "A-1"}),
            &CacheOptions::new().with_tags(["products"]),
        )
        .await;
    engine
        .put(
            "inventory.on_hand:A-1",
            json!(14),
            &CacheOptions::new().with_tags(["inventory"]),
        )
        .await;
    engine
        .put(
            "search.results:widgets",
            json!(["A-1"]),
            &CacheOptions::new().with_tags(["search"]),
        )
        .await;
    engine
        .put(
            "suppliers.list",
            json!(["acme"]),
            &CacheOptions::new().with_tags(["suppliers"]),
        )
        .await;

    let removed = engine.invalidate_by_dependency("products", true).await;
    assert_eq!(removed, 3);

    assert_eq!(engine.get("products.detail:A-1").await, None);
    assert_eq!(engine.get("inventory.on_hand:A-1").await, None);
    assert_eq!(engine.get("search.results:widgets").await, None);
    // suppliers is unrelated to products
    assert_eq!(engine.get("suppliers.list").await, Some(json!(["acme"])));
}

#[tokio::test]
async fn test_dependency_without_cascade_stays_direct() {
    let engine = engine();

    engine
        .put(
            "products.list",
            json!(["a"]),
            &CacheOptions::new().with_tags(["product_list"]),
        )
        .await;
    engine
        .put(
            "inventory.on_hand:A-1",
            json!(14),
            &CacheOptions::new().with_tags(["inventory"]),
        )
        .await;

    let removed = engine.invalidate_by_dependency("products", false).await;
    assert_eq!(removed, 1);
    assert_eq!(engine.get("inventory.on_hand:A-1").await, Some(json!(14)));
}

#[tokio::test]
async fn test_refresh_ahead_serves_stale_and_reloads_in_background() {
    let engine = engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(json!("v2"), Duration::ZERO, Arc::clone(&calls));
    let options = CacheOptions::new().with_ttl(Duration::from_millis(2_000));

    engine.put("dashboard.summary", json!("v1"), &options).await;

    // Deep into the TTL, past the 0.2 remaining-fraction threshold
    tokio::time::sleep(Duration::from_millis(1_700)).await;

    let served = engine
        .get_or_load("dashboard.summary", Arc::clone(&loader), &options)
        .await
        .unwrap();
    // The caller gets the stale value without waiting on the reload
    assert_eq!(served, json!("v1"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.get("dashboard.summary").await, Some(json!("v2")));
    assert!(engine.analytics().background_refreshes >= 1);
}

#[tokio::test]
async fn test_fresh_entry_schedules_no_refresh() {
    let engine = engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(json!("v2"), Duration::ZERO, Arc::clone(&calls));
    let options = CacheOptions::new().with_ttl(Duration::from_secs(60));

    engine.put("dashboard.summary", json!("v1"), &options).await;
    let served = engine
        .get_or_load("dashboard.summary", loader, &options)
        .await
        .unwrap();

    assert_eq!(served, json!("v1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_negative_caching_is_opt_in() {
    let engine = engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(Value::Null, Duration::ZERO, Arc::clone(&calls));

    // Without negative_ttl a null result is computed every time
    let plain = CacheOptions::new();
    for _ in 0..2 {
        let value = engine
            .get_or_load("products.detail:ghost", Arc::clone(&loader), &plain)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // With it, the null is cached as a marker
    let negative = CacheOptions::new().with_negative_ttl(Duration::from_secs(30));
    for _ in 0..2 {
        let value = engine
            .get_or_load("products.detail:ghost2", Arc::clone(&loader), &negative)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_entity_strategy_applies_tags() {
    let mut config = CacheConfig::default();
    config.entities.insert(
        "products".into(),
        stockroom_cache::EntityStrategy {
            default_ttl_secs: Some(600),
            tags: vec!["products".into(), "product_list".into()],
            ..Default::default()
        },
    );
    let engine = engine_with(config);

    engine
        .put(
            "products.list",
            json!(["a", "b"]),
            &CacheOptions::for_entity("products"),
        )
        .await;

    assert_eq!(engine.invalidate_tag("product_list").await, 1);
    assert_eq!(engine.get("products.list").await, None);
}

#[tokio::test]
async fn test_force_refresh_replaces_fresh_value() {
    let engine = engine();
    let options = CacheOptions::new().with_ttl(Duration::from_secs(60));

    engine.put("reports.daily", json!("v1"), &options).await;
    let value = engine
        .force_refresh(
            "reports.daily",
            loader_fn(|| async { Ok(json!("v2")) }),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(value, json!("v2"));
    assert_eq!(engine.get("reports.daily").await, Some(json!("v2")));
}

#[tokio::test]
async fn test_configure_refresh_policy_rejects_unknown_keys() {
    let engine = engine();

    let bad = json!({"refreshTreshold": 0.5});
    let err = engine
        .configure_refresh_policy(bad.as_object().unwrap())
        .unwrap_err();
    assert!(err.to_string().contains("refreshTreshold"));
    // The live policy is untouched after a rejected patch
    assert_eq!(engine.refresh_policy().refresh_threshold, 0.2);

    let good = json!({"refreshThreshold": 0.5, "maxConcurrentRefresh": 2});
    let next = engine
        .configure_refresh_policy(good.as_object().unwrap())
        .unwrap();
    assert_eq!(next.refresh_threshold, 0.5);
    assert_eq!(engine.refresh_policy().max_concurrent_refresh, 2);
}

#[tokio::test]
async fn test_clear_all_demands_confirmation() {
    let engine = engine();
    engine
        .put(
            "products.list",
            json!(["a"]),
            &CacheOptions::new().with_tags(["products"]),
        )
        .await;

    assert!(engine.clear_all("wrong phrase").await.is_err());
    assert_eq!(engine.get("products.list").await, Some(json!(["a"])));

    let removed = engine.clear_all("stockroom-clear-all").await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(engine.get("products.list").await, None);
}

#[tokio::test]
async fn test_clear_all_sweeps_untagged_entries() {
    let engine = engine();
    engine
        .put("dashboard.kpis", json!({"open": 3}), &CacheOptions::new())
        .await;
    assert_eq!(
        engine.get("dashboard.kpis").await,
        Some(json!({"open": 3}))
    );

    let removed = engine.clear_all("stockroom-clear-all").await.unwrap();
    assert_eq!(removed, 1);
    // Gone from L2 as well, not only flushed from L1
    assert_eq!(engine.get("dashboard.kpis").await, None);
}

#[tokio::test]
async fn test_l2_hit_registers_tags_from_the_wire() {
    let backend: DynKvBackend = Arc::new(MemoryBackend::new());
    let writer = Arc::new(
        CacheEngine::new(CacheConfig::default(), Arc::clone(&backend)).expect("valid config"),
    );
    let reader =
        Arc::new(CacheEngine::new(CacheConfig::default(), backend).expect("valid config"));

    writer
        .put(
            "products.list",
            json!(["a"]),
            &CacheOptions::new().with_tags(["products"]),
        )
        .await;

    // The reader process learns the tags when the entry arrives through L2
    assert_eq!(reader.get("products.list").await, Some(json!(["a"])));
    assert_eq!(reader.invalidate_tag("products").await, 1);
    assert_eq!(reader.get("products.list").await, None);
}

#[tokio::test]
async fn test_wrap_cached_builds_keys_and_dedupes() {
    let engine = engine();
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&calls);
    let cached = wrap_cached(
        Arc::clone(&engine),
        KeyFamily::new("inventory.on_hand").unwrap(),
        CacheOptions::new(),
        move |args: Vec<String>| {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(json!({"warehouse": args[0]})) })
        },
    );

    let a = cached(vec!["wh-1".into()]).await.unwrap();
    let b = cached(vec!["wh-1".into()]).await.unwrap();
    let c = cached(vec!["wh-2".into()]).await.unwrap();

    assert_eq!(a, json!({"warehouse": "wh-1"}));
    assert_eq!(b, a);
    assert_eq!(c, json!({"warehouse": "wh-2"}));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Keys are per-argument, visible through the plain read path
    assert!(engine.get("inventory.on_hand:wh-1").await.is_some());
    assert!(engine.get("inventory.on_hand:wh-2").await.is_some());
}

#[tokio::test]
async fn test_wrap_cached_rejects_bad_arguments() {
    let engine = engine();

    let cached = wrap_cached(
        Arc::clone(&engine),
        KeyFamily::new("inventory.on_hand").unwrap(),
        CacheOptions::new(),
        |_args: Vec<String>| Box::pin(async { Ok(json!(null)) }),
    );

    assert!(matches!(
        cached(vec!["bad:arg".into()]).await,
        Err(CacheError::InvalidKey { .. })
    ));
}

#[tokio::test]
async fn test_analytics_snapshot_serializes() {
    let engine = engine();
    engine
        .put(
            "products.list",
            json!(["a"]),
            &CacheOptions::new().with_tags(["products"]),
        )
        .await;
    let _ = engine.get("products.list").await;
    let _ = engine.get("products.missing").await;

    let snapshot = engine.analytics();
    let json = serde_json::to_value(&snapshot).unwrap();

    assert!(json["l1Stats"]["hits"].as_u64().unwrap() >= 1);
    assert_eq!(json["l2Stats"]["backend"], "memory");
    assert!(json["refreshPolicy"]["enabled"].as_bool().unwrap());
    assert!(
        json["dependencyGraph"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["entity"] == "products")
    );
}

#[tokio::test]
async fn test_scheduler_lifecycle_is_idempotent() {
    let mut config = CacheConfig::default();
    config.warming_interval_secs = 3_600;
    let engine = engine_with(config);

    engine.start();
    engine.start();
    engine.shutdown().await;

    // Shutdown flushed L1 and a second shutdown is a no-op
    engine.shutdown().await;
}
