//! Cache service integration tests
//!
//! Runs the full service stack (keys, TTL policy, codec, store, registry)
//! over the in-memory backend on a manual clock:
//! - Round trips with and without compression
//! - Computed entries: single regeneration, invalidation, missing factories
//! - Namespace flush isolation
//! - Counters, hashes and sorted sets
//! - Non-atomic mset and invalidation sequences
//! - Read degradation when the backend is down

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use freight_governor::cache::{CacheType, Invalidation, KvBackend, SortedSetMember};
use freight_governor::error::CacheError;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use crate::common::{cache_over, memory_cache, test_clock};
use crate::mocks::FlakyBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Load {
    id: String,
    origin: String,
    destination: String,
    weight_kg: u32,
    stops: Vec<String>,
}

fn sample_load() -> Load {
    Load {
        id: "L-1001".to_string(),
        origin: "Rotterdam".to_string(),
        destination: "Lyon".to_string(),
        weight_kg: 18_500,
        stops: vec!["Antwerp".to_string(), "Reims".to_string()],
    }
}

/// Factory that counts its calls and returns `{"n": calls}`
fn counting_factory(
    calls: &Arc<AtomicUsize>,
) -> impl Fn() -> futures::future::Ready<anyhow::Result<Value>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        futures::future::ready(Ok(json!({ "n": n })))
    }
}

#[tokio::test]
async fn test_round_trip_with_and_without_compression() {
    for compression in [false, true] {
        let clock = test_clock();
        let (cache, backend) = memory_cache(&clock, compression);

        cache
            .set("loads", "L-1001", &sample_load(), Some(CacheType::LoadDetails), None)
            .await
            .unwrap();

        let loaded: Option<Load> = cache.get("loads", "L-1001").await;
        assert_eq!(loaded, Some(sample_load()));

        let raw = backend
            .get("freight-test:loads:L-1001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.starts_with('{'), !compression);
    }
}

#[tokio::test]
async fn test_concrete_orders_scenario() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    assert_ok!(
        cache
            .set("orders", "o1", &json!({"qty": 5}), Some(CacheType::ShortTerm), None)
            .await
    );
    assert_eq!(cache.get::<Value>("orders", "o1").await, Some(json!({"qty": 5})));

    assert_eq!(cache.increment("orders", "counter", 1).await.unwrap(), 1);
    assert_eq!(cache.increment("orders", "counter", 1).await.unwrap(), 2);
    assert_eq!(cache.get_counter("orders", "counter").await, Some(2));

    cache.sorted_set_add("lb", "s1", 10.0, "driverA").await.unwrap();
    cache.sorted_set_add("lb", "s1", 20.0, "driverB").await.unwrap();
    assert_eq!(
        cache.sorted_set_range("lb", "s1", 0, -1, true).await,
        vec![
            SortedSetMember::scored("driverA", 10.0),
            SortedSetMember::scored("driverB", 20.0)
        ]
    );
    assert_eq!(
        cache.sorted_set_range_desc("lb", "s1", 0, 0, false).await,
        vec![SortedSetMember::bare("driverB")]
    );
}

#[tokio::test]
async fn test_entries_expire_by_cache_type() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    cache
        .set("drivers", "d7", &json!({"lat": 51.9}), Some(CacheType::DriverLocation), None)
        .await
        .unwrap();
    assert_eq!(cache.ttl("drivers", "d7").await, Some(60));

    clock.advance_secs(59);
    assert!(cache.exists("drivers", "d7").await);

    clock.advance_secs(1);
    assert!(!cache.exists("drivers", "d7").await);
    assert_eq!(cache.ttl("drivers", "d7").await, None);
}

#[tokio::test]
async fn test_custom_ttl_wins_and_zero_is_ignored() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    cache
        .set("rates", "eu", &1.25, Some(CacheType::MarketRates), Some(45))
        .await
        .unwrap();
    assert_eq!(cache.ttl("rates", "eu").await, Some(45));

    cache
        .set("rates", "us", &1.10, Some(CacheType::MarketRates), Some(0))
        .await
        .unwrap();
    assert_eq!(cache.ttl("rates", "us").await, Some(900));
}

#[tokio::test]
async fn test_namespace_normalization() {
    let clock = test_clock();
    let (cache, backend) = memory_cache(&clock, false);

    cache
        .set("Route Plans", "r1", &"a->b", None, None)
        .await
        .unwrap();
    assert!(backend.exists("freight-test:route-plans:r1").await.unwrap());
    assert_eq!(
        cache.get::<String>("route-plans", "r1").await,
        Some("a->b".to_string())
    );
}

#[tokio::test]
async fn test_get_or_set_calls_factory_once() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);
    let calls = Arc::new(AtomicUsize::new(0));

    let first: Value = cache
        .get_or_set("reports", "daily", counting_factory(&calls), Some(CacheType::Analytics), None)
        .await
        .unwrap();
    let second: Value = cache
        .get_or_set("reports", "daily", counting_factory(&calls), Some(CacheType::Analytics), None)
        .await
        .unwrap();

    assert_eq!(first, json!({"n": 1}));
    assert_eq!(second, json!({"n": 1}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.registry().len(), 1);
}

#[tokio::test]
async fn test_get_or_set_hit_does_not_register() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);
    let calls = Arc::new(AtomicUsize::new(0));

    cache.set("reports", "weekly", &json!({"n": 0}), None, None).await.unwrap();
    let value: Value = cache
        .get_or_set("reports", "weekly", counting_factory(&calls), None, None)
        .await
        .unwrap();

    assert_eq!(value, json!({"n": 0}));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(cache.registry().is_empty());
    assert_eq!(
        cache.invalidate_computed("reports", "weekly", None, None).await.unwrap(),
        Invalidation::NoFactoryFound
    );
}

#[tokio::test]
async fn test_invalidate_without_factory_writes_nothing() {
    let flaky = Arc::new(FlakyBackend::new(freight_governor::InMemoryBackend::new()));
    let cache = cache_over(flaky.clone(), false);

    let outcome = cache
        .invalidate_computed("reports", "never-computed", None, None)
        .await
        .unwrap();

    assert_eq!(outcome, Invalidation::NoFactoryFound);
    assert_eq!(flaky.writes(), 0);
}

#[tokio::test]
async fn test_invalidate_regenerates() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);
    let calls = Arc::new(AtomicUsize::new(0));

    let _: Value = cache
        .get_or_set("reports", "daily", counting_factory(&calls), None, None)
        .await
        .unwrap();

    let outcome = cache.invalidate_computed("reports", "daily", None, None).await.unwrap();
    assert_eq!(outcome, Invalidation::Invalidated);
    assert_eq!(cache.get::<Value>("reports", "daily").await, Some(json!({"n": 2})));

    assert!(cache.unregister_computed("reports", "daily"));
    assert_eq!(
        cache.invalidate_computed("reports", "daily", None, None).await.unwrap(),
        Invalidation::NoFactoryFound
    );
    // The value itself survives unregistration
    assert_eq!(cache.get::<Value>("reports", "daily").await, Some(json!({"n": 2})));
}

#[tokio::test]
async fn test_invalidation_exposes_transient_miss() {
    let clock = test_clock();
    let (cache, backend) = memory_cache(&clock, false);
    let observed: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));

    let factory = {
        let backend = backend.clone();
        let observed = observed.clone();
        move || {
            let backend = backend.clone();
            let observed = observed.clone();
            async move {
                let present = backend.exists("freight-test:fleet:summary").await?;
                observed.lock().unwrap().push(present);
                Ok::<_, anyhow::Error>(json!({"trucks": 12}))
            }
        }
    };

    let _: Value = cache
        .get_or_set("fleet", "summary", factory, None, None)
        .await
        .unwrap();
    cache.invalidate_computed("fleet", "summary", None, None).await.unwrap();

    // During regeneration the old value is already gone
    assert_eq!(*observed.lock().unwrap(), vec![false, false]);
    assert!(cache.exists("fleet", "summary").await);
}

#[tokio::test]
async fn test_invalidate_with_registers_factory() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);
    let calls = Arc::new(AtomicUsize::new(0));

    let value: Value = cache
        .invalidate_with("reports", "monthly", counting_factory(&calls), None, None)
        .await
        .unwrap();
    assert_eq!(value, json!({"n": 1}));

    assert_eq!(
        cache.invalidate_computed("reports", "monthly", None, None).await.unwrap(),
        Invalidation::Invalidated
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_factory_error_is_regeneration_failure() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    let result = cache
        .get_or_set::<Value, _, _>(
            "reports",
            "broken",
            || async { Err(anyhow::anyhow!("upstream timeout")) },
            None,
            None,
        )
        .await;

    assert!(matches!(result, Err(CacheError::Regeneration(_))));
    assert!(cache.registry().is_empty());
}

#[tokio::test]
async fn test_flush_namespace_is_isolated() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    for i in 0..600 {
        cache
            .set("orders", &format!("o{}", i), &i, None, None)
            .await
            .unwrap();
    }
    cache.set("invoices", "i1", &1, None, None).await.unwrap();
    cache.set("orders-archive", "a1", &1, None, None).await.unwrap();

    assert_eq!(cache.flush_namespace("orders").await.unwrap(), 600);
    assert!(!cache.exists("orders", "o0").await);
    assert!(!cache.exists("orders", "o599").await);
    assert!(cache.exists("invoices", "i1").await);
    assert!(cache.exists("orders-archive", "a1").await);
}

#[tokio::test]
async fn test_mget_preserves_order() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    cache
        .mset("loads", &[("a", 1), ("c", 3)], Some(CacheType::ShortTerm), None)
        .await
        .unwrap();

    let values: Vec<Option<i32>> = cache.mget("loads", &["a", "b", "c"]).await;
    assert_eq!(values, vec![Some(1), None, Some(3)]);
    assert_eq!(cache.ttl("loads", "a").await, Some(300));
}

#[tokio::test]
async fn test_mset_ttl_pass_is_not_atomic() {
    let flaky = Arc::new(FlakyBackend::new(freight_governor::InMemoryBackend::new()));
    let cache = cache_over(flaky.clone(), false);
    flaky.fail_on("expire");

    let result = cache
        .mset("loads", &[("a", 1), ("b", 2)], Some(CacheType::ShortTerm), None)
        .await;
    assert!(matches!(result, Err(CacheError::BackendUnavailable(_))));

    // The bulk write landed, but without an expiry
    flaky.heal();
    assert_eq!(cache.get::<i32>("loads", "a").await, Some(1));
    assert_eq!(cache.ttl("loads", "a").await, Some(-1));
}

#[tokio::test]
async fn test_hash_operations() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, true);

    assert!(cache.hash_set("trucks", "t1", "status", &"loading").await.unwrap());
    assert!(!cache.hash_set("trucks", "t1", "status", &"en-route").await.unwrap());
    assert!(cache.hash_set("trucks", "t1", "driver", &"d7").await.unwrap());

    assert_eq!(
        cache.hash_get::<String>("trucks", "t1", "status").await,
        Some("en-route".to_string())
    );

    let all: HashMap<String, String> = cache.hash_get_all("trucks", "t1").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["driver"], "d7");

    assert!(cache.hash_delete("trucks", "t1", "status").await.unwrap());
    assert!(cache.hash_delete("trucks", "t1", "driver").await.unwrap());
    assert!(!cache.hash_delete("trucks", "t1", "driver").await.unwrap());
    assert!(cache.hash_get_all::<String>("trucks", "t1").await.is_none());
}

#[tokio::test]
async fn test_hash_with_only_undecodable_fields_is_absent() {
    let clock = test_clock();
    let (cache, backend) = memory_cache(&clock, true);

    let key = cache.keys().entry_key("trucks", "t2");
    backend
        .hset(&key, "status", "not base64 zlib".to_string())
        .await
        .unwrap();

    assert!(cache.hash_get_all::<String>("trucks", "t2").await.is_none());
}

#[tokio::test]
async fn test_counters_and_expiry() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    assert_eq!(cache.decrement("stock", "pallets", 3).await.unwrap(), -3);
    assert_eq!(cache.increment("stock", "pallets", 10).await.unwrap(), 7);
    assert_eq!(cache.ttl("stock", "pallets").await, Some(-1));

    assert!(cache.expire("stock", "pallets", 30).await.unwrap());
    clock.advance_secs(30);
    assert_eq!(cache.get_counter("stock", "pallets").await, None);
    assert!(!cache.expire("stock", "pallets", 30).await.unwrap());
}

#[tokio::test]
async fn test_sorted_set_remove() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    for (score, driver) in [(3.0, "c"), (1.0, "a"), (2.0, "b")] {
        cache.sorted_set_add("lb", "week", score, driver).await.unwrap();
    }
    let removed = cache
        .sorted_set_remove("lb", "week", &["a".to_string(), "zz".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(
        cache.sorted_set_range("lb", "week", 0, -1, false).await,
        vec![SortedSetMember::bare("b"), SortedSetMember::bare("c")]
    );
}

#[tokio::test]
async fn test_empty_key_rejected_on_write() {
    let clock = test_clock();
    let (cache, _) = memory_cache(&clock, false);

    let result = cache.set("orders", "", &1, None, None).await;
    assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
    assert_eq!(cache.get::<i32>("orders", "").await, None);
}

#[tokio::test]
async fn test_reads_degrade_when_backend_down() {
    let flaky = Arc::new(FlakyBackend::down());
    let cache = cache_over(flaky.clone(), false);

    assert_eq!(cache.get::<Value>("orders", "o1").await, None);
    assert!(!cache.exists("orders", "o1").await);
    assert_eq!(cache.mget::<Value>("orders", &["o1", "o2"]).await, vec![None, None]);
    assert_eq!(cache.hash_get::<Value>("trucks", "t1", "status").await, None);
    assert!(cache.hash_get_all::<Value>("trucks", "t1").await.is_none());
    assert!(cache.sorted_set_range("lb", "s1", 0, -1, true).await.is_empty());
    assert_eq!(cache.get_counter("orders", "counter").await, None);
}

#[tokio::test]
async fn test_writes_propagate_when_backend_down() {
    let flaky = Arc::new(FlakyBackend::down());
    let cache = cache_over(flaky.clone(), false);

    assert!(matches!(
        cache.set("orders", "o1", &1, None, None).await,
        Err(CacheError::BackendUnavailable(_))
    ));
    assert_err!(cache.increment("orders", "counter", 1).await);
    assert_err!(cache.sorted_set_add("lb", "s1", 1.0, "a").await);
    assert_err!(cache.flush_namespace("orders").await);
}

#[tokio::test]
async fn test_get_or_set_returns_value_when_store_fails() {
    let flaky = Arc::new(FlakyBackend::new(freight_governor::InMemoryBackend::new()));
    let cache = cache_over(flaky.clone(), false);
    flaky.fail_on("set");
    let calls = Arc::new(AtomicUsize::new(0));

    let value: Value = cache
        .get_or_set("reports", "daily", counting_factory(&calls), None, None)
        .await
        .unwrap();

    assert_eq!(value, json!({"n": 1}));
    assert!(cache.registry().is_empty());
}

#[tokio::test]
async fn test_undecodable_value_is_a_miss() {
    let clock = test_clock();
    let (cache, backend) = memory_cache(&clock, true);

    backend
        .set("freight-test:loads:bad", "not base64 !!".to_string(), None)
        .await
        .unwrap();
    assert_eq!(cache.get::<Value>("loads", "bad").await, None);
}
