//! Integration tests for cache module
//!
//! Tests TTL expiry, failure handling, key canonicalization, bounded
//! capacity and concurrent access through decorated functions.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use callwrap::cache::{CacheConfig, CacheKey, TtlCache};
use callwrap::{CallError, CallSignature, MockClock, Pipeline};

fn counting_lookup(
    cache: TtlCache<String, MockClock>,
) -> (callwrap::Decorated<String, io::Error>, Arc<AtomicU32>) {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let decorated = Pipeline::<String, io::Error>::builder("lookup")
        .parameters(["id"])
        .layer(cache)
        .wrap(move |call: &CallSignature| {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("{}#{run}", call.typed::<String>("id").unwrap_or_default()))
        });
    (decorated, runs)
}

/// Validates TTL semantics through a pipeline.
///
/// # Test Steps
/// 1. Cache with a 10s TTL around a counting function
/// 2. Repeat the call before expiry: served from cache
/// 3. Advance exactly to the TTL: the entry is expired and recomputed
#[test]
fn test_entry_expires_after_ttl() {
    let clock = MockClock::new();
    let cache = TtlCache::with_clock(CacheConfig::with_ttl(Duration::from_secs(10)), clock.clone())
        .expect("valid cache");
    let (lookup, runs) = counting_lookup(cache.clone());

    assert_eq!(lookup.invoke(CallSignature::new().arg("a")).expect("miss"), "a#1");
    clock.advance(Duration::from_millis(9_999));
    assert_eq!(lookup.invoke(CallSignature::new().arg("a")).expect("hit"), "a#1");

    clock.advance(Duration::from_millis(1));
    assert_eq!(lookup.invoke(CallSignature::new().arg("a")).expect("expired"), "a#2");
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.expirations, 1);
}

/// Validates that keyword order and positional binding do not split entries,
/// while different arguments do.
#[test]
fn test_equal_arguments_share_entry() {
    let clock = MockClock::new();
    let cache = TtlCache::with_clock(CacheConfig::default(), clock).expect("valid cache");
    let (lookup, runs) = counting_lookup(cache);

    let first = CallSignature::new().kwarg("id", "x").kwarg("region", "eu");
    let reordered = CallSignature::new().kwarg("region", "eu").kwarg("id", "x");
    let other = CallSignature::new().kwarg("id", "y").kwarg("region", "eu");

    assert_eq!(lookup.invoke(first).expect("miss"), "x#1");
    assert_eq!(lookup.invoke(reordered).expect("hit"), "x#1");
    assert_eq!(lookup.invoke(other).expect("different key"), "y#2");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Validates that failures are never cached and propagate unchanged.
#[test]
fn test_failures_are_not_cached() {
    let cache: TtlCache<u32> = TtlCache::new(CacheConfig::default());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = Pipeline::<u32, io::Error>::builder("flaky").layer(cache.clone()).wrap(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(io::Error::new(io::ErrorKind::TimedOut, "slow backend"))
        } else {
            Ok(7)
        }
    });

    match flaky.invoke(CallSignature::new()) {
        Err(CallError::Operation(error)) => assert_eq!(error.kind(), io::ErrorKind::TimedOut),
        other => panic!("expected operation error, got {other:?}"),
    }
    assert!(cache.is_empty());

    assert_eq!(flaky.invoke(CallSignature::new()).expect("second call"), 7);
    assert_eq!(flaky.invoke(CallSignature::new()).expect("cached"), 7);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// Validates bounded capacity: expired entries go first, then the entry
/// closest to expiry.
///
/// # Test Steps
/// 1. Capacity 2, TTL 10s
/// 2. Insert `a` at t=0 and `b` at t=5, then `c` at t=6: `a` is evicted
/// 3. At t=15 `b` is expired; inserting `d` purges it without an eviction
#[test]
fn test_bounded_cache_eviction_order() {
    let clock = MockClock::new();
    let config = CacheConfig::builder()
        .ttl(Duration::from_secs(10))
        .max_entries(2)
        .build()
        .expect("valid cache config");
    let cache = TtlCache::with_clock(config, clock.clone()).expect("valid cache");

    cache.insert("a".into(), 1);
    clock.set_elapsed(Duration::from_secs(5));
    cache.insert("b".into(), 2);
    clock.set_elapsed(Duration::from_secs(6));
    cache.insert("c".into(), 3);

    assert_eq!(cache.get(&CacheKey::new("a")), None);
    assert_eq!(cache.get(&CacheKey::new("b")), Some(2));
    assert_eq!(cache.stats().evictions, 1);

    clock.set_elapsed(Duration::from_secs(15));
    cache.insert("d".into(), 4);

    let stats = cache.stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.expirations, 1);
    assert_eq!(cache.get(&CacheKey::new("c")), Some(3));
    assert_eq!(cache.get(&CacheKey::new("d")), Some(4));
}

/// Validates concurrent readers and writers on one shared cache.
///
/// Without single-flight, concurrent misses on one key may each compute; the
/// stored value is always one of the computed values.
#[test]
fn test_concurrent_access() {
    let cache: TtlCache<u64> = TtlCache::new(CacheConfig::default());

    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..100u64 {
                    let key = CacheKey::new(format!("key-{}", i % 10));
                    let value = cache
                        .get_or_compute(key, || Ok::<_, io::Error>(i % 10 * 1000 + worker))
                        .expect("compute never fails");
                    assert_eq!(value / 1000, i % 10);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker finished");
    }

    assert_eq!(cache.len(), 10);
    let stats = cache.stats();
    assert_eq!(stats.total_accesses(), 800);
    assert!(stats.inserts >= 10);
}

/// Validates the async path caches the same way.
#[tokio::test]
async fn test_async_pipeline_caches_results() {
    let cache: TtlCache<String> = TtlCache::new(CacheConfig::default());
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let greet = Pipeline::<String, io::Error>::builder("greet").layer(cache).wrap_async(
        move |call: CallSignature| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(format!("hello {}", call.typed_at::<String>(0).unwrap_or_default()))
            }
        },
    );

    for _ in 0..3 {
        let value = greet.invoke(CallSignature::new().arg("ada")).await.expect("greeting");
        assert_eq!(value, "hello ada");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
