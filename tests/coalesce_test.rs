//! Tests for [`with_cache`]: cache-or-compute around producers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vellum::cache::{CacheConfig, Cached, NamedCache, with_cache};
use vellum::key::{CacheKey, KeyValue};

fn payload(resume: &str) -> KeyValue {
    KeyValue::object([("resume", resume)])
}

/// Producer that counts its invocations and returns `value`.
async fn counted(calls: &AtomicUsize, value: u32) -> Result<u32, String> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(value)
}

// ============================================================================
// Basic coalescing
// ============================================================================

#[tokio::test]
async fn second_call_is_served_from_cache() {
    let cache = NamedCache::new("generate-summary", CacheConfig::new());
    let key = CacheKey::new("u1", &payload("resume"));
    let calls = AtomicUsize::new(0);

    let first = with_cache(&cache, &key, || counted(&calls, 42)).await.unwrap();
    assert_eq!(first, Cached::miss(42));

    let second = with_cache(&cache, &key, || counted(&calls, 7)).await.unwrap();
    assert_eq!(second, Cached::hit(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failures_are_not_cached() {
    let cache: NamedCache<u32> = NamedCache::new("ats-analysis", CacheConfig::new());
    let key = CacheKey::new("u1", &payload("resume"));

    let err = with_cache(&cache, &key, || async { Err::<u32, _>("model timeout") })
        .await
        .unwrap_err();
    assert_eq!(err, "model timeout");
    assert!(cache.is_empty());

    let retried = with_cache(&cache, &key, || async { Ok::<_, &str>(3) })
        .await
        .unwrap();
    assert_eq!(retried, Cached::miss(3));
}

#[tokio::test]
async fn users_do_not_share_entries() {
    let cache = NamedCache::new("generate-summary", CacheConfig::new());
    let calls = AtomicUsize::new(0);
    let same = payload("identical resume");

    let alice = with_cache(&cache, &CacheKey::new("alice", &same), || counted(&calls, 1))
        .await
        .unwrap();
    let bob = with_cache(&cache, &CacheKey::new("bob", &same), || counted(&calls, 2))
        .await
        .unwrap();

    assert!(!alice.from_cache);
    assert!(!bob.from_cache);
    assert_eq!(bob.data, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_entry_reruns_producer() {
    let cache = NamedCache::new(
        "job-match",
        CacheConfig::new().ttl(Duration::from_millis(20)),
    );
    let key = CacheKey::new("u1", &payload("resume"));
    let calls = AtomicUsize::new(0);

    with_cache(&cache, &key, || counted(&calls, 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let again = with_cache(&cache, &key, || counted(&calls, 2)).await.unwrap();

    assert_eq!(again, Cached::miss(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Concurrent misses
// ============================================================================

#[tokio::test]
async fn concurrent_misses_both_run_by_default() {
    let cache = NamedCache::new("improve-bullet", CacheConfig::new());
    let key = CacheKey::new("u1", &payload("bullet"));
    let calls = AtomicUsize::new(0);

    let (a, b) = tokio::join!(
        with_cache(&cache, &key, || counted(&calls, 1)),
        with_cache(&cache, &key, || counted(&calls, 2)),
    );

    assert!(!a.unwrap().from_cache);
    assert!(!b.unwrap().from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn single_flight_runs_producer_once() {
    let cache = NamedCache::new("improve-bullet", CacheConfig::new().single_flight(true));
    let key = CacheKey::new("u1", &payload("bullet"));
    let calls = AtomicUsize::new(0);

    let (a, b) = tokio::join!(
        with_cache(&cache, &key, || counted(&calls, 1)),
        with_cache(&cache, &key, || counted(&calls, 2)),
    );

    assert_eq!(a.unwrap(), Cached::miss(1));
    assert_eq!(b.unwrap(), Cached::hit(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn single_flight_follower_retries_after_leader_failure() {
    let cache = NamedCache::new("cover-letter", CacheConfig::new().single_flight(true));
    let key = CacheKey::new("u1", &payload("letter"));

    let (a, b) = tokio::join!(
        with_cache(&cache, &key, || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<u32, _>("upstream error")
        }),
        with_cache(&cache, &key, || async { Ok::<_, &str>(5) }),
    );

    assert!(a.is_err());
    assert_eq!(b.unwrap(), Cached::miss(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_across_tasks() {
    let cache = Arc::new(NamedCache::new(
        "generate-bullets",
        CacheConfig::new().single_flight(true),
    ));
    let key = CacheKey::new("u1", &payload("bullets"));
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                with_cache(&*cache, &key, || counted(&calls, 9))
                    .await
                    .unwrap()
                    .data
            })
        })
        .collect();

    for result in futures_util::future::join_all(handles).await {
        assert_eq!(result.unwrap(), 9);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
