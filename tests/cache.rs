// SPDX-License-Identifier: Apache-2.0

mod common;

use std::{sync::Arc, time::Duration};

use common::*;
use snp_evidence::{
    error::KdsError,
    firmware::TcbVersion,
    kds::{CacheLimits, ChainCache, ChainKey, RetryPolicy},
    Array, Generation,
};

fn key(chip: u8) -> ChainKey {
    ChainKey {
        generation: Generation::Milan,
        chip_id: Array([chip; 64]),
        tcb: TcbVersion::new(3, 0, 8, 115),
    }
}

fn cache(kds: &Arc<MockKds>, retry: RetryPolicy, limits: CacheLimits) -> ChainCache {
    ChainCache::new(kds.clone(), retry, limits)
}

#[tokio::test]
async fn sequential_lookups_fetch_once() {
    init_logger();
    let platform = Platform::new(Profile::default());
    let kds = shared(MockKds::serving(platform.raw_chain()));
    let cache = cache(&kds, RetryPolicy::immediate(3), CacheLimits::default());

    let first = cache.get_chain(&key(1)).await.unwrap();
    let second = cache.get_chain(&key(1)).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, platform.chain());
    assert_eq!(kds.calls(), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.inflight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lookups_share_one_fetch() {
    let platform = Platform::new(Profile::default());
    let kds = shared(
        MockKds::serving(platform.raw_chain()).with_delay(Duration::from_millis(100)),
    );
    let cache = cache(&kds, RetryPolicy::immediate(3), CacheLimits::default());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_chain(&key(1)).await })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(kds.calls(), 1);
    assert_eq!(cache.stats().fetches, 1);
}

#[tokio::test]
async fn different_keys_fetch_independently() {
    let platform = Platform::new(Profile::default());
    let kds = shared(MockKds::serving(platform.raw_chain()));
    let cache = cache(&kds, RetryPolicy::immediate(3), CacheLimits::default());

    let (first, second) = (key(1), key(2));
    let (a, b) = tokio::join!(cache.get_chain(&first), cache.get_chain(&second));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(kds.calls(), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn cancelled_callers_do_not_cancel_the_fetch() {
    let platform = Platform::new(Profile::default());
    let kds = shared(
        MockKds::serving(platform.raw_chain()).with_delay(Duration::from_millis(100)),
    );
    let cache = cache(&kds, RetryPolicy::immediate(3), CacheLimits::default());

    // The leader and a joiner both give up while the fetch is in flight.
    let wanted = key(1);
    let leader = tokio::time::timeout(Duration::from_millis(10), cache.get_chain(&wanted));
    let joiner = tokio::time::timeout(Duration::from_millis(20), cache.get_chain(&wanted));
    let (leader, joiner) = tokio::join!(leader, joiner);
    assert!(leader.is_err());
    assert!(joiner.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(cache.get(&key(1)).is_some());
    assert_eq!(cache.stats().inflight, 0);
    assert!(cache.get_chain(&key(1)).await.is_ok());
    assert_eq!(kds.calls(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let platform = Platform::new(Profile::default());
    let kds = shared(
        MockKds::serving(platform.raw_chain())
            .then(Err(transient()))
            .then(Err(transient())),
    );
    let cache = cache(&kds, RetryPolicy::immediate(4), CacheLimits::default());

    assert!(cache.get_chain(&key(1)).await.is_ok());
    assert_eq!(kds.calls(), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let kds = shared(MockKds::failing(transient()));
    let cache = cache(&kds, RetryPolicy::immediate(3), CacheLimits::default());

    let error = cache.get_chain(&key(1)).await.unwrap_err();
    assert_eq!(error.attempts, 3);
    assert!(error.cause.is_transient());
    assert_eq!(kds.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off() {
    let platform = Platform::new(Profile::default());
    let kds = shared(
        MockKds::serving(platform.raw_chain())
            .then(Err(transient()))
            .then(Err(transient())),
    );
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 100,
        max_delay_ms: 1000,
        jitter: false,
    };
    let cache = cache(&kds, retry, CacheLimits::default());

    let start = tokio::time::Instant::now();
    assert!(cache.get_chain(&key(1)).await.is_ok());
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(300), "{waited:?}");
    assert!(waited < Duration::from_millis(400), "{waited:?}");
    assert_eq!(kds.calls(), 3);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let kds = shared(MockKds::failing(KdsError::NotFound("chip".into())));
    let cache = cache(&kds, RetryPolicy::immediate(4), CacheLimits::default());

    let error = cache.get_chain(&key(1)).await.unwrap_err();
    assert_eq!(error.attempts, 1);
    assert!(matches!(error.cause, KdsError::NotFound(_)));
    assert_eq!(kds.calls(), 1);
}

#[tokio::test]
async fn malformed_chain_is_not_retried() {
    let kds = shared(MockKds::serving(snp_evidence::kds::RawChain {
        vek: b"junk".to_vec(),
        ask: b"junk".to_vec(),
        ark: b"junk".to_vec(),
    }));
    let cache = cache(&kds, RetryPolicy::immediate(4), CacheLimits::default());

    let error = cache.get_chain(&key(1)).await.unwrap_err();
    assert!(matches!(error.cause, KdsError::Malformed(_)));
    assert_eq!(kds.calls(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn failures_are_not_cached() {
    let platform = Platform::new(Profile::default());
    let kds = shared(
        MockKds::serving(platform.raw_chain()).then(Err(KdsError::NotFound("chip".into()))),
    );
    let cache = cache(&kds, RetryPolicy::immediate(4), CacheLimits::default());

    assert!(cache.get_chain(&key(1)).await.is_err());
    assert!(cache.is_empty());

    assert!(cache.get_chain(&key(1)).await.is_ok());
    assert_eq!(kds.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_share_the_failure() {
    let kds = shared(
        MockKds::failing(KdsError::NotFound("chip".into())).with_delay(Duration::from_millis(50)),
    );
    let cache = cache(&kds, RetryPolicy::immediate(4), CacheLimits::default());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_chain(&key(1)).await })
        })
        .collect();

    for task in tasks {
        let error = task.await.unwrap().unwrap_err();
        assert!(matches!(error.cause, KdsError::NotFound(_)));
    }

    assert_eq!(kds.calls(), 1);
    assert_eq!(cache.stats().fetches, 1);
}

#[tokio::test(start_paused = true)]
async fn least_recently_used_entry_is_evicted() {
    let platform = Platform::new(Profile::default());
    let kds = shared(MockKds::serving(platform.raw_chain()));
    let cache = cache(
        &kds,
        RetryPolicy::immediate(1),
        CacheLimits {
            max_entries: 2,
            max_age_secs: 3600,
        },
    );

    cache.get_chain(&key(1)).await.unwrap();
    tokio::time::advance(Duration::from_millis(10)).await;
    cache.get_chain(&key(2)).await.unwrap();
    tokio::time::advance(Duration::from_millis(10)).await;

    // Touch 1 so that 2 becomes the least recently used.
    assert!(cache.get(&key(1)).is_some());
    tokio::time::advance(Duration::from_millis(10)).await;

    cache.get_chain(&key(3)).await.unwrap();

    assert_eq!(cache.len(), 2);
    assert!(cache.get(&key(1)).is_some());
    assert!(cache.get(&key(2)).is_none());
    assert!(cache.get(&key(3)).is_some());
}

#[tokio::test(start_paused = true)]
async fn entries_expire_by_age() {
    let platform = Platform::new(Profile::default());
    let kds = shared(MockKds::serving(platform.raw_chain()));
    let cache = cache(
        &kds,
        RetryPolicy::immediate(1),
        CacheLimits {
            max_entries: 8,
            max_age_secs: 60,
        },
    );

    cache.get_chain(&key(1)).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    cache.get_chain(&key(2)).await.unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;

    assert!(cache.get(&key(1)).is_none());
    assert!(cache.get(&key(2)).is_some());
    assert_eq!(cache.evict_expired(), 1);
    assert_eq!(cache.len(), 1);

    cache.get_chain(&key(1)).await.unwrap();
    assert_eq!(kds.calls(), 3);
}
