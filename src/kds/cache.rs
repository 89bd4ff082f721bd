// SPDX-License-Identifier: Apache-2.0

use super::{ChainKey, KeyDistribution, RawChain, RetryPolicy};

use crate::{
    certs::snp::Chain,
    error::{FetchError, KdsError},
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio::time::Instant;

type FetchResult = Result<Arc<Chain>, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;
type Snapshot = Arc<HashMap<ChainKey, Arc<CacheEntry>>>;

/// Size and age bounds of a [`ChainCache`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// Most entries kept; the least recently used go first.
    pub max_entries: usize,

    /// Entries older than this are dropped.
    pub max_age_secs: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 64,
            max_age_secs: 86400,
        }
    }
}

/// Counters describing how a [`ChainCache`] has been used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to wait for a fetch.
    pub misses: u64,
    /// Fetches started. Concurrent misses on one key share a fetch.
    pub fetches: u64,
    /// Entries currently cached.
    pub entries: usize,
    /// Fetches currently running.
    pub inflight: usize,
}

struct CacheEntry {
    chain: Arc<Chain>,
    inserted_at: Instant,
    last_used: AtomicU64,
}

struct CacheInner {
    source: Arc<dyn KeyDistribution>,
    retry: RetryPolicy,
    limits: CacheLimits,
    epoch: Instant,

    // Readers clone the Arc and never hold the lock across a lookup.
    entries: RwLock<Snapshot>,
    inflight: Mutex<HashMap<ChainKey, SharedFetch>>,

    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
}

/// Single-flight cache of VCEK chains in front of a [`KeyDistribution`].
///
/// Concurrent misses for the same key share one fetch. The fetch runs on
/// its own task, so it completes and populates the cache even when every
/// caller waiting on it has gone away. Failures are handed to the callers
/// that were waiting and are never cached.
#[derive(Clone)]
pub struct ChainCache {
    inner: Arc<CacheInner>,
}

/// Removes the in-flight marker once the fetch task ends, panics included.
struct InflightGuard {
    inner: Arc<CacheInner>,
    key: ChainKey,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl ChainCache {
    /// A cache over `source`.
    pub fn new(source: Arc<dyn KeyDistribution>, retry: RetryPolicy, limits: CacheLimits) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                retry,
                limits,
                epoch: Instant::now(),
                entries: RwLock::new(Arc::new(HashMap::new())),
                inflight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the chain for `key`, fetching it if it is not cached.
    pub async fn get_chain(&self, key: &ChainKey) -> FetchResult {
        if let Some(chain) = self.inner.lookup(key) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            debug!("VCEK chain cache hit for {key}");
            return Ok(chain);
        }

        let fetch = {
            let mut inflight = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match inflight.get(key) {
                Some(fetch) => {
                    debug!("joining in-flight VCEK fetch for {key}");
                    fetch.clone()
                }
                None => {
                    // A fetch may have finished between the lookup above and
                    // taking the lock.
                    if let Some(chain) = self.inner.lookup(key) {
                        self.inner.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(chain);
                    }

                    let fetch = self.spawn_fetch(key.clone());
                    inflight.insert(key.clone(), fetch.clone());
                    fetch
                }
            }
        };

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        fetch.await
    }

    /// Returns the cached chain for `key` without fetching.
    pub fn get(&self, key: &ChainKey) -> Option<Arc<Chain>> {
        self.inner.lookup(key)
    }

    /// Number of cached chains.
    pub fn len(&self) -> usize {
        self.inner.snapshot().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries older than the configured age. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut next = HashMap::clone(&entries);
        let before = next.len();
        self.inner.evict_aged(&mut next, None);
        let evicted = before - next.len();

        if evicted > 0 {
            debug!("evicted {evicted} expired VCEK chain(s)");
            *entries = Arc::new(next);
        }

        evicted
    }

    /// A snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            entries: self.len(),
            inflight: self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    fn spawn_fetch(&self, key: ChainKey) -> SharedFetch {
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _guard = InflightGuard {
                inner: Arc::clone(&inner),
                key: key.clone(),
            };

            let result = inner.fetch_with_retry(&key).await;
            if let Ok(chain) = &result {
                inner.insert(key, Arc::clone(chain));
            }
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(FetchError {
                    attempts: 0,
                    cause: KdsError::Transient {
                        status: None,
                        message: format!("fetch task failed: {e}"),
                    },
                })
            })
        }
        .boxed()
        .shared()
    }
}

impl CacheInner {
    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.limits.max_age_secs)
    }

    fn lookup(&self, key: &ChainKey) -> Option<Arc<Chain>> {
        let snapshot = self.snapshot();
        let entry = snapshot.get(key)?;

        if entry.inserted_at.elapsed() > self.max_age() {
            return None;
        }

        entry.last_used.store(self.now_ms(), Ordering::Relaxed);
        Some(Arc::clone(&entry.chain))
    }

    async fn fetch_with_retry(&self, key: &ChainKey) -> FetchResult {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = self
                .source
                .fetch_chain(key)
                .await
                .and_then(RawChain::into_chain);

            match result {
                Ok(chain) => {
                    info!("fetched VCEK chain for {key} (attempt {attempt})");
                    return Ok(Arc::new(chain));
                }
                Err(cause) if cause.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "VCEK fetch for {key} failed (attempt {attempt}/{}): {cause}; retrying in {delay:?}",
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(cause) => {
                    warn!("VCEK fetch for {key} failed after {attempt} attempt(s): {cause}");
                    return Err(FetchError {
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }
    }

    fn insert(&self, key: ChainKey, chain: Arc<Chain>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let mut next = HashMap::clone(&entries);
        next.insert(
            key.clone(),
            Arc::new(CacheEntry {
                chain,
                inserted_at: Instant::now(),
                last_used: AtomicU64::new(self.now_ms()),
            }),
        );

        self.evict_aged(&mut next, Some(&key));

        while next.len() > self.limits.max_entries {
            let victim = next
                .iter()
                .filter(|(k, _)| *k != &key)
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());

            match victim {
                Some(victim) => {
                    debug!("evicting least recently used VCEK chain for {victim}");
                    next.remove(&victim);
                }
                None => break,
            }
        }

        *entries = Arc::new(next);
    }

    fn evict_aged(&self, map: &mut HashMap<ChainKey, Arc<CacheEntry>>, keep: Option<&ChainKey>) {
        let max_age = self.max_age();
        map.retain(|k, e| Some(k) == keep || e.inserted_at.elapsed() <= max_age);
    }
}
