//! Freshness-bounded cache with request coalescing and degraded-mode
//! fallbacks.
//!
//! `get_or_fetch` is the single entry point used by the aggregator: a fresh
//! entry is served without touching the upstream; a miss runs the fetch
//! under the centralized retry policy; a failed fetch falls back to a stale
//! entry when one exists. Only one in-flight fetch per key is allowed —
//! concurrent callers for the same key block on a per-key lock and then
//! re-check the store, so a burst of callers costs one upstream call.
//!
//! The layer also mirrors every successful fetch into an in-process map so
//! an unreachable external backing store degrades to last-known values
//! instead of failing the pipeline.

pub mod store;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::source::{RawItem, SourceKey};
use crate::utils::{FetchError, Result};
use store::{CacheStore, RawEntry};

/// Counter names registered with the metrics recorder.
pub const METRIC_CACHE_HITS: &str = "marketsentry_cache_hits_total";
pub const METRIC_CACHE_MISSES: &str = "marketsentry_cache_misses_total";
pub const METRIC_CACHE_STALE: &str = "marketsentry_cache_stale_served_total";

/// A value returned by [`SignalCache::get_or_fetch`].
#[derive(Debug, Clone)]
pub struct CachedValue {
    pub item: RawItem,
    pub fetched_at: DateTime<Utc>,
    pub from_cache: bool,
    /// Set when the entry was past its TTL and served anyway because the
    /// live fetch failed.
    pub stale: bool,
}

/// Monotonic counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
}

pub struct SignalCache {
    store: Arc<dyn CacheStore>,
    retry: crate::utils::RetryPolicy,
    /// Per-key fetch locks; unrelated sources proceed independently.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Last successful fetch per key, used when the backing store errors.
    last_seen: RwLock<HashMap<String, RawEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
}

fn is_fresh(fetched_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let ttl = match chrono::Duration::from_std(ttl) {
        Ok(d) => d,
        Err(_) => return true, // TTL too large to represent: never expires
    };
    now.signed_duration_since(fetched_at) < ttl
}

fn decode(entry: &RawEntry) -> Option<RawItem> {
    match serde_json::from_slice(&entry.data) {
        Ok(item) => Some(item),
        Err(e) => {
            log::warn!("cache: dropping undecodable entry: {}", e);
            None
        }
    }
}

impl SignalCache {
    pub fn new(store: Arc<dyn CacheStore>, retry: crate::utils::RetryPolicy) -> Self {
        Self {
            store,
            retry,
            key_locks: Mutex::new(HashMap::new()),
            last_seen: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    /// Return the cached value if fresh, otherwise fetch, store and return.
    ///
    /// On fetch failure a stale entry (any age) is served with
    /// `stale = true`; the error propagates only when nothing is cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &SourceKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<CachedValue>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<RawItem, FetchError>> + Send,
    {
        let key_str = key.to_string();

        // Fast path: fresh entry, no lock.
        if let Some(hit) = self.lookup_fresh(&key_str, ttl).await {
            return Ok(hit);
        }

        let lock = self.key_lock(&key_str).await;
        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: a coalesced waiter finds the
        // entry the winner just stored.
        if let Some(hit) = self.lookup_fresh(&key_str, ttl).await {
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_CACHE_MISSES, 1);

        match self.retry.run(|e: &FetchError| e.retryable, fetch).await {
            Ok(item) => {
                let fetched_at = item.fetched_at;
                self.persist(&key_str, &item).await;
                Ok(CachedValue { item, fetched_at, from_cache: false, stale: false })
            }
            Err(err) => {
                if let Some(entry) = self.lookup_any(&key_str).await {
                    if let Some(item) = decode(&entry) {
                        self.stale_served.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(METRIC_CACHE_STALE, 1);
                        log::warn!(
                            "cache: serving stale {} (age {}s) after fetch failure: {}",
                            key_str,
                            Utc::now().signed_duration_since(entry.fetched_at).num_seconds(),
                            err
                        );
                        return Ok(CachedValue {
                            item,
                            fetched_at: entry.fetched_at,
                            from_cache: true,
                            stale: true,
                        });
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Force the next `get_or_fetch` for `key` to bypass the cache.
    pub async fn invalidate(&self, key: &SourceKey) {
        let key_str = key.to_string();
        if let Err(e) = self.store.delete(&key_str).await {
            log::warn!("cache: invalidate {} failed on backing store: {}", key_str, e);
        }
        self.last_seen.write().await.remove(&key_str);
    }

    /// Non-fetching lookup ignoring TTL. Used by the aggregator to fall back
    /// to last-known data after a cancelled fetch.
    pub async fn peek(&self, key: &SourceKey) -> Option<CachedValue> {
        let key_str = key.to_string();
        let entry = self.lookup_any(&key_str).await?;
        let item = decode(&entry)?;
        Some(CachedValue { item, fetched_at: entry.fetched_at, from_cache: true, stale: true })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn lookup_fresh(&self, key: &str, ttl: Duration) -> Option<CachedValue> {
        let entry = self.lookup_any(key).await?;
        if !is_fresh(entry.fetched_at, ttl, Utc::now()) {
            return None;
        }
        let item = decode(&entry)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_CACHE_HITS, 1);
        Some(CachedValue { item, fetched_at: entry.fetched_at, from_cache: true, stale: false })
    }

    /// Read through the backing store, degrading to the in-process mirror
    /// when the store is unreachable.
    async fn lookup_any(&self, key: &str) -> Option<RawEntry> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("cache: backing store read failed for {}: {}", key, e);
                self.last_seen.read().await.get(key).cloned()
            }
        }
    }

    async fn persist(&self, key: &str, item: &RawItem) {
        let data = match serde_json::to_vec(item) {
            Ok(d) => d,
            Err(e) => {
                log::error!("cache: failed to encode {}: {}", key, e);
                return;
            }
        };
        let entry = RawEntry { data, fetched_at: item.fetched_at };
        if let Err(e) = self.store.set(key, entry.clone()).await {
            // A write failure must not fail the fetch; the mirror keeps the
            // value available for degraded reads.
            log::warn!("cache: backing store write failed for {}: {}", key, e);
        }
        self.last_seen.write().await.insert(key.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Payload;
    use crate::utils::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn test_cache() -> SignalCache {
        SignalCache::new(
            Arc::new(store::MemoryStore::new()),
            RetryPolicy::new(1, Duration::ZERO),
        )
    }

    fn sentiment_item(score: f64) -> RawItem {
        RawItem::new("feargreed", Payload::Sentiment { score, classification: "Fear".into() })
    }

    fn key() -> SourceKey {
        SourceKey::new("feargreed", "index")
    }

    /// Backing store that always errors, simulating an unreachable Redis.
    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &str) -> std::result::Result<Option<RawEntry>, crate::utils::CacheError> {
            Err(crate::utils::CacheError::BackingUnavailable("down".into()))
        }
        async fn set(&self, _key: &str, _entry: RawEntry) -> std::result::Result<(), crate::utils::CacheError> {
            Err(crate::utils::CacheError::BackingUnavailable("down".into()))
        }
        async fn delete(&self, _key: &str) -> std::result::Result<(), crate::utils::CacheError> {
            Err(crate::utils::CacheError::BackingUnavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn fresh_hit_never_refetches() {
        let cache = test_cache();
        let calls = AtomicUsize::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(sentiment_item(0.2)) }
        };

        let first = cache.get_or_fetch(&key(), Duration::from_secs(60), fetch).await.unwrap();
        assert!(!first.from_cache);
        let second = cache.get_or_fetch(&key(), Duration::from_secs(60), fetch).await.unwrap();
        assert!(second.from_cache);
        assert!(!second.stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_refetch() {
        let cache = test_cache();
        let calls = AtomicUsize::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(sentiment_item(0.2)) }
        };

        cache.get_or_fetch(&key(), Duration::from_millis(20), fetch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let again = cache.get_or_fetch(&key(), Duration::from_millis(20), fetch).await.unwrap();
        assert!(!again.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_to_one_fetch() {
        let cache = Arc::new(test_cache());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let fetch = move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(sentiment_item(0.1))
                    }
                };
                cache.get_or_fetch(&key(), Duration::from_secs(60), fetch).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_serves_stale() {
        let cache = test_cache();
        let ok = || async { Ok(sentiment_item(0.3)) };
        cache.get_or_fetch(&key(), Duration::from_millis(10), ok).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let failing = || async { Err(FetchError::network("connection refused")) };
        let got = cache.get_or_fetch(&key(), Duration::from_millis(10), failing).await.unwrap();
        assert!(got.stale);
        assert!(got.from_cache);
        assert_eq!(cache.stats().stale_served, 1);
    }

    #[tokio::test]
    async fn failure_with_empty_cache_propagates() {
        let cache = test_cache();
        let failing = || async { Err(FetchError::timeout("deadline exceeded")) };
        let err = cache
            .get_or_fetch(&key(), Duration::from_secs(60), failing)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = test_cache();
        let calls = AtomicUsize::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(sentiment_item(0.0)) }
        };

        cache.get_or_fetch(&key(), Duration::from_secs(60), fetch).await.unwrap();
        cache.invalidate(&key()).await;
        cache.get_or_fetch(&key(), Duration::from_secs(60), fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_backing_store_degrades_to_mirror() {
        let cache = SignalCache::new(Arc::new(DownStore), RetryPolicy::new(1, Duration::ZERO));
        let calls = AtomicUsize::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(sentiment_item(0.5)) }
        };

        // First call fetches; the store write fails but the mirror keeps it.
        let first = cache.get_or_fetch(&key(), Duration::from_secs(60), fetch).await.unwrap();
        assert!(!first.from_cache);
        // Second call reads through the failing store and hits the mirror.
        let second = cache.get_or_fetch(&key(), Duration::from_secs(60), fetch).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peek_ignores_ttl() {
        let cache = test_cache();
        let fetch = || async { Ok(sentiment_item(0.9)) };
        cache.get_or_fetch(&key(), Duration::from_millis(5), fetch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let peeked = cache.peek(&key()).await.unwrap();
        assert!(peeked.stale);
        assert!(cache.peek(&SourceKey::new("coingecko", "markets")).await.is_none());
    }
}
