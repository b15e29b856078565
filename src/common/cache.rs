//! Versioned TTL cache shared by the repository and load use case.
//!
//! An entry is served while it is younger than the TTL and was written under
//! the current version. Invalidation bumps the version, so stale entries are
//! dropped lazily on their next read instead of being scanned eagerly.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300); // 5 minutes

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    version: u64,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration, current_version: u64) -> bool {
        self.version == current_version && self.stored_at.elapsed() < ttl
    }
}

struct Inner<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    loading: DashMap<K, Arc<Mutex<()>>>,
    version: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> Inner<K, V> {
    fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let current = self.current_version();
        let stale = match self.entries.get(key) {
            Some(entry) if entry.is_fresh(self.ttl, current) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if stale {
            self.entries
                .remove_if(key, |_, entry| !entry.is_fresh(self.ttl, current));
        }
        None
    }

    fn commit(&self, key: K, value: V, version: u64) -> bool {
        if version != self.current_version() {
            return false;
        }
        // Tagged with the captured version: a bump racing this insert still
        // leaves the entry stale.
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                version,
            },
        );
        true
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Stored entries, including ones not yet lazily evicted.
    pub entries: usize,
    pub version: u64,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Versioned TTL cache keyed by `K`.
///
/// Cloning is cheap and clones share state, which lets watch callbacks and
/// background loads reach the same cache as the owner.
pub struct VersionedCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for VersionedCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for VersionedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<K, V> VersionedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                loading: DashMap::new(),
                version: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn version(&self) -> u64 {
        self.inner.current_version()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.lookup(key);
        self.record(value.is_some());
        value
    }

    pub fn insert(&self, key: K, value: V) {
        let version = self.version();
        self.inner.commit(key, value, version);
    }

    /// Store `value` only if no invalidation happened since `version` was read.
    pub fn insert_if_version(&self, key: K, value: V, version: u64) -> bool {
        self.inner.commit(key, value, version)
    }

    pub fn remove(&self, key: &K) {
        self.inner.entries.remove(key);
    }

    /// Mark every entry stale. O(1); entries are evicted on their next read.
    pub fn invalidate(&self) -> u64 {
        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(version, "cache invalidated");
        version
    }

    /// Invalidate and scrub all entries immediately.
    pub fn clear(&self) {
        self.invalidate();
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            version: self.version(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            ttl_secs: self.inner.ttl.as_secs(),
        }
    }

    /// Return the cached value for `key`, or populate it with `load`.
    ///
    /// At most one population runs per key: concurrent callers wait for the
    /// in-flight load and then read its result from the cache. The load runs
    /// on a spawned task, so a caller that abandons the request does not
    /// cancel it and the result still lands in the cache. A result computed
    /// across an invalidation is returned to its caller but never stored.
    ///
    /// The boolean is `true` when the value came from the cache.
    pub async fn get_or_load<F, Fut>(&self, key: K, load: F) -> crate::Result<(V, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<V>> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup(&key) {
            self.record(true);
            return Ok((value, true));
        }
        self.record(false);

        let gate = self.inner.loading.entry(key.clone()).or_default().clone();
        let guard = gate.lock_owned().await;

        if let Some(value) = self.inner.lookup(&key) {
            return Ok((value, true));
        }

        let version = self.version();
        let inner = Arc::clone(&self.inner);
        let fut = load();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let result = fut.await;
            if let Ok(value) = &result
                && !inner.commit(key, value.clone(), version)
            {
                tracing::debug!(version, "discarding load result from superseded version");
            }
            result
        });

        match task.await {
            Ok(result) => result.map(|value| (value, false)),
            Err(e) => Err(crate::Error::Task(e.to_string())),
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit {
            &self.inner.hits
        } else {
            &self.inner.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_get_insert() {
        let cache: VersionedCache<String, i32> = VersionedCache::default();
        assert!(cache.get(&"a".to_string()).is_none());

        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.ttl_secs, 300);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalidate_is_lazy() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();
        cache.insert("a", 1);
        cache.insert("b", 2);

        let version = cache.invalidate();
        assert_eq!(version, 1);
        assert_eq!(cache.len(), 2);

        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_scrubs_entries() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();
        cache.insert("a", 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.version(), 1);
    }

    #[test]
    fn test_insert_if_version_rejects_stale_write() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();
        let captured = cache.version();
        cache.invalidate();

        assert!(!cache.insert_if_version("a", 1, captured));
        assert!(cache.get(&"a").is_none());
        assert!(cache.insert_if_version("a", 2, cache.version()));
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache: VersionedCache<&'static str, i32> =
            VersionedCache::new(Duration::from_millis(20));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&"a").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_load_populates_then_hits() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();

        let (value, from_cache) = cache.get_or_load("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!from_cache);

        let (value, from_cache) = cache
            .get_or_load("k", || async { Ok(99) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(from_cache);
    }

    #[tokio::test]
    async fn test_get_or_load_error_not_cached() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();

        let result = cache
            .get_or_load("k", || async { Err(crate::Error::config("boom")) })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_loads_coalesce() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..5).map(|_| {
            let calls = Arc::clone(&calls);
            cache.get_or_load("k", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(1)
            })
        });

        let results = futures::future::join_all(requests).await;
        assert!(results.iter().all(|r| matches!(r, Ok((1, _)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidation_during_load_discards_result() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let loader = cache.clone();
        let handle = tokio::spawn(async move {
            loader
                .get_or_load("k", move || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok(1)
                })
                .await
        });

        started_rx.await.unwrap();
        cache.invalidate();
        release_tx.send(()).unwrap();

        let (value, from_cache) = handle.await.unwrap().unwrap();
        assert_eq!(value, 1);
        assert!(!from_cache);
        assert!(cache.get(&"k").is_none());
    }

    #[tokio::test]
    async fn test_abandoned_load_still_populates() {
        let cache: VersionedCache<&'static str, i32> = VersionedCache::default();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            cache.get_or_load("k", || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(3)
            }),
        )
        .await;
        assert!(abandoned.is_err());

        let (value, from_cache) = cache
            .get_or_load("k", || async { Ok(100) })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert!(from_cache);
    }
}
