//! Result cache with TTL expiry, namespace invalidation and single-flight.
//!
//! Keys are SHA-256 digests of everything that determines a result page,
//! including a namespace counter and the index generation. Invalidation bumps
//! the namespace, so entries written before it can never be looked up again,
//! and then clears the store.
//!
//! Concurrent misses for one key share a single computation through a
//! per-key registry of `tokio::sync::OnceCell`s.

use crate::error::{Result, SearchError};
use crate::filter::SearchFilters;
use crate::pipeline::SearchPage;
use crate::relevance::SortBy;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Cache backend failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend could not be reached
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// Stored payload could not be encoded or decoded
    #[error("Cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Digest identifying one cached result page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(
        namespace: u64,
        generation: u64,
        canonical_query: &str,
        filters: &SearchFilters,
        page: usize,
        page_size: usize,
        sort: SortBy,
    ) -> Self {
        let mut hasher = Sha256::new();
        for part in [
            namespace.to_string().as_str(),
            generation.to_string().as_str(),
            canonical_query,
            filters.fingerprint().as_str(),
            page.to_string().as_str(),
            page_size.to_string().as_str(),
            sort.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f_u8]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A stored result page. Entries are replaced, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCacheEntry {
    pub key: CacheKey,
    /// JSON-encoded [`SearchPage`]
    pub payload: Vec<u8>,
    pub result_count: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SearchCacheEntry {
    /// Encode `page` with an expiry `ttl` from now; the TTL is at least 1 ms.
    pub fn new(key: CacheKey, page: &SearchPage, ttl: Duration) -> std::result::Result<Self, CacheError> {
        let created_at = Utc::now();
        let ttl = TimeDelta::from_std(ttl.max(Duration::from_millis(1))).unwrap_or(TimeDelta::days(365));
        Ok(Self {
            key,
            payload: serde_json::to_vec(page)?,
            result_count: page.pagination.total_results,
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn page(&self) -> std::result::Result<SearchPage, CacheError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Storage behind the cache layer.
pub trait SearchCache: Send + Sync {
    /// Live entry for `key`; expired entries are reported as missing.
    fn get(&self, key: &CacheKey) -> std::result::Result<Option<SearchCacheEntry>, CacheError>;

    /// Insert or overwrite.
    fn put(&self, entry: SearchCacheEntry) -> std::result::Result<(), CacheError>;

    /// Drop every entry; returns how many were removed.
    fn invalidate_all(&self) -> std::result::Result<usize, CacheError>;

    /// Drop entries expired at `now`; returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> std::result::Result<usize, CacheError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process cache store.
///
/// At capacity it drops expired entries first, then the entry closest to
/// expiry.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, SearchCacheEntry>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }
}

impl SearchCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> std::result::Result<Option<SearchCacheEntry>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(Utc::now()))
            .cloned())
    }

    fn put(&self, entry: SearchCacheEntry) -> std::result::Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.max_entries && !entries.contains_key(&entry.key) {
            let now = Utc::now();
            entries.retain(|_, e| !e.is_expired_at(now));
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .values()
                    .min_by_key(|e| e.expires_at)
                    .map(|e| e.key.clone());
                if let Some(key) = oldest {
                    entries.remove(&key);
                }
            }
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn invalidate_all(&self) -> std::result::Result<usize, CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> std::result::Result<usize, CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        Ok(before - entries.len())
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Where a page handed out by [`CacheLayer::get_or_compute`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// Served from the store
    Hit,
    /// Computed by this request and stored
    Computed,
    /// Computed by a concurrent request for the same key
    Shared,
    /// Computed without the cache (disabled or unavailable)
    Bypassed,
}

/// Result of a cached lookup.
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub page: Arc<SearchPage>,
    pub source: CacheSource,
}

/// Counters describing cache behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub shared: u64,
    pub errors: u64,
    pub namespace: u64,
    pub in_flight: usize,
}

type Flight = Arc<OnceCell<Result<Arc<SearchPage>>>>;

/// TTL cache in front of the search pipeline.
pub struct CacheLayer {
    store: Arc<dyn SearchCache>,
    ttl: Duration,
    enabled: bool,
    namespace: AtomicU64,
    in_flight: Mutex<HashMap<CacheKey, Flight>>,
    hits: AtomicU64,
    misses: AtomicU64,
    shared: AtomicU64,
    errors: AtomicU64,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .field("namespace", &self.namespace.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Removes a flight from the registry once its participants are done.
struct FlightGuard<'a> {
    layer: &'a CacheLayer,
    key: &'a CacheKey,
    flight: Flight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.layer.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
        {
            in_flight.remove(self.key);
        }
    }
}

impl CacheLayer {
    pub fn new(store: Arc<dyn SearchCache>, ttl: Duration, enabled: bool) -> Self {
        Self {
            store,
            ttl,
            enabled,
            namespace: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            shared: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current invalidation namespace.
    pub fn namespace(&self) -> u64 {
        self.namespace.load(Ordering::SeqCst)
    }

    /// Key for a request under the current namespace.
    pub fn key_for(
        &self,
        generation: u64,
        canonical_query: &str,
        filters: &SearchFilters,
        page: usize,
        page_size: usize,
        sort: SortBy,
    ) -> CacheKey {
        CacheKey::derive(self.namespace(), generation, canonical_query, filters, page, page_size, sort)
    }

    /// Live page stored under `key`.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<Arc<SearchPage>>> {
        let entry = self.store.get(key).map_err(|e| self.failure(e))?;
        match entry {
            Some(entry) => {
                let page = entry.page().map_err(|e| self.failure(e))?;
                Ok(Some(Arc::new(page)))
            }
            None => Ok(None),
        }
    }

    /// Store `page` under `key`, overwriting any previous entry.
    pub fn store(&self, key: &CacheKey, page: &SearchPage) -> Result<()> {
        let entry = SearchCacheEntry::new(key.clone(), page, self.ttl).map_err(|e| self.failure(e))?;
        self.store.put(entry).map_err(|e| self.failure(e))
    }

    fn failure(&self, err: CacheError) -> SearchError {
        self.errors.fetch_add(1, Ordering::Relaxed);
        SearchError::cache_unavailable(err.to_string())
    }

    /// Serve `key` from the cache or compute it once.
    ///
    /// Concurrent callers that miss on the same key wait for one shared
    /// computation and all receive its outcome, success or error. Errors are
    /// not cached: once the flight ends the next caller computes again. When
    /// the store fails the page is computed directly and not stored.
    ///
    /// `compute` should enforce its own time budget. If the caller running
    /// it is cancelled, one of the waiters takes over the computation.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<CacheOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SearchPage>>,
    {
        if !self.enabled {
            let page = compute().await?;
            return Ok(CacheOutcome {
                page: Arc::new(page),
                source: CacheSource::Bypassed,
            });
        }

        match self.lookup(key) {
            Ok(Some(page)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = key.as_str(), "Cache hit");
                return Ok(CacheOutcome {
                    page,
                    source: CacheSource::Hit,
                });
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Cache lookup failed; computing without cache");
                let page = compute().await?;
                return Ok(CacheOutcome {
                    page: Arc::new(page),
                    source: CacheSource::Bypassed,
                });
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = key.as_str(), "Cache miss");

        let flight = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };
        let _guard = FlightGuard {
            layer: self,
            key,
            flight: Arc::clone(&flight),
        };

        let mut computed_here = false;
        let outcome = flight
            .get_or_init(|| async {
                // A flight that finished just before this one registered
                // has already stored the page
                if let Ok(Some(page)) = self.lookup(key) {
                    return Ok(page);
                }
                computed_here = true;
                let page = compute().await?;
                if let Err(err) = self.store(key, &page) {
                    tracing::warn!(error = %err, "Cache store failed; result served uncached");
                }
                Ok(Arc::new(page))
            })
            .await
            .clone();

        let source = if computed_here {
            CacheSource::Computed
        } else {
            self.shared.fetch_add(1, Ordering::Relaxed);
            CacheSource::Shared
        };
        if let Err(err) = &outcome {
            tracing::debug!(key = key.as_str(), error = %err, shared = !computed_here, "Cache flight failed");
        }
        Ok(CacheOutcome { page: outcome?, source })
    }

    /// Recompute-and-overwrite path used by cache warming.
    pub fn refresh(&self, key: &CacheKey, page: &SearchPage) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.store(key, page)
    }

    /// Make every existing entry unreachable and clear the store.
    pub fn invalidate(&self) -> u64 {
        let namespace = self.namespace.fetch_add(1, Ordering::SeqCst) + 1;
        match self.store.invalidate_all() {
            Ok(removed) => tracing::info!(namespace, removed, "Search cache invalidated"),
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(namespace, error = %err, "Cache clear failed; old entries unreachable by namespace");
            }
        }
        namespace
    }

    /// Drop expired entries from the store.
    pub fn purge_expired(&self) -> usize {
        match self.store.purge_expired(Utc::now()) {
            Ok(removed) => removed,
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "Cache purge failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            entries: self.store.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            shared: self.shared.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            namespace: self.namespace(),
            in_flight: self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::Pagination;
    use crate::test_support::FailingCache;
    use std::sync::atomic::AtomicUsize;

    fn page(total: usize) -> SearchPage {
        SearchPage {
            results: Vec::new(),
            pagination: Pagination::new(total, 1, 20),
            generation: 1,
        }
    }

    fn key(query: &str) -> CacheKey {
        CacheKey::derive(1, 1, query, &SearchFilters::default(), 1, 20, SortBy::Relevance)
    }

    fn layer() -> CacheLayer {
        CacheLayer::new(Arc::new(MemoryCache::new(100)), Duration::from_secs(60), true)
    }

    #[test]
    fn test_key_covers_every_input() {
        let base = key("laptop");
        assert_eq!(base, key("laptop"));
        assert_eq!(base.as_str().len(), 64);
        assert_ne!(base, key("laptops"));
        let filters = SearchFilters {
            price_min: Some(1.0),
            ..SearchFilters::default()
        };
        let variants = [
            CacheKey::derive(2, 1, "laptop", &SearchFilters::default(), 1, 20, SortBy::Relevance),
            CacheKey::derive(1, 2, "laptop", &SearchFilters::default(), 1, 20, SortBy::Relevance),
            CacheKey::derive(1, 1, "laptop", &filters, 1, 20, SortBy::Relevance),
            CacheKey::derive(1, 1, "laptop", &SearchFilters::default(), 2, 20, SortBy::Relevance),
            CacheKey::derive(1, 1, "laptop", &SearchFilters::default(), 1, 10, SortBy::Relevance),
            CacheKey::derive(1, 1, "laptop", &SearchFilters::default(), 1, 20, SortBy::Newest),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn test_entry_expiry_after_creation() {
        let entry = SearchCacheEntry::new(key("a"), &page(3), Duration::ZERO).unwrap();
        assert!(entry.expires_at > entry.created_at);
        assert_eq!(entry.result_count, 3);
        assert_eq!(entry.page().unwrap(), page(3));
    }

    #[test]
    fn test_memory_cache_hides_expired_entries() {
        let cache = MemoryCache::new(10);
        let mut entry = SearchCacheEntry::new(key("a"), &page(1), Duration::from_secs(60)).unwrap();
        entry.expires_at = entry.created_at - TimeDelta::seconds(1);
        cache.put(entry).unwrap();
        assert!(cache.get(&key("a")).unwrap().is_none());
        assert_eq!(cache.purge_expired(Utc::now()).unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_memory_cache_evicts_at_capacity() {
        let cache = MemoryCache::new(2);
        for (i, q) in ["a", "b", "c"].into_iter().enumerate() {
            let entry = SearchCacheEntry::new(key(q), &page(i), Duration::from_secs(60 + i as u64)).unwrap();
            cache.put(entry).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).unwrap().is_none());
        assert!(cache.get(&key("c")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let layer = layer();
        let first = layer.get_or_compute(&key("a"), || async { Ok(page(5)) }).await.unwrap();
        assert_eq!(first.source, CacheSource::Computed);
        let second = layer
            .get_or_compute(&key("a"), || async { Err(SearchError::invalid_query("recomputed")) })
            .await
            .unwrap();
        assert_eq!(second.source, CacheSource::Hit);
        assert_eq!(second.page.pagination.total_results, 5);
        let stats = layer.stats();
        assert_eq!((stats.hits, stats.misses, stats.in_flight), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_failed_computation_is_not_cached() {
        let layer = layer();
        let err = layer
            .get_or_compute(&key("a"), || async { Err(SearchError::SearchTimeout { budget_ms: 1 }) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SEARCH_TIMEOUT");
        assert_eq!(layer.stats().entries, 0);
        let retry = layer.get_or_compute(&key("a"), || async { Ok(page(1)) }).await.unwrap();
        assert_eq!(retry.source, CacheSource::Computed);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let layer = layer();
        let ns = layer.namespace();
        let k = layer.key_for(1, "lamp", &SearchFilters::default(), 1, 20, SortBy::Relevance);
        layer.get_or_compute(&k, || async { Ok(page(1)) }).await.unwrap();
        assert_eq!(layer.invalidate(), ns + 1);
        assert_eq!(layer.stats().entries, 0);

        let k2 = layer.key_for(1, "lamp", &SearchFilters::default(), 1, 20, SortBy::Relevance);
        assert_ne!(k, k2);
        let again = layer.get_or_compute(&k2, || async { Ok(page(2)) }).await.unwrap();
        assert_eq!(again.source, CacheSource::Computed);
        assert_eq!(again.page.pagination.total_results, 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_falls_back_to_compute() {
        let layer = CacheLayer::new(Arc::new(FailingCache), Duration::from_secs(60), true);
        let outcome = layer.get_or_compute(&key("a"), || async { Ok(page(4)) }).await.unwrap();
        assert_eq!(outcome.source, CacheSource::Bypassed);
        assert_eq!(outcome.page.pagination.total_results, 4);
        assert!(layer.stats().errors > 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let layer = CacheLayer::new(Arc::new(MemoryCache::new(10)), Duration::from_secs(60), false);
        for _ in 0..2 {
            let outcome = layer.get_or_compute(&key("a"), || async { Ok(page(1)) }).await.unwrap();
            assert_eq!(outcome.source, CacheSource::Bypassed);
        }
        assert_eq!(layer.stats().entries, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_compute_once() {
        let layer = Arc::new(layer());
        let computations = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let layer = Arc::clone(&layer);
            let computations = Arc::clone(&computations);
            handles.push(tokio::spawn(async move {
                layer
                    .get_or_compute(&key("hot"), || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(page(7))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().page.pagination.total_results, 7);
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert_eq!(layer.stats().in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failure_is_shared_once() {
        let layer = Arc::new(layer());
        let computations = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let layer = Arc::clone(&layer);
            let computations = Arc::clone(&computations);
            handles.push(tokio::spawn(async move {
                layer
                    .get_or_compute(&key("slow"), || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(SearchError::SearchTimeout { budget_ms: 50 })
                    })
                    .await
            }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err, SearchError::SearchTimeout { budget_ms: 50 });
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        let stats = layer.stats();
        assert_eq!((stats.entries, stats.in_flight), (0, 0));

        let retry = layer.get_or_compute(&key("slow"), || async { Ok(page(2)) }).await.unwrap();
        assert_eq!(retry.source, CacheSource::Computed);
    }

    #[tokio::test]
    async fn test_cancelled_computation_releases_key() {
        let layer = layer();
        let computations = AtomicUsize::new(0);
        let slow_key = key("a");
        let slow = tokio::time::timeout(
            Duration::from_millis(10),
            layer.get_or_compute(&slow_key, || async {
                computations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(page(1))
            }),
        );
        assert!(slow.await.is_err());
        assert_eq!(layer.stats().in_flight, 0);

        let outcome = layer
            .get_or_compute(&key("a"), || async {
                computations.fetch_add(1, Ordering::SeqCst);
                Ok(page(3))
            })
            .await
            .unwrap();
        assert_eq!(outcome.page.pagination.total_results, 3);
        assert_eq!(computations.load(Ordering::SeqCst), 2);
    }
}
