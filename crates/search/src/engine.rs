//! Search orchestrator.
//!
//! Request flow: normalize, validate paging, sort and filters, take the
//! current index snapshot, then serve the page through the cache layer; the
//! pipeline itself runs on the blocking pool under a deadline. Analytics are
//! queued after the response is assembled and never fail the request.

use crate::analytics::{
    AnalyticsRecorder, AnalyticsStore, AnalyticsSummary, MemoryAnalyticsStore, SearchAnalyticsRecord,
    SelectionRecord,
};
use crate::cache::{CacheLayer, CacheSource, CacheStats, MemoryCache, SearchCache};
use crate::catalog::{CatalogSource, CategoryLookup};
use crate::error::{Result, SearchError};
use crate::filter::{FilterEngine, FilterOptions, FilterRequest, SearchFilters};
use crate::index::{IndexHandle, ProductIndex};
use crate::normalize::{NormalizedQuery, QueryNormalizer};
use crate::pagination::Pagination;
use crate::pipeline::{Deadline, ProductHit, SearchPage, SearchPipeline};
use crate::relevance::SortBy;
use crate::suggest::{Suggestion, SuggestionEngine};
use crate::tasks::{HotQueryTracker, WarmTarget};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use storefront_core::config::ConfigSchema;
use storefront_telemetry::metrics;
use tracing::instrument;
use uuid::Uuid;

/// A search as callers send it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: FilterRequest,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    pub fn with_filters(mut self, filters: FilterRequest) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_sort(mut self, sort_by: impl Into<String>) -> Self {
        self.sort_by = Some(sort_by.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Identifies the analytics record; pass it back to `log_selection`
    pub search_id: Uuid,
    pub results: Vec<ProductHit>,
    pub pagination: Pagination,
    pub query: String,
    pub response_time_ms: u64,
    pub cache_hit: bool,
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub cache_purged: usize,
    pub suggestions_pruned: usize,
    pub analytics_purged: usize,
}

/// Point-in-time engine state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub index_generation: u64,
    pub indexed_products: usize,
    pub cache: CacheStats,
    pub suggestions: usize,
    pub hot_queries: usize,
    pub analytics_dropped: u64,
    pub computations: u64,
}

/// Assembles a [`SearchEngine`].
pub struct SearchEngineBuilder {
    config: ConfigSchema,
    catalog: Option<Arc<dyn CatalogSource>>,
    categories: Option<Arc<dyn CategoryLookup>>,
    cache_store: Option<Arc<dyn SearchCache>>,
    analytics_store: Option<Arc<dyn AnalyticsStore>>,
    load_index: bool,
}

impl SearchEngineBuilder {
    /// Use one object as both product source and category lookup.
    pub fn catalog<C>(mut self, catalog: Arc<C>) -> Self
    where
        C: CatalogSource + CategoryLookup + 'static,
    {
        self.catalog = Some(catalog.clone());
        self.categories = Some(catalog);
        self
    }

    pub fn catalog_source(mut self, source: Arc<dyn CatalogSource>) -> Self {
        self.catalog = Some(source);
        self
    }

    pub fn category_lookup(mut self, lookup: Arc<dyn CategoryLookup>) -> Self {
        self.categories = Some(lookup);
        self
    }

    /// Replace the in-memory cache store.
    pub fn cache_store(mut self, store: Arc<dyn SearchCache>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Replace the in-memory analytics store.
    pub fn analytics_store(mut self, store: Arc<dyn AnalyticsStore>) -> Self {
        self.analytics_store = Some(store);
        self
    }

    /// Start without an index; searches fail until `refresh_index` succeeds.
    pub fn skip_initial_load(mut self) -> Self {
        self.load_index = false;
        self
    }

    /// Build the engine and load the first index snapshot.
    ///
    /// Must run inside a tokio runtime: the analytics consumer is spawned here.
    /// It runs even with analytics disabled, since it also feeds suggestions.
    pub async fn build(self) -> Result<SearchEngine> {
        let catalog = self
            .catalog
            .ok_or_else(|| SearchError::catalog_unavailable("no catalog source configured"))?;
        let categories = self
            .categories
            .ok_or_else(|| SearchError::catalog_unavailable("no category lookup configured"))?;
        let config = self.config;

        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(MemoryCache::new(config.cache.max_entries)));
        let cache = CacheLayer::new(
            cache_store,
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.enabled,
        );

        let suggestions = Arc::new(SuggestionEngine::new(config.suggestions.clone()));
        let analytics_store = config.analytics.enabled.then(|| {
            self.analytics_store
                .unwrap_or_else(|| Arc::new(MemoryAnalyticsStore::new()))
        });
        let analytics = AnalyticsRecorder::spawn(
            analytics_store,
            Some(Arc::clone(&suggestions)),
            config.analytics.queue_capacity,
        );

        let engine = SearchEngine {
            normalizer: QueryNormalizer::new(config.search.max_query_length),
            pipeline: Arc::new(SearchPipeline::from_config(&config)),
            filters: FilterEngine::new(categories),
            index: Arc::new(IndexHandle::new()),
            catalog,
            cache,
            suggestions,
            analytics,
            hot_queries: HotQueryTracker::new(),
            computations: AtomicU64::new(0),
            config,
        };

        if self.load_index {
            engine.refresh_index().await?;
        }
        Ok(engine)
    }
}

/// The search orchestrator.
pub struct SearchEngine {
    config: ConfigSchema,
    normalizer: QueryNormalizer,
    pipeline: Arc<SearchPipeline>,
    filters: FilterEngine,
    index: Arc<IndexHandle>,
    catalog: Arc<dyn CatalogSource>,
    cache: CacheLayer,
    suggestions: Arc<SuggestionEngine>,
    analytics: AnalyticsRecorder,
    hot_queries: HotQueryTracker,
    computations: AtomicU64,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("generation", &self.index.generation())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Run the pipeline on the blocking pool, bounded by `deadline`.
#[allow(clippy::too_many_arguments)]
async fn compute_page(
    pipeline: Arc<SearchPipeline>,
    index: Arc<ProductIndex>,
    query: NormalizedQuery,
    filters: SearchFilters,
    sort: SortBy,
    page: usize,
    page_size: usize,
    deadline: Deadline,
) -> Result<SearchPage> {
    let worker =
        tokio::task::spawn_blocking(move || pipeline.run(&index, &query, &filters, sort, page, page_size, &deadline));
    let joined = match deadline.remaining() {
        Some(left) => tokio::time::timeout(left, worker).await.map_err(|_| SearchError::SearchTimeout {
            budget_ms: deadline.budget_ms(),
        })?,
        None => worker.await,
    };
    joined.map_err(|e| SearchError::DependencyUnavailable {
        dependency: "search worker",
        reason: e.to_string(),
    })?
}

impl SearchEngine {
    pub fn builder(config: ConfigSchema) -> SearchEngineBuilder {
        SearchEngineBuilder {
            config,
            catalog: None,
            categories: None,
            cache_store: None,
            analytics_store: None,
            load_index: true,
        }
    }

    pub fn config(&self) -> &ConfigSchema {
        &self.config
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.search.timeout_ms)
    }

    fn validate_paging(&self, page: Option<usize>, page_size: Option<usize>) -> Result<(usize, usize)> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(SearchError::invalid_query("page must be at least 1"));
        }
        let max = self.config.search.max_page_size;
        let page_size = page_size.unwrap_or(self.config.search.default_page_size);
        if page_size == 0 || page_size > max {
            return Err(SearchError::invalid_query(format!(
                "page_size must be between 1 and {max}"
            )));
        }
        Ok((page, page_size))
    }

    fn parse_sort(sort_by: Option<&str>) -> Result<SortBy> {
        match sort_by.map(str::trim) {
            None | Some("") => Ok(SortBy::default()),
            Some(value) => value.parse(),
        }
    }

    /// Run a search.
    ///
    /// Fails with `InvalidQuery`/`InvalidFilter` for malformed input,
    /// `DependencyUnavailable` when no index is loaded and `SearchTimeout`
    /// when the pipeline overruns its budget. No match is an empty page.
    #[instrument(skip(self, request), fields(query = %request.query))]
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        metrics().increment("search.requests");

        let result = self.execute(request, started).await;
        match &result {
            Ok(response) => {
                tracing::debug!(
                    results = response.pagination.total_results,
                    cache_hit = response.cache_hit,
                    elapsed_ms = response.response_time_ms,
                    "Search completed"
                );
            }
            Err(err) if err.is_client_error() => {
                metrics().increment("search.client_errors");
                tracing::debug!(error = %err, "Rejected search request");
            }
            Err(err @ SearchError::SearchTimeout { .. }) => {
                metrics().increment("search.timeouts");
                tracing::warn!(error = %err, "Search timed out");
            }
            Err(err) => tracing::warn!(error = %err, "Search failed"),
        }
        result
    }

    async fn execute(&self, request: SearchRequest, started: Instant) -> Result<SearchResponse> {
        let query = self.normalizer.normalize(&request.query)?;
        let (page, page_size) = self.validate_paging(request.page, request.page_size)?;
        let sort = Self::parse_sort(request.sort_by.as_deref())?;
        let filters = self.filters.validate(&request.filters)?;
        let index = self.index.current()?;

        let budget = self.budget();
        let deadline = Deadline::new(budget);
        let key = self
            .cache
            .key_for(index.generation(), &query.canonical(), &filters, page, page_size, sort);

        let compute = || {
            self.computations.fetch_add(1, Ordering::SeqCst);
            compute_page(
                Arc::clone(&self.pipeline),
                Arc::clone(&index),
                query.clone(),
                filters.clone(),
                sort,
                page,
                page_size,
                deadline,
            )
        };
        let outcome = self.cache.get_or_compute(&key, compute).await?;

        match outcome.source {
            CacheSource::Hit => metrics().increment("search.cache_hits"),
            CacheSource::Computed | CacheSource::Shared => metrics().increment("search.cache_misses"),
            CacheSource::Bypassed if self.cache.is_enabled() => metrics().increment("search.degraded"),
            CacheSource::Bypassed => {}
        }

        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics().histogram("search.latency_ms", response_time_ms as f64);

        let cache_hit = outcome.source == CacheSource::Hit;
        let search_id = Uuid::new_v4();
        let page_data = outcome.page;

        self.hot_queries.observe(WarmTarget {
            query: query.clone(),
            filters: filters.clone(),
            sort,
            page,
            page_size,
        });

        let _ = self.analytics.record(SearchAnalyticsRecord {
            id: search_id,
            query: query.display.clone(),
            normalized_query: query.canonical(),
            filters,
            sort_by: sort,
            page,
            result_count: page_data.pagination.total_results,
            response_time_ms,
            cache_hit,
            user_id: request.user_id,
            session_id: request.session_id,
            timestamp: Utc::now(),
        });

        Ok(SearchResponse {
            search_id,
            results: page_data.results.clone(),
            pagination: page_data.pagination,
            query: query.display,
            response_time_ms,
            cache_hit,
        })
    }

    /// Autocomplete for `prefix`; empty for short prefixes.
    pub fn suggestions(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        self.suggestions.suggestions(prefix, limit)
    }

    /// Filter values available within an optional category.
    #[instrument(skip(self))]
    pub fn filter_options(&self, category_scope: Option<&str>) -> Result<FilterOptions> {
        let scope = self.filters.validate_category(category_scope)?;
        let index = self.index.current()?;
        Ok(FilterOptions::collect(&index, scope.as_deref()))
    }

    /// Attach selected products to an earlier search.
    ///
    /// Best effort: returns whether the selection was queued.
    #[instrument(skip(self, product_ids))]
    pub fn log_selection(&self, search_id: Uuid, product_ids: Vec<String>) -> bool {
        if product_ids.is_empty() {
            return false;
        }
        self.analytics
            .log_selection(SelectionRecord {
                search_id,
                product_ids,
                timestamp: Utc::now(),
            })
            .is_ok()
    }

    /// Rebuild the index from the catalog and invalidate the cache.
    ///
    /// Returns the new generation. On failure the previous snapshot and the
    /// cache are left alone.
    #[instrument(skip(self))]
    pub async fn refresh_index(&self) -> Result<u64> {
        let handle = Arc::clone(&self.index);
        let catalog = Arc::clone(&self.catalog);
        let index = tokio::task::spawn_blocking(move || handle.refresh_from(catalog.as_ref()))
            .await
            .map_err(|e| SearchError::catalog_unavailable(e.to_string()))??;
        metrics().gauge("index.products", index.len() as u64);
        self.cache.invalidate();
        Ok(index.generation())
    }

    /// Make every cached page unreachable.
    pub fn invalidate_cache(&self) -> u64 {
        self.cache.invalidate()
    }

    /// Recompute and overwrite the `top` most requested pages.
    ///
    /// Failures are logged and skipped. Returns how many pages were stored.
    pub async fn warm_cache(&self, top: usize) -> usize {
        if !self.cache.is_enabled() {
            return 0;
        }
        let Ok(index) = self.index.current() else {
            return 0;
        };

        let mut warmed = 0;
        for target in self.hot_queries.top(top) {
            let key = self.cache.key_for(
                index.generation(),
                &target.query.canonical(),
                &target.filters,
                target.page,
                target.page_size,
                target.sort,
            );
            let computed = compute_page(
                Arc::clone(&self.pipeline),
                Arc::clone(&index),
                target.query.clone(),
                target.filters.clone(),
                target.sort,
                target.page,
                target.page_size,
                Deadline::new(self.budget()),
            )
            .await
            .and_then(|page| self.cache.refresh(&key, &page));

            match computed {
                Ok(()) => warmed += 1,
                Err(err) => {
                    tracing::warn!(query = %target.query.display, error = %err, "Cache warming failed");
                }
            }
        }
        metrics().increment_by("cache.warmed", warmed as u64);
        warmed
    }

    /// Purge expired cache entries, stale suggestions and old analytics.
    pub fn maintain(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let cache_purged = self.cache.purge_expired();
        let suggestions_pruned = self.suggestions.prune(now);
        let analytics_purged = self
            .analytics
            .store()
            .map(|store| {
                let cutoff = now - TimeDelta::days(i64::from(self.config.analytics.retention_days));
                store.purge_older_than(cutoff).unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "Analytics retention failed");
                    0
                })
            })
            .unwrap_or(0);
        MaintenanceReport {
            cache_purged,
            suggestions_pruned,
            analytics_purged,
        }
    }

    /// Wait for queued analytics to be stored.
    pub async fn flush_analytics(&self) {
        if let Err(err) = self.analytics.flush().await {
            tracing::warn!(error = %err, "Analytics flush failed");
        }
    }

    /// Aggregate analytics; `None` when analytics are disabled or unreadable.
    pub fn analytics_summary(&self, top: usize) -> Option<AnalyticsSummary> {
        match self.analytics.store()?.summary(top) {
            Ok(summary) => Some(summary),
            Err(err) => {
                tracing::warn!(error = %err, "Analytics summary failed");
                None
            }
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Pipeline runs started by searches; cache hits and shared waits do not count.
    pub fn computation_count(&self) -> u64 {
        self.computations.load(Ordering::SeqCst)
    }

    pub fn index_generation(&self) -> u64 {
        self.index.generation()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            index_generation: self.index.generation(),
            indexed_products: self.index.current().map(|index| index.len()).unwrap_or(0),
            cache: self.cache.stats(),
            suggestions: self.suggestions.len(),
            hot_queries: self.hot_queries.len(),
            analytics_dropped: self.analytics.dropped(),
            computations: self.computation_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Availability, StaticCatalog};
    use crate::test_support::{FailingCache, product, sample_catalog};

    async fn engine_with(config: ConfigSchema, catalog: Arc<StaticCatalog>) -> SearchEngine {
        SearchEngine::builder(config).catalog(catalog).build().await.unwrap()
    }

    async fn engine() -> SearchEngine {
        engine_with(ConfigSchema::default(), sample_catalog()).await
    }

    #[tokio::test]
    async fn test_repeated_searches_are_identical() {
        let engine = engine().await;
        let request = SearchRequest::new("wireless laptop keyboard").with_page(1, 3);
        let first = engine.search(request.clone()).await.unwrap();
        let second = engine.search(request).await.unwrap();
        assert_eq!(
            serde_json::to_vec(&first.results).unwrap(),
            serde_json::to_vec(&second.results).unwrap()
        );
        assert_eq!(first.pagination, second.pagination);
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn test_determinism_without_cache() {
        let mut config = ConfigSchema::default();
        config.cache.enabled = false;
        let engine = engine_with(config, sample_catalog()).await;
        let a = engine.search(SearchRequest::new("laptop")).await.unwrap();
        let b = engine.search(SearchRequest::new("laptop")).await.unwrap();
        assert_eq!(serde_json::to_vec(&a.results).unwrap(), serde_json::to_vec(&b.results).unwrap());
        assert_eq!(engine.computation_count(), 2);
    }

    #[tokio::test]
    async fn test_typo_tolerance() {
        let response = engine().await.search(SearchRequest::new("lapotp")).await.unwrap();
        assert!(response
            .results
            .iter()
            .any(|hit| hit.name.to_lowercase().contains("laptop")));
    }

    #[tokio::test]
    async fn test_page_size_one() {
        let response = engine()
            .await
            .search(SearchRequest::new("laptop").with_page(1, 1))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.pagination.total_pages, response.pagination.total_results);
        assert!(response.pagination.total_results > 1);
        assert!(response.pagination.has_next);
    }

    #[tokio::test]
    async fn test_no_results_is_not_an_error() {
        let response = engine()
            .await
            .search(SearchRequest::new("nonexistentproductxyz"))
            .await
            .unwrap();
        assert_eq!(response.pagination.total_results, 0);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_page_past_end_is_empty() {
        let response = engine()
            .await
            .search(SearchRequest::new("laptop").with_page(50, 10))
            .await
            .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.pagination.total_results, 3);
        assert!(!response.pagination.has_next);
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let engine = engine().await;
        let cases = [
            (SearchRequest::new(""), "INVALID_QUERY"),
            (SearchRequest::new("x".repeat(501)), "INVALID_QUERY"),
            (SearchRequest::new("laptop").with_page(0, 10), "INVALID_QUERY"),
            (SearchRequest::new("laptop").with_page(1, 0), "INVALID_QUERY"),
            (SearchRequest::new("laptop").with_page(1, 101), "INVALID_QUERY"),
            (SearchRequest::new("laptop").with_sort("cheapest"), "INVALID_QUERY"),
            (
                SearchRequest::new("laptop").with_filters(FilterRequest {
                    price_min: Some(10.0),
                    price_max: Some(5.0),
                    ..FilterRequest::default()
                }),
                "INVALID_FILTER",
            ),
            (
                SearchRequest::new("laptop").with_filters(FilterRequest {
                    category_id: Some("spaceships".into()),
                    ..FilterRequest::default()
                }),
                "INVALID_FILTER",
            ),
        ];
        for (request, code) in cases {
            let err = engine.search(request).await.unwrap_err();
            assert_eq!(err.code(), code);
            assert!(err.is_client_error());
        }
        assert_eq!(engine.computation_count(), 0);
    }

    #[tokio::test]
    async fn test_filters_narrow_results() {
        let response = engine()
            .await
            .search(SearchRequest::new("laptop").with_filters(FilterRequest {
                price_min: Some(500.0),
                price_max: Some(1500.0),
                category_id: Some("electronics".into()),
                availability: Some("in_stock".into()),
            }))
            .await
            .unwrap();
        let ids: Vec<&str> = response.results.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["p1"]);
        assert_eq!(response.results[0].availability, Availability::InStock);
    }

    #[tokio::test]
    async fn test_name_match_outranks_description_match() {
        let catalog = Arc::new(StaticCatalog::default());
        let mut named = product("named", "Tripod", "photo");
        named.description = "sturdy stand".into();
        let mut described = product("described", "Stand", "photo");
        described.description = "sturdy tripod".into();
        catalog.upsert(named);
        catalog.upsert(described);
        let engine = engine_with(ConfigSchema::default(), catalog).await;

        let response = engine.search(SearchRequest::new("tripod")).await.unwrap();
        assert_eq!(response.results[0].id, "named");
        assert!(response.results[0].relevance_score > response.results[1].relevance_score);
    }

    #[tokio::test]
    async fn test_refresh_after_mutation_recomputes() {
        let catalog = sample_catalog();
        let engine = engine_with(ConfigSchema::default(), Arc::clone(&catalog)).await;

        let before = engine.search(SearchRequest::new("laptop")).await.unwrap();
        assert!(before.results.iter().any(|hit| hit.id == "p6"));
        let computed = engine.computation_count();

        assert!(catalog.remove("p6"));
        engine.refresh_index().await.unwrap();

        let after = engine.search(SearchRequest::new("laptop")).await.unwrap();
        assert!(!after.cache_hit);
        assert_eq!(engine.computation_count(), computed + 1);
        assert!(after.results.iter().all(|hit| hit.id != "p6"));
    }

    #[tokio::test]
    async fn test_explicit_invalidation_recomputes() {
        let engine = engine().await;
        engine.search(SearchRequest::new("mug")).await.unwrap();
        engine.invalidate_cache();
        let again = engine.search(SearchRequest::new("mug")).await.unwrap();
        assert!(!again.cache_hit);
        assert_eq!(engine.computation_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_misses_compute_once() {
        let engine = Arc::new(engine().await);
        let mut handles = Vec::new();
        for _ in 0..24 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.search(SearchRequest::new("gaming laptop")).await
            }));
        }
        let mut totals = Vec::new();
        for handle in handles {
            totals.push(handle.await.unwrap().unwrap().pagination.total_results);
        }
        assert!(totals.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(engine.computation_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_timeouts_compute_once() {
        let mut config = ConfigSchema::default();
        config.search.timeout_ms = 0;
        let engine = engine_with(config, sample_catalog()).await;
        let request = || SearchRequest::new("gaming laptop");
        let (a, b, c, d) = tokio::join!(
            engine.search(request()),
            engine.search(request()),
            engine.search(request()),
            engine.search(request()),
        );
        for result in [a, b, c, d] {
            assert_eq!(result.unwrap_err().code(), "SEARCH_TIMEOUT");
        }
        assert_eq!(engine.computation_count(), 1);
        assert_eq!(engine.cache_stats().in_flight, 0);
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_to_direct_compute() {
        let engine = SearchEngine::builder(ConfigSchema::default())
            .catalog(sample_catalog())
            .cache_store(Arc::new(FailingCache))
            .build()
            .await
            .unwrap();
        let first = engine.search(SearchRequest::new("keyboard")).await.unwrap();
        let second = engine.search(SearchRequest::new("keyboard")).await.unwrap();
        assert_eq!(first.results, second.results);
        assert!(!second.cache_hit);
        assert_eq!(first.results[0].id, "p3");
    }

    #[tokio::test]
    async fn test_missing_index_is_unavailable_not_empty() {
        let engine = SearchEngine::builder(ConfigSchema::default())
            .catalog(sample_catalog())
            .skip_initial_load()
            .build()
            .await
            .unwrap();
        let err = engine.search(SearchRequest::new("laptop")).await.unwrap_err();
        assert_eq!(err.code(), "DEPENDENCY_UNAVAILABLE");
        assert!(!err.is_client_error());
        assert!(engine.filter_options(None).is_err());

        engine.refresh_index().await.unwrap();
        assert!(engine.search(SearchRequest::new("laptop")).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_budget() {
        let mut config = ConfigSchema::default();
        config.search.timeout_ms = 0;
        let engine = engine_with(config, sample_catalog()).await;
        let err = engine.search(SearchRequest::new("laptop")).await.unwrap_err();
        assert_eq!(err.code(), "SEARCH_TIMEOUT");
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_suggestions_without_analytics() {
        let mut config = ConfigSchema::default();
        config.analytics.enabled = false;
        let engine = engine_with(config, sample_catalog()).await;
        let found = engine.search(SearchRequest::new("laptop")).await.unwrap();
        engine.search(SearchRequest::new("laptop")).await.unwrap();
        engine.flush_analytics().await;

        let queries: Vec<String> = engine.suggestions("lap", 10).into_iter().map(|s| s.query).collect();
        assert_eq!(queries, vec!["laptop".to_string()]);
        assert!(engine.analytics_summary(5).is_none());
        assert!(!engine.log_selection(found.search_id, vec!["p1".into()]));
    }

    #[tokio::test]
    async fn test_suggestions_come_from_executed_searches() {
        let engine = engine().await;
        engine.search(SearchRequest::new("Laptop Sleeve")).await.unwrap();
        engine.search(SearchRequest::new("laptop")).await.unwrap();
        engine.search(SearchRequest::new("laptop")).await.unwrap();
        engine.search(SearchRequest::new("lapzzzzzzzz")).await.unwrap();
        engine.flush_analytics().await;

        let suggestions = engine.suggestions("lap", 10);
        assert!(suggestions.len() <= 10);
        let queries: Vec<&str> = suggestions.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["laptop", "laptop sleeve"]);
        assert!(engine.suggestions("l", 10).is_empty());
    }

    #[tokio::test]
    async fn test_selection_and_summary() {
        let engine = engine().await;
        let response = engine.search(SearchRequest::new("mug")).await.unwrap();
        assert!(engine.log_selection(response.search_id, vec!["p7".into()]));
        assert!(!engine.log_selection(response.search_id, Vec::new()));
        engine.search(SearchRequest::new("nothingmatches")).await.unwrap();
        engine.flush_analytics().await;

        let summary = engine.analytics_summary(5).unwrap();
        assert_eq!(summary.total_searches, 2);
        assert_eq!(summary.selections, 1);
        assert_eq!(summary.zero_result_searches, 1);
        assert_eq!(summary.top_zero_result_queries[0].query, "nothingmatches");
    }

    #[tokio::test]
    async fn test_filter_options() {
        let engine = engine().await;
        let all = engine.filter_options(None).unwrap();
        assert_eq!(all.total_products, 8);
        let scoped = engine.filter_options(Some("electronics")).unwrap();
        assert_eq!(scoped.total_products, 5);
        let err = engine.filter_options(Some("spaceships")).unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
    }

    #[tokio::test]
    async fn test_warm_cache_overwrites_hot_pages() {
        let engine = engine().await;
        engine.search(SearchRequest::new("desk lamp")).await.unwrap();
        engine.invalidate_cache();
        assert_eq!(engine.warm_cache(10).await, 1);
        let response = engine.search(SearchRequest::new("desk lamp")).await.unwrap();
        assert!(response.cache_hit);
        assert_eq!(engine.computation_count(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_report() {
        let engine = engine().await;
        engine.search(SearchRequest::new("hub")).await.unwrap();
        engine.flush_analytics().await;
        let far_future = Utc::now() + TimeDelta::days(365);
        let report = engine.maintain(far_future);
        assert_eq!(report.analytics_purged, 1);
        assert_eq!(report.suggestions_pruned, 1);
        let stats = engine.stats();
        assert_eq!(stats.indexed_products, 8);
        assert_eq!(stats.suggestions, 0);
    }
}
