//! Product keyword search for the storefront.
//!
//! This crate provides:
//! - Query normalization and typo-tolerant term expansion
//! - An inverted index over the catalog snapshot, swapped atomically on refresh
//! - Weighted relevance ranking with deterministic tie-breaks
//! - Validated filters and filter option counts
//! - A TTL result cache with single-flight computation and invalidation
//! - Autocomplete suggestions and non-blocking query analytics
//!
//! [`SearchEngine`] ties these together.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_core::config::ConfigSchema;
//! use storefront_search::{SearchEngine, SearchRequest, StaticCatalog};
//!
//! # async fn run() -> storefront_search::Result<()> {
//! let catalog = Arc::new(StaticCatalog::from_json_file(std::path::Path::new("catalog.json")).expect("catalog"));
//! let engine = SearchEngine::builder(ConfigSchema::default())
//!     .catalog(catalog)
//!     .build()
//!     .await?;
//! let response = engine.search(SearchRequest::new("lapotp")).await?;
//! println!("{} results", response.pagination.total_results);
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod cache;
pub mod catalog;
pub mod engine;
mod error;
pub mod filter;
pub mod fuzzy;
pub mod index;
pub mod normalize;
pub mod pagination;
pub mod pipeline;
pub mod relevance;
pub mod suggest;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use analytics::{AnalyticsRecorder, AnalyticsStore, AnalyticsSummary, MemoryAnalyticsStore};
pub use cache::{CacheLayer, CacheStats, MemoryCache, SearchCache};
pub use catalog::{Availability, CatalogProduct, CatalogSource, Category, CategoryLookup, StaticCatalog};
pub use engine::{EngineStats, MaintenanceReport, SearchEngine, SearchEngineBuilder, SearchRequest, SearchResponse};
pub use error::{Result, SearchError};
pub use filter::{FilterOptions, FilterRequest, SearchFilters};
pub use fuzzy::{levenshtein_distance, FuzzyMatcher};
pub use normalize::{NormalizedQuery, QueryNormalizer};
pub use pagination::Pagination;
pub use pipeline::{ProductHit, SearchPage};
pub use relevance::SortBy;
pub use suggest::{SearchSuggestion, Suggestion, SuggestionEngine};
pub use tasks::BackgroundTasks;
