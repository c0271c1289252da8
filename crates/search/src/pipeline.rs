//! The uncached search pipeline: expand, filter, rank, paginate.

use crate::catalog::Availability;
use crate::error::{Result, SearchError};
use crate::filter::SearchFilters;
use crate::fuzzy::FuzzyMatcher;
use crate::index::ProductIndex;
use crate::normalize::NormalizedQuery;
use crate::pagination::{paginate, Pagination};
use crate::relevance::{QueryPlan, Ranker, SortBy};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use storefront_core::config::ConfigSchema;

/// Time budget for one search, checked between pipeline stages.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    /// A deadline that has already passed.
    pub fn expired() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget
            .map_or(u64::MAX, |b| u64::try_from(b.as_millis()).unwrap_or(u64::MAX))
    }

    /// Time left, `None` when unlimited.
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.started.elapsed()))
    }

    /// Fail with `SearchTimeout` once the budget is spent.
    pub fn check(&self) -> Result<()> {
        match self.budget {
            Some(budget) if self.started.elapsed() >= budget => Err(SearchError::SearchTimeout {
                budget_ms: self.budget_ms(),
            }),
            _ => Ok(()),
        }
    }
}

/// One product in a result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductHit {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub category: String,
    pub category_id: String,
    pub availability: Availability,
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A computed result page; this is what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<ProductHit>,
    pub pagination: Pagination,
    /// Index generation the page was computed from
    pub generation: u64,
}

/// Fuzzy matcher and ranker bundled with their settings.
#[derive(Debug, Clone)]
pub struct SearchPipeline {
    matcher: FuzzyMatcher,
    ranker: Ranker,
    min_scoring_len: usize,
}

impl SearchPipeline {
    pub fn new(matcher: FuzzyMatcher, ranker: Ranker, min_scoring_len: usize) -> Self {
        Self {
            matcher,
            ranker,
            min_scoring_len,
        }
    }

    pub fn from_config(config: &ConfigSchema) -> Self {
        Self::new(
            FuzzyMatcher::new(config.fuzzy.clone()),
            Ranker::new(config.ranking.clone()).with_parallel_threshold(config.search.parallel_threshold),
            config.search.min_scoring_token_len,
        )
    }

    /// Compute one page of results against `index`.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        index: &ProductIndex,
        query: &NormalizedQuery,
        filters: &SearchFilters,
        sort: SortBy,
        page: usize,
        page_size: usize,
        deadline: &Deadline,
    ) -> Result<SearchPage> {
        storefront_telemetry::timed_span!("search.pipeline_ms", tokens = query.tokens.len());
        deadline.check()?;
        let plan = QueryPlan::build(query, index, &self.matcher, self.min_scoring_len);
        deadline.check()?;

        let ranked = if plan.has_matches() {
            self.ranker.rank(index, &plan, filters, sort, deadline)?
        } else {
            Vec::new()
        };

        let (slice, pagination) = paginate(ranked, page, page_size);
        let results = slice
            .into_iter()
            .filter_map(|ranked| {
                let entry = index.product(ranked.doc)?;
                let product = &entry.product;
                Some(ProductHit {
                    id: product.id.clone(),
                    name: product.name.clone(),
                    price: product.price,
                    category: product.category_name.clone(),
                    category_id: product.category_id.clone(),
                    availability: product.availability,
                    relevance_score: ranked.score,
                    reason: Some(ranked.reason).filter(|r| !r.is_empty()),
                })
            })
            .collect();

        Ok(SearchPage {
            results,
            pagination,
            generation: index.generation(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::QueryNormalizer;
    use crate::test_support::sample_products;

    fn run(query: &str, page: usize, page_size: usize) -> SearchPage {
        let index = ProductIndex::build(3, sample_products());
        let query = QueryNormalizer::new(500).normalize(query).unwrap();
        SearchPipeline::from_config(&ConfigSchema::default())
            .run(&index, &query, &SearchFilters::default(), SortBy::Relevance, page, page_size, &Deadline::unlimited())
            .unwrap()
    }

    #[test]
    fn test_deadline() {
        assert!(Deadline::unlimited().check().is_ok());
        assert!(Deadline::new(Duration::from_secs(60)).check().is_ok());
        let err = Deadline::expired().check().unwrap_err();
        assert_eq!(err, SearchError::SearchTimeout { budget_ms: 0 });
    }

    #[test]
    fn test_typo_query_finds_laptops() {
        let page = run("lapotp", 1, 20);
        assert!(page.results.iter().any(|hit| hit.name.to_lowercase().contains("laptop")));
    }

    #[test]
    fn test_no_match_is_empty_page() {
        let page = run("nonexistentproductxyz", 1, 20);
        assert!(page.results.is_empty());
        assert_eq!(page.pagination.total_results, 0);
        assert_eq!(page.pagination.total_pages, 0);
    }

    #[test]
    fn test_page_size_one() {
        let page = run("laptop", 1, 1);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.pagination.total_pages, page.pagination.total_results);
        assert_eq!(page.generation, 3);
    }

    #[test]
    fn test_hits_carry_category_and_reason() {
        let page = run("keyboard", 1, 20);
        let hit = &page.results[0];
        assert_eq!(hit.id, "p3");
        assert_eq!(hit.category, "Electronics");
        assert!(hit.reason.is_some());
        assert!(hit.relevance_score > 0.0 && hit.relevance_score <= 1.0);
    }
}
