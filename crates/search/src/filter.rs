//! Structured filters: validation, the candidate predicate, and the
//! aggregated filter options shown next to search results.

use crate::catalog::{Availability, CatalogProduct, CategoryLookup};
use crate::error::{Result, SearchError};
use crate::index::ProductIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Filters as a caller sends them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRequest {
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub category_id: Option<String>,
    pub availability: Option<String>,
}

/// Validated filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub category_id: Option<String>,
    pub availability: Option<Availability>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.price_min.is_none()
            && self.price_max.is_none()
            && self.category_id.is_none()
            && self.availability.is_none()
    }

    /// Whether `product` satisfies every constraint.
    pub fn matches(&self, product: &CatalogProduct) -> bool {
        if self.price_min.is_some_and(|min| product.price < min) {
            return false;
        }
        if self.price_max.is_some_and(|max| product.price > max) {
            return false;
        }
        if self
            .category_id
            .as_deref()
            .is_some_and(|category| product.category_id != category)
        {
            return false;
        }
        if self
            .availability
            .is_some_and(|availability| product.availability != availability)
        {
            return false;
        }
        true
    }

    /// Stable, unambiguous form used in cache keys and warm targets.
    ///
    /// Prices use the shortest round-trip float form and the category id is
    /// quoted, so distinct filter sets never share a fingerprint.
    pub fn fingerprint(&self) -> String {
        format!(
            "price_min={:?};price_max={:?};category={:?};availability={:?}",
            self.price_min,
            self.price_max,
            self.category_id,
            self.availability.as_ref().map(Availability::as_str),
        )
    }
}

/// Validates filter requests against the catalog.
#[derive(Clone)]
pub struct FilterEngine {
    categories: Arc<dyn CategoryLookup>,
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine").finish_non_exhaustive()
    }
}

impl FilterEngine {
    pub fn new(categories: Arc<dyn CategoryLookup>) -> Self {
        Self { categories }
    }

    /// Validate a filter request.
    ///
    /// A blank category id counts as no category filter. Everything else that
    /// is inconsistent or unknown fails with `InvalidFilter`.
    pub fn validate(&self, request: &FilterRequest) -> Result<SearchFilters> {
        let price_min = validate_price("price_min", request.price_min)?;
        let price_max = validate_price("price_max", request.price_max)?;
        if let (Some(min), Some(max)) = (price_min, price_max) {
            if min > max {
                return Err(SearchError::invalid_filter(format!(
                    "price_min ({min}) is greater than price_max ({max})"
                )));
            }
        }

        let category_id = self.validate_category(request.category_id.as_deref())?;

        let availability = match request.availability.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(value.parse::<Availability>().map_err(|_| {
                SearchError::invalid_filter(format!(
                    "availability '{value}' is not one of {}",
                    Availability::ALL.map(|a| a.as_str()).join(", ")
                ))
            })?),
        };

        Ok(SearchFilters {
            price_min,
            price_max,
            category_id,
            availability,
        })
    }

    /// Check an optional category id; blank means none.
    pub fn validate_category(&self, category_id: Option<&str>) -> Result<Option<String>> {
        match category_id.map(str::trim) {
            None | Some("") => Ok(None),
            Some(id) if self.categories.category_exists(id) => Ok(Some(id.to_string())),
            Some(id) => Err(SearchError::invalid_filter(format!("unknown category '{id}'"))),
        }
    }
}

fn validate_price(name: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        None => Ok(None),
        Some(v) if !v.is_finite() => Err(SearchError::invalid_filter(format!("{name} must be a number"))),
        Some(v) if v < 0.0 => Err(SearchError::invalid_filter(format!("{name} must not be negative"))),
        Some(v) => Ok(Some(v)),
    }
}

/// Price bucket bounds; the last bucket is open-ended.
const PRICE_BUCKETS: [(f64, Option<f64>); 7] = [
    (0.0, Some(25.0)),
    (25.0, Some(50.0)),
    (50.0, Some(100.0)),
    (100.0, Some(250.0)),
    (250.0, Some(500.0)),
    (500.0, Some(1000.0)),
    (1000.0, None),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

/// Half-open price interval `[min, max)` with its product count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBucket {
    pub min: f64,
    pub max: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub id: String,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCount {
    pub value: Availability,
    pub count: usize,
}

/// Filter values available over the index.
///
/// Categories are always counted over the whole index so a caller can switch
/// scope; price and availability figures cover the scoped products only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub category_scope: Option<String>,
    pub total_products: usize,
    pub price_range: Option<PriceRange>,
    pub price_buckets: Vec<PriceBucket>,
    pub categories: Vec<CategoryCount>,
    pub availability: Vec<AvailabilityCount>,
}

impl FilterOptions {
    pub fn collect(index: &ProductIndex, scope: Option<&str>) -> Self {
        let mut categories: BTreeMap<&str, (&str, usize)> = BTreeMap::new();
        let mut availability: BTreeMap<Availability, usize> = BTreeMap::new();
        let mut buckets: Vec<usize> = vec![0; PRICE_BUCKETS.len()];
        let mut price_range: Option<PriceRange> = None;
        let mut total = 0;

        for entry in index.products() {
            let product = &entry.product;
            categories
                .entry(product.category_id.as_str())
                .or_insert((product.category_name.as_str(), 0))
                .1 += 1;

            if scope.is_some_and(|category| category != product.category_id) {
                continue;
            }

            total += 1;
            *availability.entry(product.availability).or_default() += 1;
            if let Some(slot) = PRICE_BUCKETS
                .iter()
                .position(|(min, max)| product.price >= *min && max.is_none_or(|max| product.price < max))
            {
                buckets[slot] += 1;
            }
            price_range = Some(match price_range {
                None => PriceRange {
                    min: product.price,
                    max: product.price,
                },
                Some(range) => PriceRange {
                    min: range.min.min(product.price),
                    max: range.max.max(product.price),
                },
            });
        }

        Self {
            category_scope: scope.map(str::to_string),
            total_products: total,
            price_range,
            price_buckets: PRICE_BUCKETS
                .iter()
                .zip(buckets)
                .map(|((min, max), count)| PriceBucket {
                    min: *min,
                    max: *max,
                    count,
                })
                .collect(),
            categories: categories
                .into_iter()
                .map(|(id, (name, count))| CategoryCount {
                    id: id.to_string(),
                    name: name.to_string(),
                    count,
                })
                .collect(),
            availability: Availability::ALL
                .into_iter()
                .map(|value| AvailabilityCount {
                    value,
                    count: availability.get(&value).copied().unwrap_or(0),
                })
                .collect(),
        }
    }
}
