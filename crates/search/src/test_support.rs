//! Fixtures shared by unit tests.

use crate::catalog::{Availability, CatalogProduct, Category, StaticCatalog};
use crate::cache::{CacheError, CacheKey, SearchCache, SearchCacheEntry};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub(crate) fn product(id: &str, name: &str, category: &str) -> CatalogProduct {
    CatalogProduct {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        category_id: category.to_string(),
        category_name: String::new(),
        tags: Vec::new(),
        price: 10.0,
        availability: Availability::InStock,
        popularity: 0.0,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

#[allow(clippy::too_many_arguments)]
fn full(
    id: &str,
    name: &str,
    category: &str,
    description: &str,
    tags: &[&str],
    price: f64,
    availability: Availability,
    popularity: f64,
    day: u32,
) -> CatalogProduct {
    CatalogProduct {
        description: description.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        price,
        availability,
        popularity,
        created_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
        category_name: sample_categories()
            .into_iter()
            .find(|c| c.id == category)
            .map(|c| c.name)
            .unwrap_or_default(),
        ..product(id, name, category)
    }
}

pub(crate) fn sample_categories() -> Vec<Category> {
    [
        ("electronics", "Electronics"),
        ("accessories", "Accessories"),
        ("home", "Home"),
        ("kitchen", "Kitchen"),
        ("garden", "Garden"),
    ]
    .into_iter()
    .map(|(id, name)| Category {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

pub(crate) fn sample_products() -> Vec<CatalogProduct> {
    use Availability::*;
    vec![
        full("p1", "Gaming Laptop", "electronics", "Fast laptop with 16GB RAM", &["gaming", "laptop"], 1299.0, InStock, 0.9, 1),
        full("p2", "Laptop Sleeve", "accessories", "Padded sleeve for 15 inch laptops", &["laptop", "sleeve"], 29.99, InStock, 0.4, 2),
        full("p3", "Mechanical Keyboard", "electronics", "Tactile keyboard with RGB lighting", &["keyboard"], 89.0, LowStock, 0.7, 3),
        full("p4", "Wireless Mouse", "electronics", "Ergonomic wireless mouse", &["mouse", "wireless"], 24.5, OutOfStock, 0.6, 4),
        full("p5", "Desk Lamp", "home", "LED lamp for desks", &["lighting"], 45.0, InStock, 0.3, 5),
        full("p6", "Business Laptop", "electronics", "Lightweight laptop for work", &["laptop"], 999.0, Preorder, 0.5, 6),
        full("p7", "Coffee Mug", "kitchen", "Ceramic mug", &["mug"], 12.0, InStock, 0.2, 7),
        full("p8", "USB-C Hub", "electronics", "Seven port hub", &["usb", "hub"], 39.0, InStock, 0.5, 8),
    ]
}

pub(crate) fn sample_catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::new(sample_categories(), sample_products()))
}

/// Cache backend that is always down.
pub(crate) struct FailingCache;

impl SearchCache for FailingCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<SearchCacheEntry>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn put(&self, _entry: SearchCacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn invalidate_all(&self) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn len(&self) -> usize {
        0
    }
}
