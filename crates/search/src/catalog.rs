//! Product catalog collaborators.
//!
//! The engine reads products through [`CatalogSource`] when it builds an index
//! snapshot and checks category ids through [`CategoryLookup`] when it
//! validates filters. [`StaticCatalog`] implements both over an in-memory
//! product list, loadable from a JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;

/// Stock state of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Ready to ship
    InStock,
    /// A few units left
    LowStock,
    /// Temporarily unavailable
    OutOfStock,
    /// Orderable before release
    Preorder,
    /// No longer sold
    Discontinued,
}

impl Availability {
    /// Every availability value, in display order.
    pub const ALL: [Availability; 5] = [
        Self::InStock,
        Self::LowStock,
        Self::OutOfStock,
        Self::Preorder,
        Self::Discontinued,
    ];

    /// Wire name of the value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::LowStock => "low_stock",
            Self::OutOfStock => "out_of_stock",
            Self::Preorder => "preorder",
            Self::Discontinued => "discontinued",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Availability {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| CatalogError::UnknownAvailability(s.to_string()))
    }
}

/// A product as the catalog describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category_id: String,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub price: f64,
    pub availability: Availability,
    /// Normalized popularity signal in `[0, 1]`
    #[serde(default)]
    pub popularity: f64,
    pub created_at: DateTime<Utc>,
}

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// Catalog failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file is not valid JSON for the expected shape
    #[error("Catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Product refers to a category that does not exist
    #[error("Product '{product}' refers to unknown category '{category}'")]
    UnknownCategory {
        /// Product id
        product: String,
        /// Missing category id
        category: String,
    },

    /// Unrecognized availability value
    #[error("Unknown availability '{0}'")]
    UnknownAvailability(String),

    /// Catalog backend could not be reached
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the full product list for index builds.
pub trait CatalogSource: Send + Sync {
    /// Every product currently in the catalog.
    fn snapshot(&self) -> Result<Vec<CatalogProduct>, CatalogError>;
}

/// Answers whether a category id exists.
pub trait CategoryLookup: Send + Sync {
    /// True when `category_id` names a known category.
    fn category_exists(&self, category_id: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    products: Vec<CatalogProduct>,
}

/// In-memory catalog.
///
/// Categories named only by products are registered implicitly, using the
/// product's `category_name` (or the id) as the display name.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    categories: RwLock<BTreeMap<String, Category>>,
    products: RwLock<BTreeMap<String, CatalogProduct>>,
}

impl StaticCatalog {
    pub fn new(categories: Vec<Category>, products: Vec<CatalogProduct>) -> Self {
        let catalog = Self::default();
        {
            let mut map = catalog.categories.write().unwrap_or_else(|e| e.into_inner());
            for category in categories {
                map.insert(category.id.clone(), category);
            }
        }
        for product in products {
            catalog.upsert(product);
        }
        catalog
    }

    /// Parse a `{"categories": [...], "products": [...]}` document.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        Ok(Self::new(doc.categories, doc.products))
    }

    /// Load a catalog document from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Insert or replace a product.
    pub fn upsert(&self, mut product: CatalogProduct) {
        if product.category_name.is_empty() {
            if let Some(category) = self.category(&product.category_id) {
                product.category_name = category.name;
            }
        }
        {
            let mut categories = self.categories.write().unwrap_or_else(|e| e.into_inner());
            categories
                .entry(product.category_id.clone())
                .or_insert_with(|| Category {
                    id: product.category_id.clone(),
                    name: if product.category_name.is_empty() {
                        product.category_id.clone()
                    } else {
                        product.category_name.clone()
                    },
                });
        }
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        products.insert(product.id.clone(), product);
    }

    /// Remove a product; returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        products.remove(id).is_some()
    }

    pub fn category(&self, id: &str) -> Option<Category> {
        let categories = self.categories.read().unwrap_or_else(|e| e.into_inner());
        categories.get(id).cloned()
    }

    pub fn categories(&self) -> Vec<Category> {
        let categories = self.categories.read().unwrap_or_else(|e| e.into_inner());
        categories.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.products.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CatalogSource for StaticCatalog {
    fn snapshot(&self) -> Result<Vec<CatalogProduct>, CatalogError> {
        let products = self.products.read().unwrap_or_else(|e| e.into_inner());
        Ok(products.values().cloned().collect())
    }
}

impl CategoryLookup for StaticCatalog {
    fn category_exists(&self, category_id: &str) -> bool {
        let categories = self.categories.read().unwrap_or_else(|e| e.into_inner());
        categories.contains_key(category_id)
    }
}
