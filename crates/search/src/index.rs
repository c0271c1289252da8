//! Immutable product index snapshots.
//!
//! A [`ProductIndex`] is built once from a catalog snapshot and never mutated;
//! refreshes build a new one and swap it into the [`IndexHandle`]. Readers
//! hold an `Arc` to the snapshot they started with, so a search never sees a
//! half-built index.

use crate::catalog::{CatalogProduct, CatalogSource};
use crate::error::{Result, SearchError};
use crate::normalize::tokenize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use storefront_core::config::RankingWeights;
use storefront_telemetry::Timer;

/// Searchable product fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Description,
    Category,
    Tags,
}

impl Field {
    pub const ALL: [Field; 4] = [Self::Name, Self::Description, Self::Category, Self::Tags];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Category => "category",
            Self::Tags => "tags",
        }
    }

    /// Configured weight of a match in this field.
    pub fn weight(&self, weights: &RankingWeights) -> f64 {
        match self {
            Self::Name => weights.name_weight,
            Self::Description => weights.description_weight,
            Self::Category => weights.category_weight,
            Self::Tags => weights.tag_weight,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// A product plus its tokenized fields.
#[derive(Debug, Clone)]
pub struct IndexedProduct {
    pub product: CatalogProduct,
    terms: [Vec<String>; 4],
}

impl IndexedProduct {
    fn new(mut product: CatalogProduct) -> Self {
        product.popularity = if product.popularity.is_finite() {
            product.popularity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if product.category_name.is_empty() {
            product.category_name = product.category_id.clone();
        }

        let tag_text = product.tags.join(" ");
        let terms = [
            sorted_terms(&product.name),
            sorted_terms(&product.description),
            sorted_terms(&product.category_name),
            sorted_terms(&tag_text),
        ];
        Self { product, terms }
    }

    /// Sorted, deduplicated terms of one field.
    pub fn terms(&self, field: Field) -> &[String] {
        &self.terms[field.slot()]
    }

    pub fn contains(&self, field: Field, term: &str) -> bool {
        self.terms(field)
            .binary_search_by(|t| t.as_str().cmp(term))
            .is_ok()
    }
}

fn sorted_terms(text: &str) -> Vec<String> {
    let set: BTreeSet<String> = tokenize(text).into_iter().collect();
    set.into_iter().collect()
}

/// Read-only search structures for one catalog snapshot.
#[derive(Debug)]
pub struct ProductIndex {
    generation: u64,
    built_at: DateTime<Utc>,
    products: Vec<IndexedProduct>,
    vocabulary: Vec<String>,
    postings: HashMap<String, Vec<u32>>,
    by_id: HashMap<String, usize>,
}

impl ProductIndex {
    /// Build an index from catalog products.
    ///
    /// Later duplicates of a product id replace earlier ones. Products with a
    /// negative or non-finite price are skipped.
    pub fn build(generation: u64, products: Vec<CatalogProduct>) -> Self {
        let mut unique: BTreeMap<String, CatalogProduct> = BTreeMap::new();
        for product in products {
            if !product.price.is_finite() || product.price < 0.0 {
                tracing::warn!(product = %product.id, price = product.price, "Skipping product with invalid price");
                continue;
            }
            unique.insert(product.id.clone(), product);
        }

        let products: Vec<IndexedProduct> = unique.into_values().map(IndexedProduct::new).collect();

        let mut postings: HashMap<String, Vec<u32>> = HashMap::new();
        let mut by_id = HashMap::with_capacity(products.len());
        for (doc, indexed) in products.iter().enumerate() {
            by_id.insert(indexed.product.id.clone(), doc);
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for field in Field::ALL {
                for term in indexed.terms(field) {
                    if seen.insert(term.as_str()) {
                        postings.entry(term.clone()).or_default().push(doc as u32);
                    }
                }
            }
        }

        let mut vocabulary: Vec<String> = postings.keys().cloned().collect();
        vocabulary.sort_unstable();

        Self {
            generation,
            built_at: Utc::now(),
            products,
            vocabulary,
            postings,
            by_id,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn products(&self) -> &[IndexedProduct] {
        &self.products
    }

    pub fn product(&self, doc: u32) -> Option<&IndexedProduct> {
        self.products.get(doc as usize)
    }

    pub fn get(&self, id: &str) -> Option<&IndexedProduct> {
        self.by_id.get(id).map(|&doc| &self.products[doc])
    }

    /// Sorted, deduplicated list of every indexed term.
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Ascending document ids containing `term` in any field.
    pub fn postings(&self, term: &str) -> &[u32] {
        self.postings.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings(term).len()
    }

    /// Inverse document frequency of `term` scaled to `(0, 1]`.
    ///
    /// A term present in one product scores 1.0; a term present in every
    /// product scores the lowest value for this index size.
    pub fn rarity(&self, term: &str) -> f64 {
        let n = self.products.len() as f64;
        let df = self.document_frequency(term).max(1) as f64;
        if n <= 1.0 {
            return 1.0;
        }
        ((1.0 + n / df).ln() / (1.0 + n).ln()).clamp(0.0, 1.0)
    }
}

/// Holds the current index snapshot.
///
/// Until the first successful install the index is unavailable and searches
/// fail with `DependencyUnavailable`.
#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Option<Arc<ProductIndex>>>,
    generations: AtomicU64,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The installed snapshot.
    pub fn current(&self) -> Result<Arc<ProductIndex>> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        current
            .clone()
            .ok_or_else(|| SearchError::index_unavailable("no index snapshot has been loaded"))
    }

    /// Generation of the installed snapshot, 0 when none is installed.
    pub fn generation(&self) -> u64 {
        self.current().map(|index| index.generation()).unwrap_or(0)
    }

    /// Build a snapshot from `products` and make it current.
    ///
    /// Returns the snapshot that is current afterwards: when a newer
    /// concurrent build was installed first, this build is discarded.
    pub fn install(&self, products: Vec<CatalogProduct>) -> Arc<ProductIndex> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let timer = Timer::start("index.build_ms");
        let index = Arc::new(ProductIndex::build(generation, products));
        let elapsed = timer.stop();
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if let Some(newer) = current.as_ref().filter(|existing| existing.generation() > generation) {
            tracing::debug!(
                generation,
                current = newer.generation(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Stale index snapshot discarded"
            );
            return Arc::clone(newer);
        }
        *current = Some(Arc::clone(&index));
        tracing::info!(
            generation,
            products = index.len(),
            terms = index.vocabulary().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Index snapshot installed"
        );
        index
    }

    /// Rebuild from a catalog source.
    ///
    /// When the source fails the previous snapshot stays installed.
    pub fn refresh_from(&self, source: &dyn CatalogSource) -> Result<Arc<ProductIndex>> {
        let products = source
            .snapshot()
            .map_err(|e| SearchError::catalog_unavailable(e.to_string()))?;
        Ok(self.install(products))
    }

    /// Drop the current snapshot.
    pub fn clear(&self) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = None;
    }
}
