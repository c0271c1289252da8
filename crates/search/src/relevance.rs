//! Relevance scoring for search results.
//!
//! A product's score combines, per scoring query token, the best weighted
//! match over its fields (field weight × match quality × term rarity), the
//! fraction of query tokens it matched, and a capped popularity boost. All
//! constants come from [`RankingWeights`].

use crate::error::{Result, SearchError};
use crate::filter::SearchFilters;
use crate::fuzzy::{FuzzyMatcher, MatchKind, TermMatch};
use crate::index::{Field, IndexedProduct, ProductIndex};
use crate::normalize::NormalizedQuery;
use crate::pipeline::Deadline;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use storefront_core::config::RankingWeights;

/// Result ordering requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    PriceAsc,
    PriceDesc,
    Newest,
    Popularity,
}

impl SortBy {
    pub const ALL: [SortBy; 5] = [
        Self::Relevance,
        Self::PriceAsc,
        Self::PriceDesc,
        Self::Newest,
        Self::Popularity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::PriceAsc => "price_asc",
            Self::PriceDesc => "price_desc",
            Self::Newest => "newest",
            Self::Popularity => "popularity",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|sort| sort.as_str() == wanted)
            .ok_or_else(|| SearchError::invalid_query(format!("unknown sort_by '{s}'")))
    }
}

/// One query token and the index terms it expanded to.
#[derive(Debug, Clone)]
pub struct TokenPlan<'a> {
    pub token: String,
    pub matches: Vec<TermMatch<'a>>,
}

/// Query tokens expanded against one index snapshot.
#[derive(Debug, Clone)]
pub struct QueryPlan<'a> {
    pub tokens: Vec<TokenPlan<'a>>,
    /// Short tokens matched by exact or prefix terms only. They count toward
    /// coverage but select no candidates and carry no text score.
    pub prefix_tokens: Vec<TokenPlan<'a>>,
    /// False when only single-character tokens were given
    pub use_rarity: bool,
}

impl<'a> QueryPlan<'a> {
    /// Expand the scoring tokens of `query` against `index`.
    ///
    /// Tokens shorter than `min_scoring_len` become prefix-only refinements
    /// when any longer token exists; otherwise every token is scored and
    /// rarity is ignored. Repeated tokens are planned once.
    pub fn build(
        query: &NormalizedQuery,
        index: &'a ProductIndex,
        matcher: &FuzzyMatcher,
        min_scoring_len: usize,
    ) -> Self {
        let mut scoring: Vec<&str> = query.scoring_tokens(min_scoring_len).collect();
        let use_rarity = !scoring.is_empty();
        if !use_rarity {
            scoring = query.tokens.iter().map(String::as_str).collect();
        }

        let mut tokens: Vec<TokenPlan<'a>> = Vec::with_capacity(scoring.len());
        for token in scoring {
            if tokens.iter().any(|planned| planned.token == token) {
                continue;
            }
            tokens.push(TokenPlan {
                token: token.to_string(),
                matches: matcher.expand(token, index.vocabulary()),
            });
        }

        let mut prefix_tokens: Vec<TokenPlan<'a>> = Vec::new();
        if use_rarity {
            for token in query.tokens.iter().filter(|t| t.chars().count() < min_scoring_len) {
                if prefix_tokens.iter().any(|planned| &planned.token == token) {
                    continue;
                }
                let matches = matcher
                    .expand(token, index.vocabulary())
                    .into_iter()
                    .filter(|m| matches!(m.kind, MatchKind::Exact | MatchKind::Prefix))
                    .collect();
                prefix_tokens.push(TokenPlan {
                    token: token.clone(),
                    matches,
                });
            }
        }

        Self {
            tokens,
            prefix_tokens,
            use_rarity,
        }
    }

    /// Ascending ids of products containing any expanded term.
    pub fn candidates(&self, index: &ProductIndex) -> Vec<u32> {
        let mut docs: Vec<u32> = self
            .tokens
            .iter()
            .flat_map(|plan| plan.matches.iter())
            .flat_map(|m| index.postings(m.term).iter().copied())
            .collect();
        docs.sort_unstable();
        docs.dedup();
        docs
    }

    pub fn has_matches(&self) -> bool {
        self.tokens.iter().any(|plan| !plan.matches.is_empty())
    }
}

/// A product's score and match explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub score: f64,
    pub reason: String,
}

/// A scored product, referenced by its position in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub doc: u32,
    pub score: f64,
    pub reason: String,
}

/// Scores and orders candidate products.
#[derive(Debug, Clone)]
pub struct Ranker {
    weights: RankingWeights,
    parallel_threshold: usize,
}

impl Ranker {
    pub fn new(weights: RankingWeights) -> Self {
        Self {
            weights,
            parallel_threshold: usize::MAX,
        }
    }

    /// Score candidate sets of at least `threshold` products on the rayon pool.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Score one product; `None` when no planned token matches it.
    pub fn score(&self, entry: &IndexedProduct, plan: &QueryPlan<'_>, index: &ProductIndex) -> Option<Scored> {
        if plan.tokens.is_empty() {
            return None;
        }
        let max_weight = self.weights.max_field_weight();
        if max_weight <= 0.0 {
            return None;
        }
        let rarity_weight = self.weights.rarity_weight;

        let mut text_sum = 0.0;
        let mut matched = 0usize;
        let mut explanation: BTreeMap<Field, MatchKind> = BTreeMap::new();

        for token in &plan.tokens {
            let mut best: Option<(f64, Field, MatchKind)> = None;
            for field in Field::ALL {
                let field_factor = field.weight(&self.weights) / max_weight;
                if field_factor <= 0.0 {
                    continue;
                }
                for term in &token.matches {
                    if !entry.contains(field, term.term) {
                        continue;
                    }
                    let rarity = if plan.use_rarity {
                        (1.0 - rarity_weight) + rarity_weight * index.rarity(term.term)
                    } else {
                        1.0
                    };
                    let contribution = field_factor * term.quality * rarity;
                    if best.is_none_or(|(value, _, _)| contribution > value) {
                        best = Some((contribution, field, term.kind));
                    }
                }
            }

            if let Some((value, field, kind)) = best {
                matched += 1;
                text_sum += value;
                explanation
                    .entry(field)
                    .and_modify(|current| {
                        if kind_rank(kind) > kind_rank(*current) {
                            *current = kind;
                        }
                    })
                    .or_insert(kind);
            }
        }

        if matched == 0 {
            return None;
        }

        let mut refined = 0usize;
        for token in &plan.prefix_tokens {
            let hit = Field::ALL.into_iter().find_map(|field| {
                token
                    .matches
                    .iter()
                    .find(|term| entry.contains(field, term.term))
                    .map(|term| (field, term.kind))
            });
            if let Some((field, kind)) = hit {
                refined += 1;
                explanation.entry(field).or_insert(kind);
            }
        }

        let count = plan.tokens.len() as f64;
        let text = text_sum / count;
        let coverage = (matched + refined) as f64 / (plan.tokens.len() + plan.prefix_tokens.len()) as f64;
        let popularity = entry.product.popularity.clamp(0.0, 1.0);
        let score = (self.weights.text_weight * text
            + self.weights.coverage_bonus * coverage
            + self.weights.popularity_cap * popularity)
            .clamp(0.0, 1.0);

        Some(Scored {
            score,
            reason: explain(&explanation),
        })
    }

    /// Filter, score and sort the candidates of `plan`.
    pub fn rank(
        &self,
        index: &ProductIndex,
        plan: &QueryPlan<'_>,
        filters: &SearchFilters,
        sort: SortBy,
        deadline: &Deadline,
    ) -> Result<Vec<RankedResult>> {
        let candidates = plan.candidates(index);
        deadline.check()?;

        let score_one = |doc: u32| -> Option<RankedResult> {
            let entry = index.product(doc)?;
            if !filters.matches(&entry.product) {
                return None;
            }
            let scored = self.score(entry, plan, index)?;
            Some(RankedResult {
                doc,
                score: scored.score,
                reason: scored.reason,
            })
        };

        let mut ranked: Vec<RankedResult> = if candidates.len() >= self.parallel_threshold {
            self.score_parallel(&candidates, &score_one)
        } else {
            let mut ranked = Vec::with_capacity(candidates.len());
            for (i, doc) in candidates.iter().enumerate() {
                if i % 256 == 255 {
                    deadline.check()?;
                }
                if let Some(result) = score_one(*doc) {
                    ranked.push(result);
                }
            }
            ranked
        };
        deadline.check()?;

        ranked.sort_by(|a, b| compare(index, sort, a, b));
        Ok(ranked)
    }

    #[cfg(feature = "parallel")]
    fn score_parallel<F>(&self, candidates: &[u32], score_one: &F) -> Vec<RankedResult>
    where
        F: Fn(u32) -> Option<RankedResult> + Sync,
    {
        use rayon::prelude::*;
        candidates
            .par_iter()
            .filter_map(|doc| score_one(*doc))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn score_parallel<F>(&self, candidates: &[u32], score_one: &F) -> Vec<RankedResult>
    where
        F: Fn(u32) -> Option<RankedResult> + Sync,
    {
        candidates.iter().filter_map(|doc| score_one(*doc)).collect()
    }
}

fn kind_rank(kind: MatchKind) -> u8 {
    match kind {
        MatchKind::Exact => 2,
        MatchKind::Prefix => 1,
        MatchKind::Typo { .. } => 0,
    }
}

fn explain(fields: &BTreeMap<Field, MatchKind>) -> String {
    fields
        .iter()
        .map(|(field, kind)| format!("{} match in {}", kind.label(), field.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Total order over ranked results: the sort key, then score descending,
/// then newest first, then product id.
fn compare(index: &ProductIndex, sort: SortBy, a: &RankedResult, b: &RankedResult) -> Ordering {
    let (Some(pa), Some(pb)) = (index.product(a.doc), index.product(b.doc)) else {
        return a.doc.cmp(&b.doc);
    };
    let (pa, pb) = (&pa.product, &pb.product);

    let primary = match sort {
        SortBy::Relevance => Ordering::Equal,
        SortBy::PriceAsc => pa.price.total_cmp(&pb.price),
        SortBy::PriceDesc => pb.price.total_cmp(&pa.price),
        SortBy::Newest => pb.created_at.cmp(&pa.created_at),
        SortBy::Popularity => pb.popularity.total_cmp(&pa.popularity),
    };

    primary
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| pb.created_at.cmp(&pa.created_at))
        .then_with(|| pa.id.cmp(&pb.id))
}
