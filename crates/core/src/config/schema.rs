//! Configuration schema definitions
//!
//! Every field carries a serde default, so an empty file is a valid
//! configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration schema
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigSchema {
    /// Service identity and listener
    #[serde(default)]
    pub general: GeneralConfig,

    /// Request limits and time budget
    #[serde(default)]
    pub search: SearchLimits,

    /// Typo and prefix tolerance
    #[serde(default)]
    pub fuzzy: FuzzyConfig,

    /// Relevance weights
    #[serde(default)]
    pub ranking: RankingWeights,

    /// Result cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Autocomplete
    #[serde(default)]
    pub suggestions: SuggestionSettings,

    /// Query analytics
    #[serde(default)]
    pub analytics: AnalyticsSettings,

    /// Background tasks
    #[serde(default)]
    pub tasks: TaskSettings,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfigSchema {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.max_page_size == 0 {
            return Err(Error::config_invalid("search.max_page_size must be at least 1"));
        }
        if search.default_page_size == 0 || search.default_page_size > search.max_page_size {
            return Err(Error::config_invalid(format!(
                "search.default_page_size must be within 1..={}",
                search.max_page_size
            )));
        }
        if search.max_query_length == 0 {
            return Err(Error::config_invalid("search.max_query_length must be at least 1"));
        }
        if search.timeout_ms == 0 {
            return Err(Error::config_invalid("search.timeout_ms must be positive"));
        }

        let fuzzy = &self.fuzzy;
        if fuzzy.long_token_len <= fuzzy.min_fuzzy_len {
            return Err(Error::config_invalid(
                "fuzzy.long_token_len must be greater than fuzzy.min_fuzzy_len",
            ));
        }
        if !(0.0..1.0).contains(&fuzzy.prefix_base_quality) {
            return Err(Error::config_invalid("fuzzy.prefix_base_quality must be in [0, 1)"));
        }
        if !(0.0..=0.5).contains(&fuzzy.edit_penalty) {
            return Err(Error::config_invalid("fuzzy.edit_penalty must be in [0, 0.5]"));
        }

        self.ranking.validate()?;

        if self.cache.ttl_secs == 0 {
            return Err(Error::config_invalid("cache.ttl_secs must be positive"));
        }
        if self.cache.max_entries == 0 {
            return Err(Error::config_invalid("cache.max_entries must be at least 1"));
        }
        if self.analytics.queue_capacity == 0 {
            return Err(Error::config_invalid("analytics.queue_capacity must be at least 1"));
        }
        if self.suggestions.min_prefix_len == 0 {
            return Err(Error::config_invalid("suggestions.min_prefix_len must be at least 1"));
        }
        Ok(())
    }
}

/// General service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Service name used in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_service_name() -> String {
    "storefront-search".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchLimits {
    /// Maximum query length in characters
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Largest page a caller may request
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Page size used when the caller gives none
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Time budget for one search, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Tokens shorter than this are matched by prefix only
    #[serde(default = "default_min_scoring_token_len")]
    pub min_scoring_token_len: usize,

    /// Candidate count above which scoring runs on the rayon pool
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_query_length: default_max_query_length(),
            max_page_size: default_max_page_size(),
            default_page_size: default_page_size(),
            timeout_ms: default_timeout_ms(),
            min_scoring_token_len: default_min_scoring_token_len(),
            parallel_threshold: default_parallel_threshold(),
        }
    }
}

fn default_max_query_length() -> usize {
    500
}

fn default_max_page_size() -> usize {
    100
}

fn default_page_size() -> usize {
    20
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_min_scoring_token_len() -> usize {
    2
}

fn default_parallel_threshold() -> usize {
    2048
}

/// Typo and prefix tolerance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuzzyConfig {
    /// Tokens shorter than this never get edit-distance matches
    #[serde(default = "default_min_fuzzy_len")]
    pub min_fuzzy_len: usize,

    /// Tokens at least this long get the larger distance bound
    #[serde(default = "default_long_token_len")]
    pub long_token_len: usize,

    /// Distance bound for tokens in `min_fuzzy_len..long_token_len`
    #[serde(default = "default_short_max_distance")]
    pub short_max_distance: usize,

    /// Distance bound for tokens of `long_token_len` or more
    #[serde(default = "default_long_max_distance")]
    pub long_max_distance: usize,

    /// Quality floor of a prefix match; grows towards 1.0 with coverage
    #[serde(default = "default_prefix_base_quality")]
    pub prefix_base_quality: f64,

    /// Quality lost per edit
    #[serde(default = "default_edit_penalty")]
    pub edit_penalty: f64,

    /// Cap on index terms one query token may expand to
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    /// Count an adjacent transposition as a single edit
    #[serde(default = "default_true")]
    pub transpositions: bool,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            min_fuzzy_len: default_min_fuzzy_len(),
            long_token_len: default_long_token_len(),
            short_max_distance: default_short_max_distance(),
            long_max_distance: default_long_max_distance(),
            prefix_base_quality: default_prefix_base_quality(),
            edit_penalty: default_edit_penalty(),
            max_expansions: default_max_expansions(),
            transpositions: true,
        }
    }
}

fn default_min_fuzzy_len() -> usize {
    4
}

fn default_long_token_len() -> usize {
    7
}

fn default_short_max_distance() -> usize {
    1
}

fn default_long_max_distance() -> usize {
    2
}

fn default_prefix_base_quality() -> f64 {
    0.6
}

fn default_edit_penalty() -> f64 {
    0.25
}

fn default_max_expansions() -> usize {
    64
}

fn default_true() -> bool {
    true
}

/// Tabulated relevance weights handed to the ranker as one value.
///
/// Field weights are relative to each other; `text_weight`, `coverage_bonus`
/// and `popularity_cap` are the shares of the final `[0, 1]` score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingWeights {
    /// Weight of a hit in the product name
    #[serde(default = "default_name_weight")]
    pub name_weight: f64,

    /// Weight of a hit in the description
    #[serde(default = "default_description_weight")]
    pub description_weight: f64,

    /// Weight of a hit in the category name
    #[serde(default = "default_category_weight")]
    pub category_weight: f64,

    /// Weight of a hit in a tag
    #[serde(default = "default_tag_weight")]
    pub tag_weight: f64,

    /// How strongly rare terms are preferred (0 disables the rarity factor)
    #[serde(default = "default_rarity_weight")]
    pub rarity_weight: f64,

    /// Share of the score taken by textual relevance
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,

    /// Additive bonus for matching every query token
    #[serde(default = "default_coverage_bonus")]
    pub coverage_bonus: f64,

    /// Largest boost popularity can add
    #[serde(default = "default_popularity_cap")]
    pub popularity_cap: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            name_weight: default_name_weight(),
            description_weight: default_description_weight(),
            category_weight: default_category_weight(),
            tag_weight: default_tag_weight(),
            rarity_weight: default_rarity_weight(),
            text_weight: default_text_weight(),
            coverage_bonus: default_coverage_bonus(),
            popularity_cap: default_popularity_cap(),
        }
    }
}

impl RankingWeights {
    /// Largest of the field weights
    #[must_use]
    pub fn max_field_weight(&self) -> f64 {
        self.name_weight
            .max(self.description_weight)
            .max(self.category_weight)
            .max(self.tag_weight)
    }

    /// Reject negative or degenerate weights
    pub fn validate(&self) -> Result<()> {
        let all = [
            ("name_weight", self.name_weight),
            ("description_weight", self.description_weight),
            ("category_weight", self.category_weight),
            ("tag_weight", self.tag_weight),
            ("rarity_weight", self.rarity_weight),
            ("text_weight", self.text_weight),
            ("coverage_bonus", self.coverage_bonus),
            ("popularity_cap", self.popularity_cap),
        ];
        for (name, value) in all {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::config_invalid(format!(
                    "ranking.{name} must be a non-negative number"
                )));
            }
        }
        if self.max_field_weight() <= 0.0 {
            return Err(Error::config_invalid("at least one ranking field weight must be positive"));
        }
        if self.rarity_weight > 1.0 {
            return Err(Error::config_invalid("ranking.rarity_weight must be in [0, 1]"));
        }
        if self.popularity_cap >= self.text_weight {
            return Err(Error::config_invalid(
                "ranking.popularity_cap must stay below ranking.text_weight",
            ));
        }
        Ok(())
    }
}

fn default_name_weight() -> f64 {
    3.0
}

fn default_description_weight() -> f64 {
    2.0
}

fn default_category_weight() -> f64 {
    1.5
}

fn default_tag_weight() -> f64 {
    1.0
}

fn default_rarity_weight() -> f64 {
    0.5
}

fn default_text_weight() -> f64 {
    0.7
}

fn default_coverage_bonus() -> f64 {
    0.2
}

fn default_popularity_cap() -> f64 {
    0.1
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    /// Serve and store pages through the cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time to live of a cached page
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Entries kept before the soonest-expiring ones are evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    10_000
}

/// Autocomplete configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestionSettings {
    /// Prefixes shorter than this return nothing
    #[serde(default = "default_min_prefix_len")]
    pub min_prefix_len: usize,

    /// Upper bound on the `limit` a caller may ask for
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Suggestions seen fewer times than this are pruned once stale
    #[serde(default = "default_prune_min_occurrences")]
    pub prune_min_occurrences: u64,

    /// Days after last use before a rare suggestion is pruned
    #[serde(default = "default_suggestion_retention_days")]
    pub retention_days: u32,
}

impl Default for SuggestionSettings {
    fn default() -> Self {
        Self {
            min_prefix_len: default_min_prefix_len(),
            max_limit: default_max_limit(),
            prune_min_occurrences: default_prune_min_occurrences(),
            retention_days: default_suggestion_retention_days(),
        }
    }
}

fn default_min_prefix_len() -> usize {
    2
}

fn default_max_limit() -> usize {
    20
}

fn default_prune_min_occurrences() -> u64 {
    2
}

fn default_suggestion_retention_days() -> u32 {
    30
}

/// Query analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsSettings {
    /// Record searches at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bounded queue between the request path and the recorder
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Days a record is kept
    #[serde(default = "default_analytics_retention_days")]
    pub retention_days: u32,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: default_queue_capacity(),
            retention_days: default_analytics_retention_days(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_analytics_retention_days() -> u32 {
    90
}

/// Background task schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSettings {
    /// Recompute hot queries ahead of expiry
    #[serde(default = "default_true")]
    pub warming_enabled: bool,

    /// Seconds between warming passes
    #[serde(default = "default_warming_interval_secs")]
    pub warming_interval_secs: u64,

    /// Hot queries recomputed per pass
    #[serde(default = "default_warming_top_queries")]
    pub warming_top_queries: usize,

    /// Seconds between catalog snapshot reloads (0 disables)
    #[serde(default = "default_index_refresh_secs")]
    pub index_refresh_secs: u64,

    /// Seconds between cache purge, suggestion pruning and analytics retention
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            warming_enabled: true,
            warming_interval_secs: default_warming_interval_secs(),
            warming_top_queries: default_warming_top_queries(),
            index_refresh_secs: default_index_refresh_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

fn default_warming_interval_secs() -> u64 {
    60
}

fn default_warming_top_queries() -> usize {
    20
}

fn default_index_refresh_secs() -> u64 {
    300
}

fn default_maintenance_interval_secs() -> u64 {
    600
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of the compact format
    #[serde(default)]
    pub json: bool,

    /// Also write daily-rolling log files here
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
