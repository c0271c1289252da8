//! Autocomplete suggestions learned from executed searches.
//!
//! Entries are keyed by canonical query text in a `BTreeMap`, so every query
//! sharing a prefix sits in one contiguous range. Counters are atomics; the
//! map's write lock is only taken to insert a new query or prune.

use crate::normalize::tokenize;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use storefront_core::config::SuggestionSettings;

#[derive(Debug)]
struct SuggestionEntry {
    occurrences: AtomicU64,
    last_used_ms: AtomicI64,
}

impl SuggestionEntry {
    fn touch(&self, at: DateTime<Utc>) {
        self.occurrences.fetch_add(1, Ordering::Relaxed);
        self.last_used_ms.fetch_max(at.timestamp_millis(), Ordering::Relaxed);
    }

    fn last_used(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_used_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// One suggested query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub query: String,
    pub occurrences: u64,
    pub last_used: DateTime<Utc>,
}

/// Everything known under one prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSuggestion {
    pub prefix: String,
    /// Full queries, best first
    pub suggestions: Vec<String>,
    /// Sum of occurrences over the listed queries
    pub occurrences: u64,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct SuggestionEngine {
    entries: RwLock<BTreeMap<String, Arc<SuggestionEntry>>>,
    settings: SuggestionSettings,
}

impl SuggestionEngine {
    pub fn new(settings: SuggestionSettings) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            settings,
        }
    }

    fn canonical(text: &str) -> String {
        tokenize(text).join(" ")
    }

    /// Count one execution of `query`.
    pub fn record(&self, query: &str, at: DateTime<Utc>) {
        let canonical = Self::canonical(query);
        if canonical.is_empty() {
            return;
        }

        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(&canonical) {
                entry.touch(at);
                return;
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(canonical)
            .or_insert_with(|| {
                Arc::new(SuggestionEntry {
                    occurrences: AtomicU64::new(0),
                    last_used_ms: AtomicI64::new(i64::MIN),
                })
            })
            .touch(at);
    }

    /// Up to `limit` recorded queries starting with `prefix`.
    ///
    /// Ranked by occurrences, then recency, then text. Prefixes shorter than
    /// the configured minimum return nothing.
    pub fn suggestions(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        let prefix = Self::canonical(prefix);
        let limit = limit.min(self.settings.max_limit);
        if prefix.chars().count() < self.settings.min_prefix_len || limit == 0 {
            return Vec::new();
        }

        let mut found: Vec<Suggestion> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .range(prefix.clone()..)
                .take_while(|(query, _)| query.starts_with(&prefix))
                .map(|(query, entry)| Suggestion {
                    query: query.clone(),
                    occurrences: entry.occurrences.load(Ordering::Relaxed),
                    last_used: entry.last_used(),
                })
                .collect()
        };

        found.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| b.last_used.cmp(&a.last_used))
                .then_with(|| a.query.cmp(&b.query))
        });
        found.truncate(limit);
        found
    }

    /// The suggestion record for `prefix`, if it has any queries.
    pub fn entry_for_prefix(&self, prefix: &str, limit: usize) -> Option<SearchSuggestion> {
        let found = self.suggestions(prefix, limit);
        if found.is_empty() {
            return None;
        }
        Some(SearchSuggestion {
            prefix: Self::canonical(prefix),
            occurrences: found.iter().map(|s| s.occurrences).sum(),
            last_used: found.iter().map(|s| s.last_used).max(),
            suggestions: found.into_iter().map(|s| s.query).collect(),
        })
    }

    /// Remove queries seen fewer than the configured minimum number of times
    /// and not used within the retention window. Returns how many went.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - TimeDelta::days(i64::from(self.settings.retention_days));
        let min = self.settings.prune_min_occurrences;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.occurrences.load(Ordering::Relaxed) >= min || entry.last_used() >= cutoff
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
