//! Search analytics.
//!
//! The request path hands records to [`AnalyticsRecorder`] with a
//! non-blocking `try_send` into a bounded queue; a single consumer task
//! appends them to the [`AnalyticsStore`] and feeds successful queries to the
//! suggestion engine. Without a store the queue still feeds suggestions.
//! A full queue drops the record and counts it.

use crate::filter::SearchFilters;
use crate::relevance::SortBy;
use crate::suggest::SuggestionEngine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use storefront_telemetry::metrics;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Analytics failures. Never surfaced to search callers.
#[derive(Debug, Error, PartialEq)]
pub enum AnalyticsError {
    #[error("Analytics queue is full")]
    QueueFull,

    #[error("Analytics recorder has shut down")]
    Closed,

    #[error("Analytics are disabled")]
    Disabled,

    #[error("Analytics store error: {0}")]
    Store(String),
}

/// One executed search. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAnalyticsRecord {
    pub id: Uuid,
    pub query: String,
    pub normalized_query: String,
    pub filters: SearchFilters,
    pub sort_by: SortBy,
    pub page: usize,
    pub result_count: usize,
    pub response_time_ms: u64,
    pub cache_hit: bool,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Products a caller selected from a search's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub search_id: Uuid,
    pub product_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCount {
    pub query: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_searches: usize,
    pub zero_result_searches: usize,
    pub selections: usize,
    pub cache_hit_rate: f64,
    pub mean_response_time_ms: f64,
    pub top_queries: Vec<QueryCount>,
    pub top_zero_result_queries: Vec<QueryCount>,
}

/// Durable home of analytics records.
pub trait AnalyticsStore: Send + Sync {
    fn append_search(&self, record: SearchAnalyticsRecord) -> Result<(), AnalyticsError>;

    fn append_selection(&self, record: SelectionRecord) -> Result<(), AnalyticsError>;

    /// Drop search and selection records older than `cutoff`.
    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, AnalyticsError>;

    /// Aggregate view listing up to `top` queries per ranking.
    fn summary(&self, top: usize) -> Result<AnalyticsSummary, AnalyticsError>;
}

#[derive(Debug, Default)]
pub struct MemoryAnalyticsStore {
    searches: RwLock<Vec<SearchAnalyticsRecord>>,
    selections: RwLock<Vec<SelectionRecord>>,
}

impl MemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn searches(&self) -> Vec<SearchAnalyticsRecord> {
        self.searches.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn selections(&self) -> Vec<SelectionRecord> {
        self.selections.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn top_counts<'a>(queries: impl Iterator<Item = &'a str>, top: usize) -> Vec<QueryCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for query in queries {
        *counts.entry(query).or_default() += 1;
    }
    let mut counts: Vec<QueryCount> = counts
        .into_iter()
        .map(|(query, count)| QueryCount {
            query: query.to_string(),
            count,
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
    counts.truncate(top);
    counts
}

impl AnalyticsStore for MemoryAnalyticsStore {
    fn append_search(&self, record: SearchAnalyticsRecord) -> Result<(), AnalyticsError> {
        self.searches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    fn append_selection(&self, record: SelectionRecord) -> Result<(), AnalyticsError> {
        self.selections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, AnalyticsError> {
        let mut searches = self.searches.write().unwrap_or_else(|e| e.into_inner());
        let mut selections = self.selections.write().unwrap_or_else(|e| e.into_inner());
        let before = searches.len() + selections.len();
        searches.retain(|r| r.timestamp >= cutoff);
        selections.retain(|r| r.timestamp >= cutoff);
        Ok(before - searches.len() - selections.len())
    }

    fn summary(&self, top: usize) -> Result<AnalyticsSummary, AnalyticsError> {
        let searches = self.searches.read().unwrap_or_else(|e| e.into_inner());
        let selections = self.selections.read().unwrap_or_else(|e| e.into_inner()).len();
        let total = searches.len();
        if total == 0 {
            return Ok(AnalyticsSummary {
                selections,
                ..AnalyticsSummary::default()
            });
        }

        let hits = searches.iter().filter(|r| r.cache_hit).count();
        let latency: u64 = searches.iter().map(|r| r.response_time_ms).sum();
        let zero: Vec<&SearchAnalyticsRecord> = searches.iter().filter(|r| r.result_count == 0).collect();

        Ok(AnalyticsSummary {
            total_searches: total,
            zero_result_searches: zero.len(),
            selections,
            cache_hit_rate: hits as f64 / total as f64,
            mean_response_time_ms: latency as f64 / total as f64,
            top_queries: top_counts(searches.iter().map(|r| r.normalized_query.as_str()), top),
            top_zero_result_queries: top_counts(zero.iter().map(|r| r.normalized_query.as_str()), top),
        })
    }
}

#[derive(Debug)]
enum AnalyticsEvent {
    Search(SearchAnalyticsRecord),
    Selection(SelectionRecord),
    Flush(oneshot::Sender<()>),
}

/// Front of the analytics queue.
pub struct AnalyticsRecorder {
    tx: mpsc::Sender<AnalyticsEvent>,
    store: Option<Arc<dyn AnalyticsStore>>,
    dropped: AtomicU64,
    consumer: JoinHandle<()>,
}

impl std::fmt::Debug for AnalyticsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsRecorder")
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AnalyticsRecorder {
    /// Start the consumer task on the current tokio runtime.
    ///
    /// With `store` set to `None` records only feed `suggestions` and
    /// selections are refused.
    pub fn spawn(
        store: Option<Arc<dyn AnalyticsStore>>,
        suggestions: Option<Arc<SuggestionEngine>>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let consumer = tokio::spawn(consume(rx, store.clone(), suggestions));
        Self {
            tx,
            store,
            dropped: AtomicU64::new(0),
            consumer,
        }
    }

    fn enqueue(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics().increment("analytics.dropped");
                tracing::warn!("Analytics queue full; record dropped");
                Err(AnalyticsError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics().increment("analytics.dropped");
                tracing::warn!("Analytics consumer stopped; record dropped");
                Err(AnalyticsError::Closed)
            }
        }
    }

    /// Queue a search record without waiting.
    pub fn record(&self, record: SearchAnalyticsRecord) -> Result<(), AnalyticsError> {
        self.enqueue(AnalyticsEvent::Search(record))
    }

    /// Queue a selection record without waiting.
    pub fn log_selection(&self, record: SelectionRecord) -> Result<(), AnalyticsError> {
        if self.store.is_none() {
            return Err(AnalyticsError::Disabled);
        }
        self.enqueue(AnalyticsEvent::Selection(record))
    }

    /// Wait until everything queued before this call has been stored.
    pub async fn flush(&self) -> Result<(), AnalyticsError> {
        let (done, wait) = oneshot::channel();
        self.tx
            .send(AnalyticsEvent::Flush(done))
            .await
            .map_err(|_| AnalyticsError::Closed)?;
        wait.await.map_err(|_| AnalyticsError::Closed)
    }

    /// Records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Backing store; `None` when analytics are disabled.
    pub fn store(&self) -> Option<&Arc<dyn AnalyticsStore>> {
        self.store.as_ref()
    }
}

impl Drop for AnalyticsRecorder {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

async fn consume(
    mut rx: mpsc::Receiver<AnalyticsEvent>,
    store: Option<Arc<dyn AnalyticsStore>>,
    suggestions: Option<Arc<SuggestionEngine>>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            AnalyticsEvent::Search(record) => {
                if record.result_count > 0 {
                    if let Some(suggestions) = &suggestions {
                        suggestions.record(&record.normalized_query, record.timestamp);
                    }
                }
                if let Some(store) = &store {
                    if let Err(err) = store.append_search(record) {
                        tracing::warn!(error = %err, "Failed to store search record");
                    }
                }
            }
            AnalyticsEvent::Selection(record) => {
                if let Some(store) = &store {
                    if let Err(err) = store.append_selection(record) {
                        tracing::warn!(error = %err, "Failed to store selection record");
                    }
                }
            }
            AnalyticsEvent::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Analytics consumer stopped");
}
