//! Background work: cache warming, index refresh and maintenance.

use crate::engine::SearchEngine;
use crate::filter::SearchFilters;
use crate::normalize::NormalizedQuery;
use crate::relevance::SortBy;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const TRACKER_CAPACITY: usize = 1024;

/// A request worth keeping warm.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmTarget {
    pub query: NormalizedQuery,
    pub filters: SearchFilters,
    pub sort: SortBy,
    pub page: usize,
    pub page_size: usize,
}

impl WarmTarget {
    fn identity(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.query.canonical(),
            self.filters.fingerprint(),
            self.sort,
            self.page,
            self.page_size
        )
    }
}

/// Counts executed requests so the warmer knows what is hot.
///
/// Holds at most a fixed number of distinct requests; when full, the least
/// seen one makes room.
#[derive(Debug, Default)]
pub struct HotQueryTracker {
    seen: Mutex<HashMap<String, (WarmTarget, u64)>>,
}

impl HotQueryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, target: WarmTarget) {
        let identity = target.identity();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, count)) = seen.get_mut(&identity) {
            *count += 1;
            return;
        }
        if seen.len() >= TRACKER_CAPACITY {
            let coldest = seen
                .iter()
                .min_by(|a, b| a.1.1.cmp(&b.1.1).then_with(|| b.0.cmp(a.0)))
                .map(|(key, _)| key.clone());
            if let Some(key) = coldest {
                seen.remove(&key);
            }
        }
        seen.insert(identity, (target, 1));
    }

    /// The `n` most frequent requests, most frequent first.
    pub fn top(&self, n: usize) -> Vec<WarmTarget> {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let mut ranked: Vec<(&String, &(WarmTarget, u64))> = seen.iter().collect();
        ranked.sort_by(|a, b| b.1.1.cmp(&a.1.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(n)
            .map(|(_, (target, _))| target.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(
        tokio::time::Instant::now() + period,
        period.max(Duration::from_millis(1)),
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Recompute the hottest requests every `period`.
pub fn spawn_cache_warmer(engine: Arc<SearchEngine>, period: Duration, top: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            let warmed = engine.warm_cache(top).await;
            tracing::debug!(warmed, "Cache warming pass finished");
        }
    })
}

/// Rebuild the index from the catalog every `period`.
pub fn spawn_index_refresher(engine: Arc<SearchEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            if let Err(err) = engine.refresh_index().await {
                tracing::warn!(error = %err, "Scheduled index refresh failed; keeping previous snapshot");
            }
        }
    })
}

/// Purge expired cache entries, stale suggestions and old analytics every `period`.
pub fn spawn_maintenance(engine: Arc<SearchEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            let report = engine.maintain(Utc::now());
            tracing::info!(
                cache_purged = report.cache_purged,
                suggestions_pruned = report.suggestions_pruned,
                analytics_purged = report.analytics_purged,
                "Maintenance pass finished"
            );
        }
    })
}

/// Handles of the background tasks; aborts them when dropped.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Start every task enabled in the engine's configuration.
    pub fn spawn_all(engine: &Arc<SearchEngine>) -> Self {
        let tasks = &engine.config().tasks;
        let mut handles = Vec::new();
        if tasks.warming_enabled && engine.config().cache.enabled {
            handles.push(spawn_cache_warmer(
                Arc::clone(engine),
                Duration::from_secs(tasks.warming_interval_secs),
                tasks.warming_top_queries,
            ));
        }
        if tasks.index_refresh_secs > 0 {
            handles.push(spawn_index_refresher(
                Arc::clone(engine),
                Duration::from_secs(tasks.index_refresh_secs),
            ));
        }
        if tasks.maintenance_interval_secs > 0 {
            handles.push(spawn_maintenance(
                Arc::clone(engine),
                Duration::from_secs(tasks.maintenance_interval_secs),
            ));
        }
        tracing::info!(tasks = handles.len(), "Background tasks started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.shutdown();
    }
}
