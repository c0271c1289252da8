//! Error types for the search crate.

use storefront_core::{Error as CoreError, ErrorCode};
use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Empty, too long, or otherwise malformed query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Inconsistent or out-of-range filter values
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The pipeline ran past its time budget
    #[error("Search exceeded its {budget_ms} ms time budget")]
    SearchTimeout {
        /// Budget that was exceeded
        budget_ms: u64,
    },

    /// The cache or the index snapshot could not be reached
    #[error("{dependency} unavailable: {reason}")]
    DependencyUnavailable {
        /// Which collaborator failed
        dependency: &'static str,
        /// What went wrong
        reason: String,
    },
}

impl SearchError {
    /// Machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::InvalidFilter(_) => "INVALID_FILTER",
            Self::SearchTimeout { .. } => "SEARCH_TIMEOUT",
            Self::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
        }
    }

    /// Whether the caller sent something malformed.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidQuery(_) | Self::InvalidFilter(_))
    }

    pub(crate) fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub(crate) fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }

    pub(crate) fn index_unavailable(reason: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            dependency: "product index",
            reason: reason.into(),
        }
    }

    pub(crate) fn catalog_unavailable(reason: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            dependency: "catalog",
            reason: reason.into(),
        }
    }

    pub(crate) fn cache_unavailable(reason: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            dependency: "cache",
            reason: reason.into(),
        }
    }
}

impl From<SearchError> for CoreError {
    fn from(err: SearchError) -> Self {
        let code = match &err {
            SearchError::InvalidQuery(_) => ErrorCode::InvalidQuery,
            SearchError::InvalidFilter(_) => ErrorCode::InvalidFilter,
            SearchError::SearchTimeout { .. } => ErrorCode::SearchTimeout,
            SearchError::DependencyUnavailable { .. } => ErrorCode::DependencyUnavailable,
        };
        let message = err.to_string();
        let core = CoreError::new(code, message);
        match err {
            SearchError::SearchTimeout { .. } => {
                core.with_suggestion("Narrow the query or retry shortly")
            }
            SearchError::DependencyUnavailable { .. } => {
                core.with_suggestion("The search index is reloading; retry shortly")
            }
            _ => core,
        }
    }
}
