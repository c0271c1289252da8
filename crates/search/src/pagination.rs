//! Page slicing and pagination metadata.

use serde::{Deserialize, Serialize};

/// Pagination metadata for one page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_results: usize,
    pub page_size: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    /// Metadata for `page` (1-based) of `total` results.
    ///
    /// `page_size` must be at least 1; callers validate it beforehand.
    pub fn new(total: usize, page: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let total_pages = total.div_ceil(page_size);
        Self {
            current_page: page,
            total_pages,
            total_results: total,
            page_size,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }

    /// Index range of this page within the full result list.
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self
            .current_page
            .saturating_sub(1)
            .saturating_mul(self.page_size)
            .min(self.total_results);
        let end = start.saturating_add(self.page_size).min(self.total_results);
        start..end
    }
}

/// Take one page out of `items`.
///
/// A page past the end yields an empty slice with the true totals.
pub fn paginate<T>(mut items: Vec<T>, page: usize, page_size: usize) -> (Vec<T>, Pagination) {
    let pagination = Pagination::new(items.len(), page, page_size);
    let range = pagination.range();
    items.truncate(range.end);
    let slice = items.split_off(range.start);
    (slice, pagination)
}
