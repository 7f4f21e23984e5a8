use serde::{Deserialize, Serialize};

/// First-result/max-results window of a query or set operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub first_result: u64,
    pub max_results: Option<u64>,
}

impl Pagination {
    /// Create pagination with page number (1-indexed) and per-page count
    pub fn page(page: u64, per_page: u64) -> Self {
        Self {
            first_result: page.saturating_sub(1) * per_page,
            max_results: Some(per_page),
        }
    }

    pub fn limit(&self) -> Option<u64> {
        self.max_results
    }

    /// The offset to render; a zero offset is omitted.
    pub fn offset(&self) -> Option<u64> {
        (self.first_result > 0).then_some(self.first_result)
    }

    pub fn is_empty(&self) -> bool {
        self.first_result == 0 && self.max_results.is_none()
    }
}
