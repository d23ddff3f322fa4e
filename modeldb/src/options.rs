use crate::document::CREATED_AT_FIELD;
use crate::query::Sort;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

/// Page request. Page and limit below 1 fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginationOptions {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub sort: Option<Sort>,
}

impl PaginationOptions {
    pub fn new(page: u64, limit: u64) -> Self {
        PaginationOptions {
            page: Some(page),
            limit: Some(limit),
            sort: None,
        }
    }

    pub fn sorted_by(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn page(&self) -> u64 {
        self.page.filter(|p| *p >= 1).unwrap_or(DEFAULT_PAGE)
    }

    pub fn limit(&self) -> u64 {
        self.limit.filter(|l| *l >= 1).unwrap_or(DEFAULT_LIMIT)
    }

    pub fn skip(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    /// Requested sort, newest first by default.
    pub fn sort(&self) -> Sort {
        self.sort.clone().unwrap_or_else(|| Sort::desc(CREATED_AT_FIELD))
    }
}

/// Options for `find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn sorted_by(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options for the update family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
    /// Insert a document seeded from the filter when nothing matches.
    #[serde(default)]
    pub upsert: bool,
    /// Return the document as it was before the update.
    #[serde(default)]
    pub return_original: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        UpdateOptions {
            upsert: true,
            return_original: false,
        }
    }
}
