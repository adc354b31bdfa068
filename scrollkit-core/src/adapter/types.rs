use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How block ids translate into adapter read parameters. Exactly one
/// strategy is configured at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pagination {
    /// 0-based `offset` + `limit`.
    #[default]
    Offset,
    /// 1-based `page` + `page_size`.
    Page,
    /// Opaque `cursor` echoed by the adapter per block boundary.
    Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Parameters of one adapter read. Which fields are populated depends on
/// the configured pagination strategy; search/filters/sort pass through
/// untouched for adapters that support them.
#[derive(Debug, Clone, Default)]
pub struct ReadParams {
    pub offset: Option<u64>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
    pub search: Option<String>,
    pub filters: IndexMap<String, serde_json::Value>,
    pub sort: Vec<SortSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub total: Option<u64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub has_next: Option<bool>,
    pub has_prev: Option<bool>,
    pub cursor: Option<String>,
}

/// One page of adapter data. Transport or server failures are `Err` on the
/// `read` call itself, not an in-band field.
#[derive(Debug, Clone)]
pub struct ReadResponse<T> {
    pub items: Vec<T>,
    pub meta: Option<ResponseMeta>,
}

impl<T> ReadResponse<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, meta: None }
    }

    pub fn with_meta(items: Vec<T>, meta: ResponseMeta) -> Self {
        Self {
            items,
            meta: Some(meta),
        }
    }
}
