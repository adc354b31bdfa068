use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::adapter::traits::DataAdapter;
use crate::adapter::types::{ReadParams, ReadResponse, ResponseMeta};

/// Adapter over a fixed in-memory sequence.
///
/// Supports all three pagination strategies (cursors are stringified
/// offsets). Useful for static data sets and as the reference adapter in
/// tests.
pub struct InMemoryAdapter<T> {
    items: Vec<T>,
    default_limit: u32,
}

impl<T> InMemoryAdapter<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            default_limit: 20,
        }
    }

    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn window(&self, params: &ReadParams) -> Result<(usize, usize)> {
        let limit = params
            .limit
            .or(params.page_size)
            .unwrap_or(self.default_limit)
            .max(1) as usize;

        let start = if let Some(offset) = params.offset {
            offset as usize
        } else if let Some(page) = params.page {
            if page == 0 {
                return Err(anyhow!("page numbers are 1-based"));
            }
            (page as usize - 1) * limit
        } else if let Some(cursor) = &params.cursor {
            cursor
                .parse::<usize>()
                .map_err(|_| anyhow!("unknown cursor: {cursor}"))?
        } else {
            0
        };

        Ok((start, limit))
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> DataAdapter<T> for InMemoryAdapter<T> {
    async fn read(&self, params: ReadParams) -> Result<ReadResponse<T>> {
        let (start, limit) = self.window(&params)?;
        let total = self.items.len();
        let end = start.saturating_add(limit).min(total);
        let items: Vec<T> = if start < total {
            self.items[start..end].to_vec()
        } else {
            Vec::new()
        };

        let meta = ResponseMeta {
            total: Some(total as u64),
            page: params.page,
            page_size: params.page_size.or(params.limit),
            has_next: Some(end < total),
            has_prev: Some(start > 0),
            cursor: if end < total {
                Some(end.to_string())
            } else {
                None
            },
        };
        Ok(ReadResponse::with_meta(items, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> InMemoryAdapter<u32> {
        InMemoryAdapter::new((0..95).collect())
    }

    #[tokio::test]
    async fn test_offset_reads() {
        let response = adapter()
            .read(ReadParams {
                offset: Some(40),
                limit: Some(20),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.items, (40..60).collect::<Vec<u32>>());
        let meta = response.meta.unwrap();
        assert_eq!(meta.total, Some(95));
        assert_eq!(meta.has_next, Some(true));
    }

    #[tokio::test]
    async fn test_page_reads_are_one_based() {
        let response = adapter()
            .read(ReadParams {
                page: Some(1),
                page_size: Some(20),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.items, (0..20).collect::<Vec<u32>>());

        let error = adapter()
            .read(ReadParams {
                page: Some(0),
                ..Default::default()
            })
            .await;
        assert!(error.is_err());
    }

    #[tokio::test]
    async fn test_short_final_page() {
        let response = adapter()
            .read(ReadParams {
                page: Some(5),
                page_size: Some(20),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.items.len(), 15);
        assert_eq!(response.meta.unwrap().has_next, Some(false));
    }

    #[tokio::test]
    async fn test_cursor_chain() {
        let adapter = adapter();
        let first = adapter
            .read(ReadParams {
                limit: Some(50),
                ..Default::default()
            })
            .await
            .unwrap();
        let cursor = first.meta.unwrap().cursor.unwrap();

        let second = adapter
            .read(ReadParams {
                cursor: Some(cursor),
                limit: Some(50),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.items, (50..95).collect::<Vec<u32>>());
        assert_eq!(second.meta.unwrap().cursor, None);
    }

    #[tokio::test]
    async fn test_read_past_end_is_empty() {
        let response = adapter()
            .read(ReadParams {
                offset: Some(500),
                limit: Some(20),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(response.items.is_empty());
    }
}
