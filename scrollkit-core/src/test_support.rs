//! Shared fixtures for unit tests: a minimal payload type and a scripted
//! adapter that records every read it serves.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::Duration;

use crate::adapter::{DataAdapter, ReadParams, ReadResponse, ResponseMeta};
use crate::item::HasId;

#[derive(Debug, Clone, PartialEq)]
pub struct TestRow {
    pub id: String,
    pub label: String,
}

impl TestRow {
    pub fn new(n: usize) -> Self {
        Self {
            id: format!("row-{n}"),
            label: format!("Row {n}"),
        }
    }
}

impl HasId for TestRow {
    fn id(&self) -> &str {
        &self.id
    }
}

pub fn rows(range: std::ops::Range<usize>) -> Vec<TestRow> {
    range.map(TestRow::new).collect()
}

/// Adapter over `total` generated rows that records calls and can be told
/// to fail reads starting at specific offsets.
pub struct ScriptedAdapter {
    total: usize,
    calls: Mutex<Vec<ReadParams>>,
    failing_offsets: Mutex<HashSet<usize>>,
    delay: Option<Duration>,
}

impl ScriptedAdapter {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            calls: Mutex::new(Vec::new()),
            failing_offsets: Mutex::new(HashSet::new()),
            delay: None,
        }
    }

    /// Make reads overlap in time so dedup paths are exercised.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_at_offset(&self, offset: usize) {
        self.failing_offsets.lock().unwrap().insert(offset);
    }

    pub fn heal_offset(&self, offset: usize) {
        self.failing_offsets.lock().unwrap().remove(&offset);
    }

    pub fn calls(&self) -> Vec<ReadParams> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn start_of(&self, params: &ReadParams) -> Result<(usize, usize)> {
        let limit = params.limit.or(params.page_size).unwrap_or(20) as usize;
        let start = if let Some(offset) = params.offset {
            offset as usize
        } else if let Some(page) = params.page {
            (page.max(1) as usize - 1) * limit
        } else if let Some(cursor) = &params.cursor {
            cursor.parse::<usize>().map_err(|_| anyhow!("bad cursor"))?
        } else {
            0
        };
        Ok((start, limit))
    }
}

#[async_trait]
impl DataAdapter<TestRow> for ScriptedAdapter {
    async fn read(&self, params: ReadParams) -> Result<ReadResponse<TestRow>> {
        self.calls.lock().unwrap().push(params.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (start, limit) = self.start_of(&params)?;
        if self.failing_offsets.lock().unwrap().contains(&start) {
            return Err(anyhow!("500"));
        }

        let end = start.saturating_add(limit).min(self.total);
        let items = if start < self.total {
            rows(start..end)
        } else {
            Vec::new()
        };
        let meta = ResponseMeta {
            total: Some(self.total as u64),
            has_next: Some(end < self.total),
            cursor: if end < self.total {
                Some(end.to_string())
            } else {
                None
            },
            ..Default::default()
        };
        Ok(ReadResponse::with_meta(items, meta))
    }
}
