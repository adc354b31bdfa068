use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::adapter::{DataAdapter, Pagination, ReadParams};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::{EngineEvent, EventBus};
use crate::item::HasId;
use crate::range::{self, IndexRange};

pub type NormalizeFn<T> = Arc<dyn Fn(T) -> T + Send + Sync>;
pub type TransformFn<T> = Arc<dyn Fn(T) -> Option<T> + Send + Sync>;
pub type ValidateFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// User-supplied item pipeline, applied per block in the order
/// normalize -> transform -> validate. Items dropped by transform or
/// validate leave holes inside an otherwise loaded block.
pub struct Pipelines<T> {
    pub normalize: Option<NormalizeFn<T>>,
    pub transform: Option<TransformFn<T>>,
    pub validate: Option<ValidateFn<T>>,
}

impl<T> Default for Pipelines<T> {
    fn default() -> Self {
        Self {
            normalize: None,
            transform: None,
            validate: None,
        }
    }
}

/// Where `add_items` splices into the dense prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Start,
    End,
}

/// Failure record for one block. Attempts only ever grow until the block
/// loads successfully or `retry_failed` clears the entry.
#[derive(Debug, Clone)]
pub struct FailedBlock {
    pub error: EngineError,
    pub attempts: u32,
    pub last_attempt_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    pub item_count: usize,
    pub loaded_blocks: usize,
    pub pending_blocks: usize,
    pub failed_blocks: usize,
    pub dense_len: usize,
    pub total: Option<usize>,
}

struct CollectionState<T> {
    items: HashMap<usize, T>,
    loaded: HashSet<u64>,
    pending: HashMap<u64, watch::Receiver<()>>,
    failed: HashMap<u64, FailedBlock>,
    /// Cursor to request block `k`, stored from block `k - 1`'s response.
    cursors: HashMap<u64, String>,
    total: Option<usize>,
    /// Length of the contiguous-from-zero prefix owned by the static-data
    /// operations. Blocks are not tracked for this prefix.
    dense_len: usize,
}

impl<T> CollectionState<T> {
    fn empty() -> Self {
        Self {
            items: HashMap::new(),
            loaded: HashSet::new(),
            pending: HashMap::new(),
            failed: HashMap::new(),
            cursors: HashMap::new(),
            total: None,
            dense_len: 0,
        }
    }

    fn reset_blocks(&mut self) {
        self.loaded.clear();
        self.pending.clear();
        self.failed.clear();
        self.cursors.clear();
    }
}

enum BlockAction {
    Ready,
    Wait(watch::Receiver<()>),
    Fail(EngineError),
    Fetch(watch::Sender<()>),
}

/// Sparse, block-tracked item store over a single data adapter.
///
/// Exclusively owns item storage and per-block load state. At most one
/// adapter read is in flight per block; concurrent callers for the same
/// block share its outcome.
pub struct Collection<T> {
    adapter: Arc<dyn DataAdapter<T>>,
    events: Arc<EventBus<T>>,
    pipelines: Pipelines<T>,
    pagination: Pagination,
    /// Query template (search/filters/sort) merged into every block read.
    base_params: ReadParams,
    block_size: usize,
    backoff_base: Duration,
    backoff_cap: Duration,
    state: Mutex<CollectionState<T>>,
}

impl<T> Collection<T>
where
    T: HasId + Clone + Send + Sync + 'static,
{
    pub fn new(
        adapter: Arc<dyn DataAdapter<T>>,
        events: Arc<EventBus<T>>,
        config: &EngineConfig,
        pagination: Pagination,
        pipelines: Pipelines<T>,
    ) -> Self {
        Self {
            adapter,
            events,
            pipelines,
            pagination,
            base_params: ReadParams::default(),
            block_size: config.page_size as usize,
            backoff_base: Duration::from_millis(config.backoff_base_ms as u64),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms as u64),
            state: Mutex::new(CollectionState::empty()),
        }
    }

    /// Fix a query context (search, filters, sort) that every adapter read
    /// carries alongside its pagination fields.
    pub fn with_base_params(mut self, params: ReadParams) -> Self {
        self.base_params = params;
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Load every block covering `range`, reusing cached and in-flight
    /// blocks, and return the loaded items of the range in index order.
    ///
    /// Holes left by the transform/validate pipeline are skipped in the
    /// returned vector but still count as loaded.
    pub async fn load_range(&self, requested: IndexRange) -> Result<Vec<T>, EngineError> {
        let range = match self.clamp_request(requested) {
            Some(range) => range,
            None => return Ok(Vec::new()),
        };

        let blocks: Vec<u64> = range::blocks_covering(range, self.block_size).collect();
        for block in blocks {
            self.load_block(block).await?;
        }

        let state = self.state.lock().unwrap();
        Ok(range
            .iter()
            .filter_map(|index| state.items.get(&index).cloned())
            .collect())
    }

    /// Clear a block's failure record and load it again, ignoring the
    /// backoff window.
    pub async fn retry_failed(&self, block_id: u64) -> Result<Vec<T>, EngineError> {
        self.state.lock().unwrap().failed.remove(&block_id);
        self.load_range(range::block_range(block_id, self.block_size))
            .await
    }

    pub fn get_item(&self, index: usize) -> Option<T> {
        self.state.lock().unwrap().items.get(&index).cloned()
    }

    pub fn get_total(&self) -> Option<usize> {
        self.state.lock().unwrap().total
    }

    /// More data may exist: the total is unknown, or known but not fully
    /// covered by loaded blocks (or the dense prefix).
    pub fn has_more(&self) -> bool {
        let state = self.state.lock().unwrap();
        let total = match state.total {
            None => return true,
            Some(0) => return false,
            Some(total) => total,
        };
        if state.dense_len >= total {
            return false;
        }
        let last_block = range::block_of(total - 1, self.block_size);
        (0..=last_block).any(|block| !state.loaded.contains(&block))
    }

    /// Replace storage with items contiguous from index 0.
    pub fn set_items(&self, items: Vec<T>) {
        let len = items.len();
        {
            let mut state = self.state.lock().unwrap();
            state.reset_blocks();
            state.items = items.into_iter().enumerate().collect();
            state.dense_len = len;
            state.total = Some(len);
        }
        self.events.emit(EngineEvent::ItemsSet { len });
    }

    /// Splice items into the dense prefix.
    pub fn add_items(&self, items: Vec<T>, position: Position) {
        let len = {
            let mut state = self.state.lock().unwrap();
            let mut dense = Self::take_dense(&mut state);
            match position {
                Position::End => dense.extend(items),
                Position::Start => {
                    let mut merged = items;
                    merged.extend(dense);
                    dense = merged;
                }
            }
            Self::put_dense(&mut state, dense)
        };
        self.events.emit(EngineEvent::ItemsSet { len });
    }

    /// Replace dense-prefix items whose id matches; returns how many
    /// matched.
    pub fn update_items(&self, items: Vec<T>) -> usize {
        let (updated, len) = {
            let mut state = self.state.lock().unwrap();
            let mut updated = 0;
            for replacement in items {
                let found = state
                    .items
                    .iter()
                    .find(|(index, item)| {
                        **index < state.dense_len && item.id() == replacement.id()
                    })
                    .map(|(index, _)| *index);
                if let Some(index) = found {
                    state.items.insert(index, replacement);
                    updated += 1;
                }
            }
            (updated, state.dense_len)
        };
        if updated > 0 {
            self.events.emit(EngineEvent::ItemsSet { len });
        }
        updated
    }

    /// Drop dense-prefix items by id and close the gaps; returns how many
    /// were removed.
    pub fn remove_items(&self, ids: &[String]) -> usize {
        let (removed, len) = {
            let mut state = self.state.lock().unwrap();
            let dense = Self::take_dense(&mut state);
            let before = dense.len();
            let kept: Vec<T> = dense
                .into_iter()
                .filter(|item| !ids.iter().any(|id| id == item.id()))
                .collect();
            let removed = before - kept.len();
            let len = Self::put_dense(&mut state, kept);
            (removed, len)
        };
        if removed > 0 {
            self.events.emit(EngineEvent::ItemsSet { len });
        }
        removed
    }

    pub fn clear(&self) {
        {
            let mut state = self.state.lock().unwrap();
            *state = CollectionState::empty();
        }
        self.events.emit(EngineEvent::ItemsSet { len: 0 });
    }

    /// Forget all items and block state; the next `load_range` hits the
    /// adapter again. Resets the provisional total.
    pub fn refresh(&self) {
        let mut state = self.state.lock().unwrap();
        *state = CollectionState::empty();
    }

    pub fn find_index_by_id(&self, id: &str) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state
            .items
            .iter()
            .find(|(_, item)| item.id() == id)
            .map(|(index, _)| *index)
    }

    pub fn is_block_loaded(&self, block: u64) -> bool {
        self.state.lock().unwrap().loaded.contains(&block)
    }

    pub fn failed_block(&self, block: u64) -> Option<FailedBlock> {
        self.state.lock().unwrap().failed.get(&block).cloned()
    }

    /// Blocks inside `range` that are worth requesting: not loaded, not in
    /// flight, not covered by the dense prefix, and not failed inside their
    /// backoff window.
    pub fn unloaded_blocks(&self, range: IndexRange) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        let range = match state.total {
            Some(total) => match range.clamp_to_total(total) {
                Some(range) => range,
                None => return Vec::new(),
            },
            None => range,
        };

        range::blocks_covering(range, self.block_size)
            .filter(|block| {
                if state.loaded.contains(block) || state.pending.contains_key(block) {
                    return false;
                }
                let mut block_range = range::block_range(*block, self.block_size);
                if let Some(total) = state.total {
                    block_range = block_range.clamp_to_total(total).unwrap_or(block_range);
                }
                if state.dense_len > 0 && block_range.end < state.dense_len {
                    return false;
                }
                if let Some(failure) = state.failed.get(block) {
                    if failure.last_attempt_at.elapsed() < self.backoff_window(failure.attempts) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    pub fn stats(&self) -> CollectionStats {
        let state = self.state.lock().unwrap();
        CollectionStats {
            item_count: state.items.len(),
            loaded_blocks: state.loaded.len(),
            pending_blocks: state.pending.len(),
            failed_blocks: state.failed.len(),
            dense_len: state.dense_len,
            total: state.total,
        }
    }

    fn clamp_request(&self, requested: IndexRange) -> Option<IndexRange> {
        let total = self.state.lock().unwrap().total;
        match total {
            Some(total) => {
                let clamped = requested.clamp_to_total(total);
                if clamped.is_none() || clamped != Some(requested) {
                    log::warn!(
                        "load_range [{}, {}] exceeds total {}; clamped",
                        requested.start,
                        requested.end,
                        total
                    );
                }
                clamped
            }
            None => Some(requested),
        }
    }

    async fn load_block(&self, block: u64) -> Result<(), EngineError> {
        loop {
            let action = {
                let mut state = self.state.lock().unwrap();
                if state.loaded.contains(&block) {
                    BlockAction::Ready
                } else if let Some(rx) = state.pending.get(&block) {
                    BlockAction::Wait(rx.clone())
                } else if let Some(failure) = state.failed.get(&block) {
                    if failure.last_attempt_at.elapsed() < self.backoff_window(failure.attempts) {
                        BlockAction::Fail(failure.error.clone())
                    } else {
                        let (tx, rx) = watch::channel(());
                        state.pending.insert(block, rx);
                        BlockAction::Fetch(tx)
                    }
                } else {
                    let (tx, rx) = watch::channel(());
                    state.pending.insert(block, rx);
                    BlockAction::Fetch(tx)
                }
            };

            match action {
                BlockAction::Ready => return Ok(()),
                BlockAction::Fail(error) => return Err(error),
                BlockAction::Wait(mut rx) => {
                    // Only the sender being dropped wakes us; re-check the
                    // block state afterwards.
                    let _ = rx.changed().await;
                    let mut state = self.state.lock().unwrap();
                    let abandoned = state
                        .pending
                        .get(&block)
                        .is_some_and(|pending_rx| pending_rx.has_changed().is_err());
                    if abandoned {
                        // The fetching task died without completing.
                        state.pending.remove(&block);
                        return Err(EngineError::adapter("block load was cancelled"));
                    }
                }
                BlockAction::Fetch(tx) => return self.fetch_block(block, tx).await,
            }
        }
    }

    /// Single in-flight fetch for `block`. Dropping `_tx` on any exit path
    /// wakes every waiter, which then re-reads the committed block state.
    async fn fetch_block(&self, block: u64, _tx: watch::Sender<()>) -> Result<(), EngineError> {
        let announced = self.block_event_range(block);
        self.events.emit(EngineEvent::LoadingStart { range: announced });

        let params = match self.params_for_block(block) {
            Ok(params) => params,
            Err(error) => {
                self.record_failure(block, announced, &error.to_string());
                return Err(error);
            }
        };

        let result = self.adapter.read(params).await;

        match result {
            Ok(response) => {
                let raw_len = response.items.len();
                let base = block as usize * self.block_size;
                let mut placed: Vec<T> = Vec::with_capacity(raw_len);

                let mut state = self.state.lock().unwrap();
                state.pending.remove(&block);

                if let Some(meta) = &response.meta {
                    if let Some(total) = meta.total {
                        Self::grow_total(&mut state, total as usize);
                    } else if meta.has_next == Some(false) {
                        Self::grow_total(&mut state, base + raw_len);
                    }
                    if let Some(cursor) = &meta.cursor {
                        state.cursors.insert(block + 1, cursor.clone());
                    }
                }

                for (position, raw) in response.items.into_iter().enumerate() {
                    let item = match &self.pipelines.normalize {
                        Some(normalize) => normalize(raw),
                        None => raw,
                    };
                    let item = match &self.pipelines.transform {
                        Some(transform) => match transform(item) {
                            Some(item) => item,
                            None => continue,
                        },
                        None => item,
                    };
                    if let Some(validate) = &self.pipelines.validate {
                        if !validate(&item) {
                            continue;
                        }
                    }
                    state.items.insert(base + position, item.clone());
                    placed.push(item);
                }

                state.failed.remove(&block);
                state.loaded.insert(block);
                let range = Self::loaded_event_range(&state, block, self.block_size);
                drop(state);

                self.events.emit(EngineEvent::RangeLoaded {
                    range,
                    items: placed,
                });
                self.events.emit(EngineEvent::LoadingEnd { range });
                Ok(())
            }
            Err(error) => {
                let error = EngineError::adapter(error.to_string());
                let (stored, attempts) = {
                    let mut state = self.state.lock().unwrap();
                    state.pending.remove(&block);
                    let entry = state.failed.entry(block).or_insert(FailedBlock {
                        error: error.clone(),
                        attempts: 0,
                        last_attempt_at: Instant::now(),
                    });
                    entry.error = error;
                    entry.attempts += 1;
                    entry.last_attempt_at = Instant::now();
                    (entry.error.clone(), entry.attempts)
                };

                log::warn!("block {block} failed (attempt {attempts}): {stored}");
                self.events.emit(EngineEvent::RangeFailed {
                    range: announced,
                    error: stored.to_string(),
                    attempts,
                });
                self.events.emit(EngineEvent::Error {
                    message: stored.to_string(),
                    context: format!("loading block {block}"),
                });
                self.events.emit(EngineEvent::LoadingEnd { range: announced });
                Err(stored)
            }
        }
    }

    fn record_failure(&self, block: u64, range: IndexRange, message: &str) {
        let attempts = {
            let mut state = self.state.lock().unwrap();
            state.pending.remove(&block);
            let entry = state.failed.entry(block).or_insert(FailedBlock {
                error: EngineError::adapter(message),
                attempts: 0,
                last_attempt_at: Instant::now(),
            });
            entry.error = EngineError::adapter(message);
            entry.attempts += 1;
            entry.last_attempt_at = Instant::now();
            entry.attempts
        };
        self.events.emit(EngineEvent::RangeFailed {
            range,
            error: message.to_string(),
            attempts,
        });
        self.events.emit(EngineEvent::LoadingEnd { range });
    }

    fn grow_total(state: &mut CollectionState<T>, reported: usize) {
        state.total = Some(state.total.map_or(reported, |known| known.max(reported)));
    }

    fn block_event_range(&self, block: u64) -> IndexRange {
        let full = range::block_range(block, self.block_size);
        let total = self.state.lock().unwrap().total;
        match total {
            Some(total) => full.clamp_to_total(total).unwrap_or(full),
            None => full,
        }
    }

    fn loaded_event_range(state: &CollectionState<T>, block: u64, block_size: usize) -> IndexRange {
        let full = range::block_range(block, block_size);
        match state.total {
            Some(total) => full.clamp_to_total(total).unwrap_or(full),
            None => full,
        }
    }

    fn params_for_block(&self, block: u64) -> Result<ReadParams, EngineError> {
        let limit = self.block_size as u32;
        let mut params = self.base_params.clone();
        match self.pagination {
            Pagination::Offset => {
                params.offset = Some(block * self.block_size as u64);
                params.limit = Some(limit);
            }
            Pagination::Page => {
                params.page = Some(block as u32 + 1);
                params.page_size = Some(limit);
            }
            Pagination::Cursor => {
                params.cursor = if block == 0 {
                    None
                } else {
                    let stored = self.state.lock().unwrap().cursors.get(&block).cloned();
                    match stored {
                        Some(cursor) => Some(cursor),
                        None => {
                            return Err(EngineError::adapter(format!(
                                "no cursor for block {block}; preceding blocks not loaded"
                            )))
                        }
                    }
                };
                params.limit = Some(limit);
            }
        }
        Ok(params)
    }

    /// Window for the n-th consecutive failure: `min(base * 2^(n-1), cap)`.
    fn backoff_window(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let shift = (attempts - 1).min(16);
        let window = self.backoff_base.saturating_mul(1u32 << shift);
        window.min(self.backoff_cap)
    }

    fn take_dense(state: &mut CollectionState<T>) -> Vec<T> {
        let mut dense = Vec::with_capacity(state.dense_len);
        for index in 0..state.dense_len {
            if let Some(item) = state.items.remove(&index) {
                dense.push(item);
            }
        }
        dense
    }

    fn put_dense(state: &mut CollectionState<T>, dense: Vec<T>) -> usize {
        let len = dense.len();
        state.reset_blocks();
        state.items = dense.into_iter().enumerate().collect();
        state.dense_len = len;
        state.total = Some(len);
        len
    }
}
