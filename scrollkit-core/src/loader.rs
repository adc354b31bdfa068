use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::collection::Collection;
use crate::item::HasId;
use crate::range::{self, IndexRange};
use crate::velocity::ScrollDirection;

/// Scheduling priority of a range request. `High` is reserved for ranges
/// intersecting the strictly visible window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone)]
struct QueuedRequest {
    block: u64,
    priority: Priority,
    #[allow(dead_code)]
    enqueued_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct LoaderStats {
    pub active: usize,
    pub queued: usize,
    pub cancelled: u64,
    pub overflowed: u64,
    pub velocity: f64,
}

struct LoaderState {
    active: HashMap<u64, Priority>,
    queue: VecDeque<QueuedRequest>,
    velocity: f64,
    cancelled: u64,
    overflowed: u64,
}

/// Velocity-aware scheduler between the viewport and the collection.
///
/// Admits block loads while scrolling is slow, drops them outright while it
/// is fast, and keeps at most `max_concurrent` adapter reads in flight.
/// Holds only request state and a load capability; item and block state
/// stay with the collection.
pub struct Loader<T> {
    collection: Arc<Collection<T>>,
    max_concurrent: usize,
    queue_capacity: usize,
    cancel_threshold: f64,
    block_size: usize,
    state: Mutex<LoaderState>,
}

impl<T> Loader<T>
where
    T: HasId + Clone + Send + Sync + 'static,
{
    pub fn new(
        collection: Arc<Collection<T>>,
        max_concurrent: usize,
        queue_capacity: usize,
        cancel_threshold: f64,
    ) -> Self {
        let block_size = collection.block_size();
        Self {
            collection,
            max_concurrent: max_concurrent.max(1),
            queue_capacity: queue_capacity.max(1),
            cancel_threshold,
            block_size,
            state: Mutex::new(LoaderState {
                active: HashMap::new(),
                queue: VecDeque::new(),
                velocity: 0.0,
                cancelled: 0,
                overflowed: 0,
            }),
        }
    }

    /// Admit a range-load request. Already-active and already-queued blocks
    /// are deduplicated (re-requests may only raise priority), fast
    /// scrolling drops the request, a free slot starts it, otherwise it is
    /// queued with the oldest entry evicted on overflow.
    pub fn request(self: &Arc<Self>, requested: IndexRange, priority: Priority) {
        for block in range::blocks_covering(requested, self.block_size) {
            self.request_block(block, priority);
        }
    }

    fn request_block(self: &Arc<Self>, block: u64, priority: Priority) {
        let started = {
            let mut state = self.state.lock().unwrap();

            if let Some(active_priority) = state.active.get_mut(&block) {
                if *active_priority < priority {
                    *active_priority = priority;
                }
                return;
            }

            if state.velocity > self.cancel_threshold {
                state.cancelled += 1;
                log::debug!(
                    "dropping block {block}: velocity {:.2} above threshold",
                    state.velocity
                );
                return;
            }

            if let Some(queued) = state.queue.iter_mut().find(|queued| queued.block == block) {
                if queued.priority < priority {
                    queued.priority = priority;
                }
                return;
            }

            if state.active.len() < self.max_concurrent {
                state.active.insert(block, priority);
                true
            } else {
                if state.queue.len() >= self.queue_capacity {
                    state.queue.pop_front();
                    state.overflowed += 1;
                }
                state.queue.push_back(QueuedRequest {
                    block,
                    priority,
                    enqueued_at: Instant::now(),
                });
                false
            }
        };

        if started {
            self.spawn_load(block);
        }
    }

    /// Velocity feed from the viewport. Crossing the threshold downwards
    /// drains queued requests into the free slots.
    pub fn update_velocity(self: &Arc<Self>, velocity: f64, _direction: ScrollDirection) {
        let to_start = {
            let mut state = self.state.lock().unwrap();
            let crossed_down =
                state.velocity > self.cancel_threshold && velocity <= self.cancel_threshold;
            state.velocity = velocity;
            if crossed_down {
                self.drain_locked(&mut state)
            } else {
                Vec::new()
            }
        };
        for block in to_start {
            self.spawn_load(block);
        }
    }

    /// Drop everything still queued. Active requests run to completion;
    /// their results land in the collection cache either way.
    pub fn cancel_all(&self) {
        self.state.lock().unwrap().queue.clear();
    }

    pub fn is_active(&self, block: u64) -> bool {
        self.state.lock().unwrap().active.contains_key(&block)
    }

    pub fn stats(&self) -> LoaderStats {
        let state = self.state.lock().unwrap();
        LoaderStats {
            active: state.active.len(),
            queued: state.queue.len(),
            cancelled: state.cancelled,
            overflowed: state.overflowed,
            velocity: state.velocity,
        }
    }

    fn spawn_load(self: &Arc<Self>, block: u64) {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let requested = range::block_range(block, loader.block_size);
            if let Err(error) = loader.collection.load_range(requested).await {
                log::debug!("block {block} load ended with error: {error}");
            }
            loader.complete(block);
        });
    }

    fn complete(self: &Arc<Self>, block: u64) {
        let to_start = {
            let mut state = self.state.lock().unwrap();
            state.active.remove(&block);
            self.drain_locked(&mut state)
        };
        for next in to_start {
            self.spawn_load(next);
        }
    }

    /// Move queued requests into free active slots: priority first, FIFO
    /// within a priority. Returns the blocks to start. Queued work stays
    /// parked while the velocity is above the threshold.
    fn drain_locked(&self, state: &mut LoaderState) -> Vec<u64> {
        if state.velocity > self.cancel_threshold {
            return Vec::new();
        }
        let mut started = Vec::new();
        while state.active.len() < self.max_concurrent {
            let next = state
                .queue
                .iter()
                .enumerate()
                .max_by(|(a_pos, a), (b_pos, b)| {
                    a.priority
                        .cmp(&b.priority)
                        .then(b_pos.cmp(a_pos))
                })
                .map(|(pos, _)| pos);
            let Some(pos) = next else { break };
            let request = state.queue.remove(pos).unwrap();
            state.active.insert(request.block, request.priority);
            started.push(request.block);
        }
        started
    }
}
