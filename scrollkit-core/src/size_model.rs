use std::collections::{BTreeMap, HashMap};

/// Primary-axis size bookkeeping for the viewport.
///
/// Every item defaults to the configured estimate; reported measurements
/// override it. Offsets are prefix sums over that model. Instead of a dense
/// aggregate over all indices, measured overrides are tracked as deltas
/// against the uniform estimate:
///
/// `offset_of(i) = i * estimated + sum of (measured[j] - estimated), j < i`
///
/// The measured set is LRU-bounded (`cap`), so offset and lookup queries
/// walk at most `cap` deltas regardless of the collection size.
#[derive(Debug)]
pub struct SizeModel {
    estimated: f64,
    cap: usize,
    measured: HashMap<usize, f64>,
    /// LRU order, oldest first.
    access_order: Vec<usize>,
    /// measured size minus estimate, keyed by index, ascending.
    deltas: BTreeMap<usize, f64>,
    evictions: u64,
}

impl SizeModel {
    pub fn new(estimated: f64, cap: usize) -> Self {
        debug_assert!(estimated > 0.0);
        Self {
            estimated: if estimated > 0.0 { estimated } else { 1.0 },
            cap: cap.max(1),
            measured: HashMap::new(),
            access_order: Vec::new(),
            deltas: BTreeMap::new(),
            evictions: 0,
        }
    }

    pub fn estimated(&self) -> f64 {
        self.estimated
    }

    /// Measured size if present, estimate otherwise. Always positive.
    pub fn size_of(&self, index: usize) -> f64 {
        self.measured
            .get(&index)
            .copied()
            .unwrap_or(self.estimated)
    }

    pub fn is_measured(&self, index: usize) -> bool {
        self.measured.contains_key(&index)
    }

    pub fn measured_len(&self) -> usize {
        self.measured.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Record a measured size, evicting the least recently measured entry
    /// once the cap is reached. Non-positive sizes are an internal bug;
    /// they are clamped to the estimate in release builds.
    pub fn measure(&mut self, index: usize, size: f64) {
        debug_assert!(size > 0.0 && size.is_finite(), "item size must be positive");
        let size = if size > 0.0 && size.is_finite() {
            size
        } else {
            self.estimated
        };

        if self.measured.contains_key(&index) {
            if let Some(pos) = self.access_order.iter().position(|i| *i == index) {
                self.access_order.remove(pos);
            }
        } else if self.measured.len() >= self.cap {
            let oldest = self.access_order.remove(0);
            self.measured.remove(&oldest);
            self.deltas.remove(&oldest);
            self.evictions += 1;
        }

        self.measured.insert(index, size);
        self.access_order.push(index);

        let delta = size - self.estimated;
        if delta == 0.0 {
            self.deltas.remove(&index);
        } else {
            self.deltas.insert(index, delta);
        }
    }

    /// Start offset of an item: sum of all sizes before it.
    pub fn offset_of(&self, index: usize) -> f64 {
        let mut offset = index as f64 * self.estimated;
        for delta in self.deltas.range(..index).map(|(_, d)| d) {
            offset += delta;
        }
        offset.max(0.0)
    }

    /// Exact total extent of `total` items.
    pub fn total_size(&self, total: usize) -> f64 {
        let mut size = total as f64 * self.estimated;
        for delta in self.deltas.range(..total).map(|(_, d)| d) {
            size += delta;
        }
        size.max(0.0)
    }

    /// Largest index whose offset is at or below `target`, clamped to
    /// `[0, total - 1]`. At an exact item boundary this returns the item
    /// that starts there, not the one that ends there.
    pub fn index_at_offset(&self, target: f64, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        let target = target.max(0.0);

        // Offsets are uniform-linear between measured indices; walk the
        // measured deltas in order until the segment containing `target`.
        let mut cum_delta = 0.0;
        for (&measured_index, &delta) in self.deltas.range(..total) {
            let start = measured_index as f64 * self.estimated + cum_delta;
            if start > target {
                let index = ((target - cum_delta) / self.estimated).floor() as usize;
                return index.min(total - 1);
            }
            let end = start + self.estimated + delta;
            if end > target {
                return measured_index.min(total - 1);
            }
            cum_delta += delta;
        }

        let index = ((target - cum_delta) / self.estimated).floor() as usize;
        index.min(total - 1)
    }

    pub fn clear(&mut self) {
        self.measured.clear();
        self.access_order.clear();
        self.deltas.clear();
    }
}
