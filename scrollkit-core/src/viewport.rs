use std::sync::Arc;

use tokio::time::Instant;

use crate::collection::Collection;
use crate::config::{EngineConfig, Orientation};
use crate::error::EngineError;
use crate::event::{EngineEvent, EventBus};
use crate::item::HasId;
use crate::loader::{Loader, Priority};
use crate::range::{self, IndexRange};
use crate::size_model::SizeModel;
use crate::velocity::{ScrollDirection, VelocityTracker};

/// Largest primary-axis extent exposed to a renderer. Above this the
/// physical scroll range is ratio-mapped onto the true virtual size.
pub const MAX_VIRTUAL_SIZE: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Start,
    Center,
    End,
}

/// Logical render plan: which indices to draw and where. Entries whose
/// item is not loaded yet are placeholders; the renderer decides their
/// visual.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub visible_range: Option<IndexRange>,
    pub positions: Vec<(usize, f64)>,
    pub scroll_position: f64,
}

/// Maps scroll offsets to index ranges and back.
///
/// Exclusively owns scroll position and size measurements. Reads items
/// through the collection's getter, schedules missing data through the
/// loader, and reports everything upward as events.
pub struct Viewport<T> {
    collection: Arc<Collection<T>>,
    loader: Arc<Loader<T>>,
    events: Arc<EventBus<T>>,
    sizes: SizeModel,
    velocity: VelocityTracker,
    scroll_position: f64,
    container_size: f64,
    overscan: usize,
    page_size: usize,
    orientation: Orientation,
}

impl<T> Viewport<T>
where
    T: HasId + Clone + Send + Sync + 'static,
{
    pub fn new(
        collection: Arc<Collection<T>>,
        loader: Arc<Loader<T>>,
        events: Arc<EventBus<T>>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            collection,
            loader,
            events,
            sizes: SizeModel::new(
                config.estimated_item_size as f64,
                config.measurement_cache_cap as usize,
            ),
            velocity: VelocityTracker::new(),
            scroll_position: 0.0,
            container_size: 0.0,
            overscan: config.overscan as usize,
            page_size: config.page_size as usize,
            orientation: config.orientation,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn scroll_position(&self) -> f64 {
        self.scroll_position
    }

    pub fn container_size(&self) -> f64 {
        self.container_size
    }

    pub fn size_of(&self, index: usize) -> f64 {
        self.sizes.size_of(index)
    }

    pub fn offset_of(&self, index: usize) -> f64 {
        self.sizes.offset_of(index)
    }

    pub fn measured_len(&self) -> usize {
        self.sizes.measured_len()
    }

    /// Virtual extent exposed to the renderer: the true total size, clamped
    /// to the platform maximum. Zero while the total is unknown.
    pub fn total_virtual_size(&self) -> f64 {
        self.virtual_total_size().unwrap_or(0.0)
    }

    /// A zero container pauses all emissions until a real size arrives.
    pub fn set_container_size(&mut self, size: f64) {
        self.container_size = size.max(0.0);
        if self.container_size > 0.0 {
            self.scroll_position = self.scroll_position.min(self.max_scroll());
            self.refresh_view();
        }
    }

    /// Process one scroll sample: clamp, track velocity, emit, re-plan.
    pub fn set_scroll_position(&mut self, position: f64, at: Instant) {
        let clamped = position.clamp(0.0, self.max_scroll());
        if clamped != position {
            log::debug!("scroll position {position} clamped to {clamped}");
        }

        let sample = self.velocity.sample(clamped, at);
        self.scroll_position = clamped;

        self.events.emit(EngineEvent::ScrollPositionChanged {
            position: clamped,
            direction: sample.direction,
        });
        self.events.emit(EngineEvent::SpeedChanged {
            velocity: sample.velocity,
            direction: sample.direction,
        });
        self.loader.update_velocity(sample.velocity, sample.direction);

        self.refresh_view();
    }

    pub fn scroll_by(&mut self, delta: f64, at: Instant) {
        self.set_scroll_position(self.scroll_position + delta, at);
    }

    /// Record a measured item size reported by the renderer.
    pub fn measure_item(&mut self, index: usize, size: f64) {
        self.sizes.measure(index, size);
        self.scroll_position = self.scroll_position.min(self.max_scroll());
        self.refresh_view();
    }

    /// Bring `index` into view with the given alignment. Out-of-bounds
    /// targets are clamped silently.
    pub fn scroll_to_index(
        &mut self,
        index: usize,
        alignment: Alignment,
        animated: bool,
        at: Instant,
    ) -> Result<(), EngineError> {
        let total = self.collection.get_total();
        if total == Some(0) {
            return Ok(());
        }
        let index = match total {
            Some(total) if index >= total => {
                log::warn!("scroll_to_index {index} beyond total {total}; clamped");
                total - 1
            }
            _ => index,
        };

        let item_size = self.sizes.size_of(index);
        let item_offset = self.sizes.offset_of(index);
        let target_virtual = match alignment {
            Alignment::Start => item_offset,
            Alignment::Center => item_offset - (self.container_size - item_size) / 2.0,
            Alignment::End => item_offset - self.container_size + item_size,
        }
        .max(0.0);
        let target_physical = self.from_virtual(target_virtual).clamp(0.0, self.max_scroll());

        // Data for the landing window is requested before the position
        // moves, at visible priority.
        let total_hint = total.unwrap_or(usize::MAX);
        let first = self.sizes.index_at_offset(target_virtual, total_hint);
        let last = self
            .sizes
            .index_at_offset(target_virtual + self.container_size, total_hint);
        for block in self
            .collection
            .unloaded_blocks(IndexRange::new(first, last.max(first)))
        {
            self.loader
                .request(range::block_range(block, self.collection.block_size()), Priority::High);
        }

        self.events.emit(EngineEvent::ScrollTo {
            position: target_physical,
            animated,
        });

        let direction = if target_physical >= self.scroll_position {
            ScrollDirection::Forward
        } else {
            ScrollDirection::Backward
        };
        self.scroll_position = target_physical;
        // A programmatic jump must not read as scroll velocity.
        self.velocity.rebase(target_physical, at);
        self.events.emit(EngineEvent::ScrollPositionChanged {
            position: target_physical,
            direction,
        });

        self.refresh_view();
        Ok(())
    }

    pub fn scroll_to_page(
        &mut self,
        page: u32,
        alignment: Alignment,
        animated: bool,
        at: Instant,
    ) -> Result<(), EngineError> {
        let index = page.saturating_sub(1) as usize * self.page_size;
        self.scroll_to_index(index, alignment, animated, at)
    }

    /// Resolve `id` against loaded items; fails when the item is not in
    /// the sparse store (callers may preload and retry).
    pub fn scroll_to_item(
        &mut self,
        id: &str,
        alignment: Alignment,
        animated: bool,
        at: Instant,
    ) -> Result<(), EngineError> {
        let index = self
            .collection
            .find_index_by_id(id)
            .ok_or_else(|| EngineError::ItemNotLoaded { id: id.to_string() })?;
        self.scroll_to_index(index, alignment, animated, at)
    }

    /// Visible indices plus overscan. `None` when the collection is known
    /// to be empty.
    pub fn visible_range(&self) -> Option<IndexRange> {
        let (first, last) = self.window_indices()?;
        let total = self.collection.get_total();
        let start = first.saturating_sub(self.overscan);
        let mut end = last.saturating_add(self.overscan);
        if let Some(total) = total {
            end = end.min(total - 1);
        }
        Some(IndexRange::new(start, end.max(start)))
    }

    /// Visible indices without overscan.
    pub fn strict_visible_range(&self) -> Option<IndexRange> {
        let (first, last) = self.window_indices()?;
        Some(IndexRange::new(first, last.max(first)))
    }

    pub fn render_plan(&self) -> RenderPlan {
        let visible = self.visible_range();
        let mut positions = Vec::new();
        if let Some(range) = visible {
            let virtual_origin = self.to_virtual(self.scroll_position);
            for index in range.iter() {
                let physical =
                    self.sizes.offset_of(index) - virtual_origin + self.scroll_position;
                positions.push((index, physical));
            }
        }
        RenderPlan {
            visible_range: visible,
            positions,
            scroll_position: self.scroll_position,
        }
    }

    /// Re-emit the render plan and request whatever visible data is
    /// missing. No-op while the container has no extent.
    pub fn refresh_view(&mut self) {
        if self.container_size <= 0.0 {
            return;
        }

        let plan = self.render_plan();
        self.events.emit(EngineEvent::ViewportChanged {
            visible_range: plan.visible_range,
            positions: plan.positions,
            scroll_position: plan.scroll_position,
        });
        self.request_missing();
    }

    fn request_missing(&self) {
        let Some(visible) = self.visible_range() else {
            return;
        };
        let strict = self.strict_visible_range();
        for block in self.collection.unloaded_blocks(visible) {
            let block_range = range::block_range(block, self.collection.block_size());
            let priority = match strict {
                Some(strict) if block_range.intersects(&strict) => Priority::High,
                _ => Priority::Normal,
            };
            self.loader.request(block_range, priority);
        }
    }

    /// First and last strictly visible indices, or `None` when there is
    /// nothing to show. An item starting exactly at the bottom edge is not
    /// visible.
    fn window_indices(&self) -> Option<(usize, usize)> {
        if self.container_size <= 0.0 {
            return None;
        }
        let total = self.collection.get_total();
        if total == Some(0) {
            return None;
        }
        let total_hint = total.unwrap_or(usize::MAX);

        let virtual_origin = self.to_virtual(self.scroll_position);
        let first = self.sizes.index_at_offset(virtual_origin, total_hint);
        let bottom = virtual_origin + self.container_size;
        let mut last = self.sizes.index_at_offset(bottom, total_hint);
        if last > first && self.sizes.offset_of(last) >= bottom {
            last -= 1;
        }
        Some((first, last))
    }

    fn true_total_size(&self) -> Option<f64> {
        self.collection
            .get_total()
            .map(|total| self.sizes.total_size(total))
    }

    fn virtual_total_size(&self) -> Option<f64> {
        self.true_total_size().map(|size| size.min(MAX_VIRTUAL_SIZE))
    }

    fn max_scroll(&self) -> f64 {
        match self.virtual_total_size() {
            Some(size) => (size - self.container_size).max(0.0),
            // Total still provisional: leave scrolling unclamped.
            None => f64::INFINITY,
        }
    }

    /// Physical scroll offset -> virtual offset. Identity until the true
    /// size exceeds the renderer maximum, ratio-mapped beyond it.
    fn to_virtual(&self, physical: f64) -> f64 {
        match self.true_total_size() {
            Some(true_size) if true_size > MAX_VIRTUAL_SIZE => {
                let physical_span = (MAX_VIRTUAL_SIZE - self.container_size).max(1.0);
                let virtual_span = (true_size - self.container_size).max(0.0);
                physical / physical_span * virtual_span
            }
            _ => physical,
        }
    }

    fn from_virtual(&self, virtual_offset: f64) -> f64 {
        match self.true_total_size() {
            Some(true_size) if true_size > MAX_VIRTUAL_SIZE => {
                let physical_span = (MAX_VIRTUAL_SIZE - self.container_size).max(1.0);
                let virtual_span = (true_size - self.container_size).max(1.0);
                virtual_offset / virtual_span * physical_span
            }
            _ => virtual_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Pagination;
    use crate::collection::Pipelines;
    use crate::test_support::{ScriptedAdapter, TestRow};

    fn setup(total: usize) -> (Arc<ScriptedAdapter>, Arc<Collection<TestRow>>, Viewport<TestRow>) {
        let adapter = Arc::new(ScriptedAdapter::new(total));
        let events = Arc::new(EventBus::new());
        let collection = Arc::new(Collection::new(
            adapter.clone(),
            events.clone(),
            &EngineConfig::default(),
            Pagination::Offset,
            Pipelines::default(),
        ));
        let loader = Arc::new(Loader::new(collection.clone(), 1, 50, 1.0));
        let viewport = Viewport::new(collection.clone(), loader, events, &EngineConfig::default());
        (adapter, collection, viewport)
    }

    #[tokio::test]
    async fn test_visible_range_with_overscan() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        // 400 px / 50 px = items 0..=7 visible, plus 5 overscan.
        assert_eq!(viewport.strict_visible_range(), Some(IndexRange::new(0, 7)));
        assert_eq!(viewport.visible_range(), Some(IndexRange::new(0, 12)));

        viewport.set_scroll_position(500.0, Instant::now());
        assert_eq!(
            viewport.strict_visible_range(),
            Some(IndexRange::new(10, 17))
        );
        assert_eq!(viewport.visible_range(), Some(IndexRange::new(5, 22)));
    }

    #[tokio::test]
    async fn test_item_starting_at_bottom_edge_is_not_visible() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        // Item 8 starts exactly at 400: outside the window.
        assert_eq!(viewport.strict_visible_range(), Some(IndexRange::new(0, 7)));

        // At scroll 50 the window is [50, 450): items 1..=8.
        viewport.set_scroll_position(50.0, Instant::now());
        assert_eq!(viewport.strict_visible_range(), Some(IndexRange::new(1, 8)));
    }

    #[tokio::test]
    async fn test_visible_range_clamps_to_total() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);
        viewport.set_scroll_position(1_000_000.0, Instant::now());

        // Clamped to max scroll 4600: items 92..=99.
        assert_eq!(viewport.scroll_position(), 4600.0);
        assert_eq!(
            viewport.strict_visible_range(),
            Some(IndexRange::new(92, 99))
        );
        assert_eq!(viewport.visible_range(), Some(IndexRange::new(87, 99)));
    }

    #[tokio::test]
    async fn test_empty_collection_has_empty_plan() {
        let (_, collection, mut viewport) = setup(0);
        collection.set_items(Vec::new());
        viewport.set_container_size(400.0);

        assert_eq!(viewport.visible_range(), None);
        assert_eq!(viewport.total_virtual_size(), 0.0);
        let plan = viewport.render_plan();
        assert!(plan.positions.is_empty());
        assert!(plan.visible_range.is_none());
    }

    #[tokio::test]
    async fn test_zero_container_pauses_emissions() {
        let adapter = Arc::new(ScriptedAdapter::new(100));
        let events = Arc::new(EventBus::new());
        let collection = Arc::new(Collection::new(
            adapter,
            events.clone(),
            &EngineConfig::default(),
            Pagination::Offset,
            Pipelines::default(),
        ));
        let loader = Arc::new(Loader::new(collection.clone(), 1, 50, 1.0));
        let mut viewport =
            Viewport::new(collection, loader, events.clone(), &EngineConfig::default());
        let mut rx = events.subscribe();

        viewport.set_container_size(0.0);
        viewport.refresh_view();
        assert!(rx.try_recv().is_err(), "no emissions while size is zero");

        viewport.set_container_size(400.0);
        assert!(
            matches!(rx.try_recv(), Ok(EngineEvent::ViewportChanged { .. })),
            "emissions resume with a real size"
        );
    }

    #[tokio::test]
    async fn test_render_plan_positions() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        let plan = viewport.render_plan();
        assert_eq!(plan.visible_range, Some(IndexRange::new(0, 12)));
        assert_eq!(plan.positions.len(), 13);
        assert_eq!(plan.positions[0], (0, 0.0));
        assert_eq!(plan.positions[1], (1, 50.0));
        assert_eq!(plan.positions[12], (12, 600.0));
    }

    #[tokio::test]
    async fn test_measured_sizes_shift_the_plan() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);
        viewport.measure_item(0, 120.0);

        let plan = viewport.render_plan();
        assert_eq!(plan.positions[0], (0, 0.0));
        assert_eq!(plan.positions[1], (1, 120.0));
        assert_eq!(plan.positions[2], (2, 170.0));

        // Fewer items fit once the first one grew.
        assert_eq!(viewport.strict_visible_range(), Some(IndexRange::new(0, 6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_to_index_alignments() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        viewport
            .scroll_to_index(20, Alignment::Start, false, Instant::now())
            .unwrap();
        assert_eq!(viewport.scroll_position(), 1000.0);
        assert_eq!(
            viewport.strict_visible_range().unwrap().start,
            20,
            "start alignment lands on the index"
        );

        viewport
            .scroll_to_index(20, Alignment::Center, false, Instant::now())
            .unwrap();
        assert_eq!(viewport.scroll_position(), 825.0);

        viewport
            .scroll_to_index(20, Alignment::End, false, Instant::now())
            .unwrap();
        assert_eq!(viewport.scroll_position(), 650.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_to_index_clamps_out_of_bounds() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        viewport
            .scroll_to_index(10_000, Alignment::Start, false, Instant::now())
            .unwrap();
        // Clamped to the last item, then to max scroll.
        assert_eq!(viewport.scroll_position(), 4600.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_to_page_maps_to_first_index() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        viewport
            .scroll_to_page(3, Alignment::Start, false, Instant::now())
            .unwrap();
        // Page 3 starts at index 40.
        assert_eq!(viewport.scroll_position(), 2000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_to_item_requires_loaded_id() {
        let (_, collection, mut viewport) = setup(100);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        viewport
            .scroll_to_item("row-10", Alignment::Start, false, Instant::now())
            .unwrap();
        assert_eq!(viewport.scroll_position(), 500.0);

        let error = viewport
            .scroll_to_item("row-90", Alignment::Start, false, Instant::now())
            .unwrap_err();
        assert_eq!(
            error,
            EngineError::ItemNotLoaded {
                id: "row-90".into()
            }
        );
    }

    #[tokio::test]
    async fn test_ratio_mapping_above_renderer_max() {
        let (_, collection, mut viewport) = setup(400_000);
        collection.load_range(IndexRange::new(0, 19)).await.unwrap();
        viewport.set_container_size(400.0);

        // True size 20M px exceeds the 10M max: scrolling is ratio-mapped.
        assert_eq!(viewport.total_virtual_size(), MAX_VIRTUAL_SIZE);
        let max_scroll = MAX_VIRTUAL_SIZE - 400.0;

        viewport.set_scroll_position(max_scroll, Instant::now());
        let range = viewport.strict_visible_range().unwrap();
        assert_eq!(range.end, 399_999, "end of physical range reaches the tail");

        viewport.set_scroll_position(max_scroll / 2.0, Instant::now());
        let range = viewport.strict_visible_range().unwrap();
        let expected_mid = 200_000;
        assert!(
            (range.start as i64 - expected_mid).abs() < 16,
            "midpoint maps near the middle item, got {}",
            range.start
        );
    }

    #[tokio::test]
    async fn test_velocity_emitted_per_sample() {
        let adapter = Arc::new(ScriptedAdapter::new(100));
        let events = Arc::new(EventBus::new());
        let collection = Arc::new(Collection::new(
            adapter,
            events.clone(),
            &EngineConfig::default(),
            Pagination::Offset,
            Pipelines::default(),
        ));
        collection.set_items(crate::test_support::rows(0..100));
        let loader = Arc::new(Loader::new(collection.clone(), 1, 50, 1.0));
        let mut viewport =
            Viewport::new(collection, loader, events.clone(), &EngineConfig::default());
        let mut rx = events.subscribe();
        viewport.set_container_size(400.0);

        let start = Instant::now();
        viewport.set_scroll_position(0.0, start);
        viewport.set_scroll_position(200.0, start + tokio::time::Duration::from_millis(100));

        let mut speed_events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::SpeedChanged {
                velocity,
                direction,
            } = event
            {
                speed_events.push((velocity, direction));
            }
        }
        assert_eq!(speed_events.len(), 2);
        assert_eq!(speed_events[0].0, 0.0);
        // 200 px / 100 ms = 2 px/ms instantaneous, smoothed by 0.15.
        assert!((speed_events[1].0 - 0.3).abs() < 1e-9);
        assert_eq!(speed_events[1].1, ScrollDirection::Forward);
    }
}
