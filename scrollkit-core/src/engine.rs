use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::adapter::{DataAdapter, Pagination, ReadParams};
use crate::collection::{
    Collection, CollectionStats, NormalizeFn, Pipelines, Position, TransformFn, ValidateFn,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::{EngineEvent, EventBus};
use crate::item::HasId;
use crate::loader::{Loader, LoaderStats};
use crate::range::IndexRange;
use crate::viewport::{Alignment, RenderPlan, Viewport};

/// Builder for [`ListEngine`]. A data adapter is mandatory; everything
/// else has defaults.
pub struct ListEngineBuilder<T> {
    config: EngineConfig,
    pagination: Pagination,
    adapter: Option<Arc<dyn DataAdapter<T>>>,
    pipelines: Pipelines<T>,
    read_params: ReadParams,
}

impl<T> Default for ListEngineBuilder<T>
where
    T: HasId + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListEngineBuilder<T>
where
    T: HasId + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            pagination: Pagination::default(),
            adapter: None,
            pipelines: Pipelines::default(),
            read_params: ReadParams::default(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn DataAdapter<T>>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Query context (search, filters, sort) forwarded on every adapter
    /// read next to the pagination fields.
    pub fn read_params(mut self, params: ReadParams) -> Self {
        self.read_params = params;
        self
    }

    pub fn normalize(mut self, normalize: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.pipelines.normalize = Some(Arc::new(normalize) as NormalizeFn<T>);
        self
    }

    pub fn transform(mut self, transform: impl Fn(T) -> Option<T> + Send + Sync + 'static) -> Self {
        self.pipelines.transform = Some(Arc::new(transform) as TransformFn<T>);
        self
    }

    pub fn validate(mut self, validate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.pipelines.validate = Some(Arc::new(validate) as ValidateFn<T>);
        self
    }

    /// Validate the configuration and wire the three components together,
    /// in order: collection, loader, viewport.
    pub fn build(self) -> Result<ListEngine<T>, EngineError> {
        self.config.validate()?;
        let adapter = self
            .adapter
            .ok_or_else(|| EngineError::Config("a data adapter is required".into()))?;

        let events = Arc::new(EventBus::new());
        let collection = Arc::new(
            Collection::new(
                adapter,
                Arc::clone(&events),
                &self.config,
                self.pagination,
                self.pipelines,
            )
            .with_base_params(self.read_params),
        );
        let loader = Arc::new(Loader::new(
            Arc::clone(&collection),
            self.config.max_concurrent as usize,
            self.config.queue_capacity as usize,
            self.config.cancel_threshold as f64,
        ));
        let viewport = Arc::new(Mutex::new(Viewport::new(
            Arc::clone(&collection),
            Arc::clone(&loader),
            Arc::clone(&events),
            &self.config,
        )));

        let engine = ListEngine {
            config: self.config,
            events,
            collection,
            loader,
            viewport,
            destroyed: AtomicBool::new(false),
            pump: Mutex::new(None),
        };
        engine.start_pump();
        Ok(engine)
    }
}

/// The assembled virtual list engine.
///
/// A plain value: tests and embedders construct as many independent
/// instances as they like. All interaction goes through this facade; after
/// [`destroy`](Self::destroy) every call answers with
/// [`EngineError::Destroyed`].
pub struct ListEngine<T> {
    config: EngineConfig,
    events: Arc<EventBus<T>>,
    collection: Arc<Collection<T>>,
    loader: Arc<Loader<T>>,
    viewport: Arc<Mutex<Viewport<T>>>,
    destroyed: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T> ListEngine<T>
where
    T: HasId + Clone + Send + Sync + 'static,
{
    pub fn builder() -> ListEngineBuilder<T> {
        ListEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Report the container extent and emit the first render plan, which
    /// in turn schedules the initial loads.
    pub fn initialize(&self, container_size: f64) -> Result<(), EngineError> {
        self.set_container_size(container_size)
    }

    pub fn subscribe(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<EngineEvent<T>>, EngineError> {
        self.ensure_alive()?;
        Ok(self.events.subscribe())
    }

    pub fn set_container_size(&self, size: f64) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.viewport.lock().unwrap().set_container_size(size);
        Ok(())
    }

    pub fn set_scroll_position(&self, position: f64) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.viewport
            .lock()
            .unwrap()
            .set_scroll_position(position, Instant::now());
        Ok(())
    }

    pub fn scroll_by(&self, delta: f64) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.viewport
            .lock()
            .unwrap()
            .scroll_by(delta, Instant::now());
        Ok(())
    }

    pub fn scroll_to_index(
        &self,
        index: usize,
        alignment: Alignment,
        animated: bool,
    ) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.viewport
            .lock()
            .unwrap()
            .scroll_to_index(index, alignment, animated, Instant::now())
    }

    pub fn scroll_to_page(
        &self,
        page: u32,
        alignment: Alignment,
        animated: bool,
    ) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.viewport
            .lock()
            .unwrap()
            .scroll_to_page(page, alignment, animated, Instant::now())
    }

    pub fn scroll_to_item(
        &self,
        id: &str,
        alignment: Alignment,
        animated: bool,
    ) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.viewport
            .lock()
            .unwrap()
            .scroll_to_item(id, alignment, animated, Instant::now())
    }

    pub fn measure_item(&self, index: usize, size: f64) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.viewport.lock().unwrap().measure_item(index, size);
        Ok(())
    }

    pub fn item_size(&self, index: usize) -> Result<f64, EngineError> {
        self.ensure_alive()?;
        Ok(self.viewport.lock().unwrap().size_of(index))
    }

    pub fn item_offset(&self, index: usize) -> Result<f64, EngineError> {
        self.ensure_alive()?;
        Ok(self.viewport.lock().unwrap().offset_of(index))
    }

    pub fn visible_range(&self) -> Result<Option<IndexRange>, EngineError> {
        self.ensure_alive()?;
        Ok(self.viewport.lock().unwrap().visible_range())
    }

    pub fn strict_visible_range(&self) -> Result<Option<IndexRange>, EngineError> {
        self.ensure_alive()?;
        Ok(self.viewport.lock().unwrap().strict_visible_range())
    }

    pub fn render_plan(&self) -> Result<RenderPlan, EngineError> {
        self.ensure_alive()?;
        Ok(self.viewport.lock().unwrap().render_plan())
    }

    pub fn scroll_position(&self) -> Result<f64, EngineError> {
        self.ensure_alive()?;
        Ok(self.viewport.lock().unwrap().scroll_position())
    }

    pub fn total_virtual_size(&self) -> Result<f64, EngineError> {
        self.ensure_alive()?;
        Ok(self.viewport.lock().unwrap().total_virtual_size())
    }

    pub async fn load_range(&self, range: IndexRange) -> Result<Vec<T>, EngineError> {
        self.ensure_alive()?;
        self.collection.load_range(range).await
    }

    pub async fn retry_failed(&self, block_id: u64) -> Result<Vec<T>, EngineError> {
        self.ensure_alive()?;
        self.collection.retry_failed(block_id).await
    }

    pub fn get_item(&self, index: usize) -> Result<Option<T>, EngineError> {
        self.ensure_alive()?;
        Ok(self.collection.get_item(index))
    }

    pub fn get_total(&self) -> Result<Option<usize>, EngineError> {
        self.ensure_alive()?;
        Ok(self.collection.get_total())
    }

    pub fn has_more(&self) -> Result<bool, EngineError> {
        self.ensure_alive()?;
        Ok(self.collection.has_more())
    }

    pub fn set_items(&self, items: Vec<T>) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.collection.set_items(items);
        Ok(())
    }

    pub fn add_items(&self, items: Vec<T>, position: Position) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.collection.add_items(items, position);
        Ok(())
    }

    pub fn update_items(&self, items: Vec<T>) -> Result<usize, EngineError> {
        self.ensure_alive()?;
        Ok(self.collection.update_items(items))
    }

    pub fn remove_items(&self, ids: &[String]) -> Result<usize, EngineError> {
        self.ensure_alive()?;
        Ok(self.collection.remove_items(ids))
    }

    pub fn clear(&self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.collection.clear();
        Ok(())
    }

    pub fn refresh(&self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.collection.refresh();
        Ok(())
    }

    pub fn cancel_all_loads(&self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.loader.cancel_all();
        Ok(())
    }

    pub fn collection_stats(&self) -> Result<CollectionStats, EngineError> {
        self.ensure_alive()?;
        Ok(self.collection.stats())
    }

    pub fn loader_stats(&self) -> Result<LoaderStats, EngineError> {
        self.ensure_alive()?;
        Ok(self.loader.stats())
    }

    /// Tear down in reverse construction order: stop scheduling, stop the
    /// event pump, drop every subscriber. Idempotent; any later call on
    /// the engine answers `Destroyed`.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.loader.cancel_all();
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
        self.events.close();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.is_destroyed() {
            return Err(EngineError::Destroyed);
        }
        Ok(())
    }

    /// React to collection-side changes by re-emitting the render plan.
    fn start_pump(&self) {
        let mut rx = self.events.subscribe();
        let viewport = Arc::clone(&self.viewport);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    EngineEvent::RangeLoaded { .. } | EngineEvent::ItemsSet { .. } => {
                        viewport.lock().unwrap().refresh_view();
                    }
                    _ => {}
                }
            }
        });
        *self.pump.lock().unwrap() = Some(handle);
    }
}

impl<T> Drop for ListEngine<T> {
    fn drop(&mut self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
    }
}
