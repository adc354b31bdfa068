use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scrollkit_core::{
    Collection, EngineConfig, EventBus, HasId, InMemoryAdapter, Loader, Pagination, Pipelines,
    SizeModel, VelocityTracker, Viewport,
};

#[derive(Debug, Clone)]
struct BenchRow {
    id: String,
}

impl HasId for BenchRow {
    fn id(&self) -> &str {
        &self.id
    }
}

fn bench_rows(count: usize) -> Vec<BenchRow> {
    (0..count)
        .map(|n| BenchRow {
            id: format!("row-{n}"),
        })
        .collect()
}

fn viewport_fixture(count: usize) -> Viewport<BenchRow> {
    let events = Arc::new(EventBus::new());
    let collection = Arc::new(Collection::new(
        Arc::new(InMemoryAdapter::new(bench_rows(count))),
        events.clone(),
        &EngineConfig::default(),
        Pagination::Offset,
        Pipelines::default(),
    ));
    collection.set_items(bench_rows(count));
    let loader = Arc::new(Loader::new(collection.clone(), 1, 50, 1.0));
    let mut viewport = Viewport::new(collection, loader, events, &EngineConfig::default());
    for index in 0..500 {
        viewport.measure_item(index * 7, 30.0 + (index % 90) as f64);
    }
    viewport
}

/// Benchmark prefix-sum offsets with a full measurement cache
fn bench_size_model_offsets(c: &mut Criterion) {
    let mut group = c.benchmark_group("size_model");

    let mut model = SizeModel::new(50.0, 500);
    for index in 0..500 {
        model.measure(index * 3, 25.0 + (index % 100) as f64);
    }

    for total in [1_000usize, 100_000, 1_000_000] {
        group.bench_with_input(BenchmarkId::new("offset_of", total), &total, |b, &total| {
            b.iter(|| {
                let mut sum = 0.0;
                for index in (0..total).step_by(total / 100) {
                    sum += model.offset_of(black_box(index));
                }
                sum
            });
        });

        group.bench_with_input(
            BenchmarkId::new("index_at_offset", total),
            &total,
            |b, &total| {
                let extent = model.total_size(total);
                b.iter(|| {
                    let mut hits = 0usize;
                    for step in 0..100 {
                        let target = extent * step as f64 / 100.0;
                        hits += model.index_at_offset(black_box(target), total);
                    }
                    hits
                });
            },
        );
    }

    group.bench_function("measure_with_eviction", |b| {
        let mut model = SizeModel::new(50.0, 500);
        let mut next = 0usize;
        b.iter(|| {
            model.measure(black_box(next), 75.0);
            next += 1;
        });
    });

    group.finish();
}

/// Benchmark cached item reads through the collection
fn bench_collection_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");

    let events = Arc::new(EventBus::new());
    let collection: Collection<BenchRow> = Collection::new(
        Arc::new(InMemoryAdapter::new(Vec::new())),
        events,
        &EngineConfig::default(),
        Pagination::Offset,
        Pipelines::default(),
    );
    collection.set_items(bench_rows(10_000));

    group.bench_function("get_item_hit", |b| {
        let mut index = 0usize;
        b.iter(|| {
            index = (index + 97) % 10_000;
            black_box(collection.get_item(index))
        });
    });

    group.bench_function("find_index_by_id", |b| {
        b.iter(|| black_box(collection.find_index_by_id("row-9000")));
    });

    group.finish();
}

/// Benchmark render plan emission over measured + estimated sizes
fn bench_render_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("viewport");

    for count in [1_000usize, 100_000] {
        let mut viewport = viewport_fixture(count);
        viewport.set_container_size(800.0);
        group.bench_with_input(BenchmarkId::new("render_plan", count), &count, |b, _| {
            b.iter(|| black_box(viewport.render_plan()));
        });
    }

    group.finish();
}

/// Benchmark velocity smoothing per scroll sample
fn bench_velocity_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("velocity");

    group.bench_function("sample", |b| {
        let mut tracker = VelocityTracker::new();
        let start = tokio::time::Instant::now();
        let mut position = 0.0;
        let mut tick = 0u64;
        b.iter(|| {
            position += 12.5;
            tick += 1;
            tracker.sample(
                black_box(position),
                start + tokio::time::Duration::from_millis(tick * 16),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_size_model_offsets,
    bench_collection_reads,
    bench_render_plan,
    bench_velocity_tracking
);
criterion_main!(benches);
