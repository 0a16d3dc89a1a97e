//! Benchmark for the batched fallback path.
//!
//! TARGET: 100,000 visible instances split and recorded in under 2ms
//!
//! Run with: cargo bench --package horde_rendering --bench batch_benchmark

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use horde_rendering::draw::batch_ranges;
use horde_rendering::{
    Frustum, InstancedRenderer, MeshRange, ModelDesc, RendererConfig, SoftDevice, StaticGeometry, SubmitMode,
    MAX_INSTANCES_PER_DRAW_CALL,
};
use horde_shared::Vec3;

fn benchmark_batch_ranges(c: &mut Criterion) {
    c.bench_function("batch_ranges_1M", |b| {
        b.iter(|| batch_ranges(black_box(1_000_000), MAX_INSTANCES_PER_DRAW_CALL).map(|r| r.len()).sum::<usize>());
    });
}

fn benchmark_batched_frame(c: &mut Criterion) {
    let mut geometry = StaticGeometry::new();
    let cube = geometry.push(MeshRange { index_count: 36, index_start: 0, base_vertex: 0, bounding_radius: 0.87 });

    let config = RendererConfig {
        instances_per_model: 50_000,
        seed: 7,
        submit_mode: SubmitMode::Batched,
        ..RendererConfig::default()
    };
    let device = SoftDevice::new();
    let mut backend = device.draw_backend();
    let mut renderer = InstancedRenderer::new(device, config);
    renderer
        .setup(&[ModelDesc::new(cube), ModelDesc::new(cube)], &geometry, &backend)
        .expect("setup");
    let frustum = Frustum::from_box(Vec3::new(-100.0, -100.0, -100.0), Vec3::new(100.0, 100.0, 100.0));

    let mut group = c.benchmark_group("batched_frame");
    group.throughput(Throughput::Elements(100_000));
    group.sample_size(20);

    group.bench_function("host_cull_and_batch_100k", |b| {
        b.iter(|| {
            let stats = renderer.render_frame(black_box(&frustum), &mut backend).expect("frame");
            black_box(stats.draw_calls)
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_batch_ranges, benchmark_batched_frame);
criterion_main!(benches);
