//! Benchmarks for the spatial index and correspondence resampling.
//!
//! Run with: cargo bench -p mesh-core

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mesh_core::{SpatialIndex, primitives, resample_onto_target};

fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_index_build");
    for n in [25usize, 50, 100] {
        let mesh = primitives::torus(20.0, 5.0, 4 * n, n);
        let points = mesh.positions();
        group.throughput(Throughput::Elements(points.len() as u64));
        for bucket_size in [4usize, 16, 64] {
            group.bench_with_input(
                BenchmarkId::new(format!("bucket_{}", bucket_size), points.len()),
                &points,
                |b, points| b.iter(|| SpatialIndex::build(black_box(points), bucket_size)),
            );
        }
    }
    group.finish();
}

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_onto_target");
    for n in [20usize, 40, 80] {
        let template = primitives::uv_sphere(18.0, n, 2 * n);
        let target = primitives::torus(20.0, 5.0, 4 * n, n);
        group.throughput(Throughput::Elements(template.vertex_count() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(template.vertex_count()),
            &(template, target),
            |b, (template, target)| b.iter(|| resample_onto_target(black_box(template), target)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_index_build, bench_resample);
criterion_main!(benches);
