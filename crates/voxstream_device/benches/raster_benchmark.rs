//! # Raster Benchmark
//!
//! Cost of voxelizing one large triangle at increasing grid resolutions,
//! with and without conservative coverage.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use voxstream_device::software::raster::{voxelize_triangle, RasterParams};

fn bench_triangle(c: &mut Criterion) {
    let mut group = c.benchmark_group("voxelize_triangle");
    let triangle = [[0.0, 0.0, 0.1], [1.0, 0.1, 0.4], [0.2, 1.0, 0.9]];

    for resolution in [64u32, 256, 1024] {
        group.throughput(Throughput::Elements(u64::from(resolution) * u64::from(resolution)));
        for conservative in [false, true] {
            let params = RasterParams::new(resolution, 0.0, 1.0, conservative);
            let name = if conservative { "conservative" } else { "exact" };
            group.bench_with_input(BenchmarkId::new(name, resolution), &params, |b, params| {
                b.iter(|| {
                    let mut cells = 0u32;
                    voxelize_triangle(black_box(&triangle), params, |_| cells += 1);
                    cells
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_triangle);
criterion_main!(benches);
