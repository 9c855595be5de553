//! # Work Queue Benchmark
//!
//! Measures push/pop throughput of the loader's request queue:
//! 1. Single producer, drained on the same thread
//! 2. Four producers contending with one blocking consumer

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use voxstream_core::WorkQueue;

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue_single_thread");

    for count in [1_000u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("push_pop", count), &count, |b, &count| {
            let queue = WorkQueue::new();
            b.iter(|| {
                for i in 0..count {
                    let _ = queue.push(black_box(i));
                }
                while let Some(item) = queue.try_pop() {
                    black_box(item);
                }
            });
        });
    }

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 10_000;

    let mut group = c.benchmark_group("work_queue_contended");
    group.throughput(Throughput::Elements(PRODUCERS * PER_PRODUCER));

    group.bench_function("4_producers_1_consumer", |b| {
        b.iter(|| {
            let queue = Arc::new(WorkQueue::new());
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|_| {
                    let q = Arc::clone(&queue);
                    thread::spawn(move || {
                        for i in 0..PER_PRODUCER {
                            let _ = q.push(i);
                        }
                    })
                })
                .collect();

            let mut received = 0;
            while received < PRODUCERS * PER_PRODUCER {
                if queue.pop_blocking().is_some() {
                    received += 1;
                }
            }

            for p in producers {
                let _ = p.join();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
