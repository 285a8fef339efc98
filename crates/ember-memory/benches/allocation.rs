//! Memory manager benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ember_common::config::MemoryConfig;
use ember_memory::MemoryManager;
use rand::Rng;

fn manager() -> MemoryManager {
    let manager = MemoryManager::master(MemoryConfig {
        region_size: 4 * 1024 * 1024,
        max_locators: 1 << 20,
    })
    .unwrap();
    manager.initialize().unwrap();
    manager
}

fn allocate_benchmark(c: &mut Criterion) {
    c.bench_function("allocate_object_1000", |b| {
        b.iter_batched(
            manager,
            |manager| {
                for _ in 0..1000 {
                    black_box(manager.allocate_object(64).unwrap());
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn allocate_release_benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let sizes: Vec<u64> = (0..1000).map(|_| rng.gen_range(1..=256)).collect();

    // Locators are never reused, so every batch needs a fresh table.
    c.bench_function("allocate_release_mixed_1000", |b| {
        b.iter_batched(
            manager,
            |manager| {
                for size in &sizes {
                    let (locator, _) = manager.allocate_object(*size).unwrap();
                    manager.release(black_box(locator)).unwrap();
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn read_object_benchmark(c: &mut Criterion) {
    let manager = manager();
    let locators: Vec<_> = (0..1000)
        .map(|i| {
            let (locator, _) = manager.allocate_object(32).unwrap();
            manager.write_object(locator, &[i as u8; 32]).unwrap();
            locator
        })
        .collect();

    c.bench_function("read_object_1000", |b| {
        b.iter(|| {
            for locator in &locators {
                black_box(manager.read_object(*locator).unwrap());
            }
        })
    });
}

criterion_group!(
    benches,
    allocate_benchmark,
    allocate_release_benchmark,
    read_object_benchmark
);
criterion_main!(benches);
