//! Microbenchmarks for binding and sampling accumulators.
//!
//! Measures the startup tie path against eager producers of growing size
//! and the tick path over a populated repository.
//!
//! Run with: `cargo bench -p accrue -- tie`

#![allow(missing_docs)]

use std::sync::Arc;

use accrue::producer::StaticProducer;
use accrue::registry::ProducerRegistry;
use accrue::repository::AccumulatorRepository;
use accrue::stats::{GenericStats, ValueKind};
use accrue::AccumulatorDefinition;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

/// Registers one eager producer exposing `stat_count` statistics.
fn setup_registry(stat_count: usize) -> Arc<ProducerRegistry> {
    let registry = Arc::new(ProducerRegistry::new());
    let mut producer = StaticProducer::new("X", "bench");
    for i in 0..stat_count {
        producer = producer.with_statistic(Arc::new(GenericStats::new(
            format!("stat_{i}"),
            [("avg", ValueKind::Gauge), ("count", ValueKind::Count)],
        )));
    }
    registry.register(Arc::new(producer));
    registry
}

fn definitions(count: usize) -> Vec<AccumulatorDefinition> {
    (0..count)
        .map(|i| AccumulatorDefinition::new(format!("acc_{i}"), "X", format!("stat_{i}"), "avg"))
        .collect()
}

fn bench_bind_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("tie_bind_batch");
    for size in [10, 100, 1000] {
        let registry = setup_registry(size);
        let batch = definitions(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let repository = AccumulatorRepository::new(Arc::clone(&registry), 10);
                let report = repository.load(batch.iter().cloned());
                black_box(report.tied.len());
            });
        });
    }
    group.finish();
}

fn bench_tick_all(c: &mut Criterion) {
    let registry = setup_registry(100);
    let repository = AccumulatorRepository::new(registry, 200);
    repository.load(definitions(100));

    let mut now = 0u64;
    c.bench_function("tie_tick_all_100", |b| {
        b.iter(|| {
            now += 1_000_000_000;
            black_box(repository.tick_all(now).len());
        });
    });
}

criterion_group!(benches, bench_bind_batch, bench_tick_all);
criterion_main!(benches);
