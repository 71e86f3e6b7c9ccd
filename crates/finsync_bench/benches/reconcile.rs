//! Reconciler benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use finsync_bench::{generate_entities, shuffled_versions};
use finsync_engine::{EntityStore, FetchResponse, Reconciler};
use finsync_model::{CollectionType, Entity, PushEvent};
use serde_json::json;

const CARDS: CollectionType = CollectionType::Cards;

/// Benchmark exhaustive bulk application into a populated store.
fn bench_bulk_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_reconcile");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let fresh = generate_entities(count, 2);
            b.iter_batched(
                || {
                    let reconciler = Reconciler::new(EntityStore::new());
                    reconciler
                        .store()
                        .apply_batch(CARDS, generate_entities(count, 1));
                    let issued_at = reconciler.store().sequence();
                    (reconciler, FetchResponse::exhaustive(fresh.clone()), issued_at)
                },
                |(reconciler, response, issued_at)| {
                    black_box(reconciler.apply_bulk(CARDS, response, issued_at));
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark push deltas arriving out of order for one entity.
fn bench_out_of_order_deltas(c: &mut Criterion) {
    let mut group = c.benchmark_group("out_of_order_deltas");
    let versions = shuffled_versions(256);
    group.throughput(Throughput::Elements(versions.len() as u64));

    group.bench_function("shuffled_256", |b| {
        b.iter_batched(
            || Reconciler::new(EntityStore::new()),
            |reconciler| {
                for version in &versions {
                    let entity = Entity::new("c-1", *version, json!({"status": "active"}));
                    black_box(reconciler.apply_delta(PushEvent::upsert(CARDS, entity)));
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_bulk_reconcile, bench_out_of_order_deltas);
criterion_main!(benches);
