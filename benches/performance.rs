//! Performance benchmarks for the dimension store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dimension_history::{
    classify, AttributeKind, DimensionSchema, StagingRecord, Store, StoreConfig, Timestamp,
};
use serde_json::json;
use tempfile::TempDir;

fn schema() -> DimensionSchema {
    DimensionSchema::new("product_id")
        .tracked("category", AttributeKind::Text)
        .tracked("price", AttributeKind::Float)
        .tracked("discontinued", AttributeKind::Boolean)
        .passthrough("stock", AttributeKind::Integer)
}

fn create_store(dir: &TempDir) -> Store {
    Store::create(StoreConfig {
        sync_on_commit: false,
        ..StoreConfig::new(dir.path().join("store"), schema())
    })
    .unwrap()
}

fn snapshot(keys: usize, price_shift: f64) -> Vec<StagingRecord> {
    (0..keys)
        .map(|i| {
            StagingRecord::new(json!({
                "product_id": format!("SKU-{}", i),
                "category": (["tools", "garden", "kitchen"][i % 3]),
                "price": 10.0 + i as f64 + price_shift,
                "discontinued": false,
                "stock": i % 17,
            }))
        })
        .collect()
}

/// Benchmark a run over an unchanged snapshot of growing size
fn bench_unchanged_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("unchanged_run");

    for keys in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("keys", keys), &keys, |b, &keys| {
            let dir = TempDir::new().unwrap();
            let store = create_store(&dir);
            let batch = snapshot(keys, 0.0);
            store.reconcile(&batch).unwrap();

            b.iter(|| {
                black_box(store.reconcile(&batch).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark a run where every key changes
fn bench_full_churn_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_churn_run");

    for keys in [100, 1_000] {
        group.bench_with_input(BenchmarkId::new("keys", keys), &keys, |b, &keys| {
            let dir = TempDir::new().unwrap();
            let store = create_store(&dir);
            let batches = [snapshot(keys, 0.0), snapshot(keys, 0.5)];

            let mut flip = 0;
            b.iter(|| {
                flip ^= 1;
                black_box(store.reconcile(&batches[flip]).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark classification alone, without persistence
fn bench_classify(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir);
    store.reconcile_at(&snapshot(5_000, 0.0), Timestamp(1_000)).unwrap();

    let current = store.current_versions().unwrap();
    let batch = snapshot(5_000, 0.25);
    let schema = schema();

    c.bench_function("classify_5k", |b| {
        b.iter(|| {
            black_box(classify(&schema, &batch, current.iter()).unwrap());
        });
    });
}

/// Benchmark point-in-time lookups on a long history
fn bench_as_of(c: &mut Criterion) {
    let mut group = c.benchmark_group("as_of");

    for versions in [10, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::new("versions_per_key", versions),
            &versions,
            |b, &versions| {
                let dir = TempDir::new().unwrap();
                let store = create_store(&dir);

                for v in 0..versions {
                    store
                        .reconcile_at(&snapshot(10, v as f64), Timestamp((v as i64 + 1) * 1_000))
                        .unwrap();
                }

                let midpoint = Timestamp(versions as i64 * 500);
                b.iter(|| {
                    black_box(store.as_of("SKU-3", midpoint));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_unchanged_run,
    bench_full_churn_run,
    bench_classify,
    bench_as_of,
);

criterion_main!(benches);
