//! Scaling tests with synthetic 50k-key dimensions.
//!
//! Measures the key operations on a large store:
//! - Initial load of a full snapshot
//! - Incremental runs touching a small share of keys
//! - Restart/rebuild from the log
//! - Current-view and point-in-time queries

use dimension_history::{
    AttributeKind, DimensionSchema, MissingKeyPolicy, StagingRecord, Store, StoreConfig,
    SubscriptionConfig, SubscriptionFilter, StoreEvent, Timestamp,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const KEY_COUNT: usize = 50_000;

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        sync_on_commit: false,
        source_system: "crm".to_string(),
        ..StoreConfig::new(
            dir.path().to_path_buf(),
            DimensionSchema::new("customer_id")
                .tracked("segment", AttributeKind::Text)
                .tracked("region", AttributeKind::Text)
                .passthrough("lifetime_value", AttributeKind::Float),
        )
    }
}

/// Full snapshot where every `change_every`-th key moves to segment `generation`.
fn snapshot(generation: usize, change_every: usize) -> Vec<StagingRecord> {
    (0..KEY_COUNT)
        .map(|i| {
            let segment = if generation > 0 && i % change_every == 0 {
                format!("segment-{}", generation)
            } else {
                "segment-0".to_string()
            };
            StagingRecord::new(json!({
                "customer_id": format!("C{:06}", i),
                "segment": segment,
                "region": (["north", "south", "east", "west"][i % 4]),
                "lifetime_value": i as f64 * 1.5,
                "notes": format!("Customer number {}", i),
            }))
        })
        .collect()
}

/// Route store logs through the test harness; set once per binary.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn report(&self) {
        println!("  {} took {:.2}ms", self.name, self.elapsed_ms());
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.elapsed_ms();
        let per_item = if count > 0 { ms / count as f64 } else { 0.0 };
        println!(
            "  {} took {:.2}ms ({} items, {:.4}ms/item, {:.0} items/sec)",
            self.name,
            ms,
            count,
            per_item,
            if ms > 0.0 { count as f64 / (ms / 1000.0) } else { 0.0 }
        );
    }
}

// =============================================================================
// Test: 50k keys, initial load and incremental runs
// =============================================================================

#[test]
fn test_scaling_50k_incremental_runs() {
    println!("\n=== 50k Keys, Incremental Runs ===");
    init_tracing();

    let dir = TempDir::new().unwrap();
    let store = Store::create(test_config(&dir)).unwrap();

    let timer = Timer::new("Initial load");
    let summary = store.reconcile_at(&snapshot(0, 1), Timestamp(1_000)).unwrap();
    timer.report_with_count(KEY_COUNT);
    assert_eq!(summary.inserted_count, KEY_COUNT as u64);

    let timer = Timer::new("Unchanged rerun");
    let summary = store.reconcile_at(&snapshot(0, 1), Timestamp(2_000)).unwrap();
    timer.report_with_count(KEY_COUNT);
    assert_eq!(summary.inserted_count, 0);
    assert_eq!(summary.unchanged_count, KEY_COUNT as u64);

    // 1% of keys change per run.
    let runs = 10;
    let timer = Timer::new("10 runs at 1% churn");
    for generation in 1..=runs {
        let summary = store
            .reconcile_at(
                &snapshot(generation, 100),
                Timestamp((generation as i64 + 2) * 1_000),
            )
            .unwrap();
        assert_eq!(summary.inserted_count, (KEY_COUNT / 100) as u64);
        assert_eq!(summary.expired_count, (KEY_COUNT / 100) as u64);
    }
    timer.report_with_count(runs * KEY_COUNT);

    let stats = store.stats();
    println!(
        "  Store stats: {} versions, {} current, {} bytes",
        stats.version_count, stats.current_count, stats.log_size_bytes
    );
    assert_eq!(stats.version_count, (KEY_COUNT + runs * KEY_COUNT / 100) as u64);
    assert_eq!(stats.current_count, KEY_COUNT as u64);

    let timer = Timer::new("Project current view");
    let current = store.current_versions().unwrap();
    timer.report_with_count(current.len());
    assert_eq!(current.len(), KEY_COUNT);

    let timer = Timer::new("Verify integrity");
    store.verify_integrity().unwrap();
    timer.report();

    // Close and reopen (test rebuild)
    store.sync().unwrap();
    drop(store);

    let timer = Timer::new("Reopen store (replay log)");
    let store = Store::open(test_config(&dir)).unwrap();
    timer.report();
    assert_eq!(store.runs().len(), runs + 2);

    let timer = Timer::new("Point-in-time lookups");
    for i in (0..KEY_COUNT).step_by(100) {
        let key = format!("C{:06}", i);
        let first = store.as_of(&key, Timestamp(1_500)).unwrap();
        assert_eq!(
            first.attribute("segment").and_then(|v| v.as_text()),
            Some("segment-0")
        );
        assert_eq!(store.history(&key).len(), runs + 1);
    }
    timer.report_with_count(KEY_COUNT / 100);

    println!("  ✓ Incremental runs test passed");
}

// =============================================================================
// Test: shrinking snapshots under the retire policy
// =============================================================================

#[test]
fn test_scaling_retire_half() {
    println!("\n=== 50k Keys, Retire Half ===");
    init_tracing();

    let dir = TempDir::new().unwrap();
    let store = Store::create(StoreConfig {
        missing_keys: MissingKeyPolicy::Retire,
        ..test_config(&dir)
    })
    .unwrap();

    store.reconcile_at(&snapshot(0, 1), Timestamp(1_000)).unwrap();

    let half: Vec<StagingRecord> = snapshot(0, 1).into_iter().step_by(2).collect();
    let timer = Timer::new("Retire 25k absent keys");
    let summary = store.reconcile_at(&half, Timestamp(2_000)).unwrap();
    timer.report_with_count(KEY_COUNT / 2);

    assert_eq!(summary.retired_count, (KEY_COUNT / 2) as u64);
    assert_eq!(summary.inserted_count, 0);
    assert_eq!(store.current_versions().unwrap().len(), KEY_COUNT / 2);
    store.verify_integrity().unwrap();

    println!("  ✓ Retire test passed");
}

// =============================================================================
// Test: subscribers on a busy store
// =============================================================================

#[test]
fn test_scaling_subscriptions() {
    println!("\n=== Subscriptions on 50k Key Store ===");
    init_tracing();

    let dir = TempDir::new().unwrap();
    let store = Store::create(test_config(&dir)).unwrap();

    let all = store.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::all_runs(),
        ..Default::default()
    });
    let one_key = store.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::business_keys(vec!["C000100".to_string()]),
        ..Default::default()
    });

    let timer = Timer::new("Initial load + 5 runs");
    let mut batch = snapshot(0, 1);
    store.reconcile_at(&batch, Timestamp(1_000)).unwrap();
    for generation in 1..=5 {
        // Odd generations resend the previous snapshot unchanged.
        if generation % 2 == 0 {
            batch = snapshot(generation, 100);
        }
        store
            .reconcile_at(&batch, Timestamp((generation as i64 + 1) * 1_000))
            .unwrap();
    }
    timer.report();

    let mut seen = 0;
    while let Ok(event) = all.recv_timeout(Duration::from_millis(100)) {
        if let StoreEvent::RunCommitted { .. } = event {
            seen += 1;
        }
    }
    assert_eq!(seen, 6);

    let mut touching = 0;
    while let Ok(event) = one_key.recv_timeout(Duration::from_millis(100)) {
        if let StoreEvent::RunCommitted { changes, .. } = event {
            assert!(changes.touches("C000100"));
            touching += 1;
        }
    }
    // Initial load plus generations 2 and 4.
    assert_eq!(touching, 3);

    println!("  ✓ Subscription test passed");
}
