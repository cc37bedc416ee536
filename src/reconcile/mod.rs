//! Type-2 reconciliation of a full snapshot against the version store.
//!
//! Each stage is a pure function over explicit inputs:
//!
//! 1. [`classify`] partitions the snapshot into NEW / CHANGED / UNCHANGED
//!    using the tracked-attribute comparison in [`compare`].
//! 2. [`plan_expirations`] closes the current version of every CHANGED key
//!    (and of absent keys, when retiring).
//! 3. [`plan_inserts`] writes a full new current version for every NEW or
//!    CHANGED key.
//!
//! The result is a [`ChangeSet`] that the store commits as one unit.

pub mod classify;
pub mod compare;
pub mod expire;
pub mod insert;

pub use classify::{classify, AbsentKey, Change, ClassifiedBatch, ClassifiedRow, RowWarning};
pub use compare::{attributes_differ, diff_tracked, normalize, Normalized};
pub use expire::{plan_expirations, Expiration, ExpiryReason};
pub use insert::{plan_inserts, InsertContext, SurrogateAllocator};

use crate::error::Result;
use crate::schema::DimensionSchema;
use crate::types::{
    BoundaryConvention, DimensionVersion, MissingKeyPolicy, RunId, RunRecord, StagingRecord,
    SurrogateId, Timestamp,
};
use tracing::warn;

/// Policy knobs for a run.
#[derive(Clone, Debug)]
pub struct ReconcileOptions {
    pub boundary: BoundaryConvention,
    pub missing_keys: MissingKeyPolicy,
    pub source_system: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            boundary: BoundaryConvention::default(),
            missing_keys: MissingKeyPolicy::default(),
            source_system: "unknown".to_string(),
        }
    }
}

/// Every write a run makes. Committed all-or-nothing.
#[derive(Clone, Debug)]
pub struct ChangeSet {
    pub run_id: RunId,
    pub run_timestamp: Timestamp,
    pub expirations: Vec<Expiration>,
    pub inserts: Vec<DimensionVersion>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.expirations.is_empty() && self.inserts.is_empty()
    }
}

/// Outcome of one reconciliation run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub run_timestamp: Timestamp,
    /// New current versions written (NEW + CHANGED).
    pub inserted_count: u64,
    /// Versions closed, retirements included.
    pub expired_count: u64,
    /// Versions closed because their key vanished from the snapshot.
    pub retired_count: u64,
    pub unchanged_count: u64,
    /// Rows excluded from the run.
    pub rejected: Vec<RowWarning>,
}

impl RunSummary {
    /// Persisted form of this summary.
    pub fn record(&self) -> RunRecord {
        RunRecord {
            run_id: self.run_id,
            run_timestamp: self.run_timestamp,
            inserted_count: self.inserted_count,
            expired_count: self.expired_count,
            retired_count: self.retired_count,
            unchanged_count: self.unchanged_count,
            rejected_count: self.rejected.len() as u64,
        }
    }
}

/// A planned run: the writes plus the summary to report once committed.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub changes: ChangeSet,
    pub summary: RunSummary,
}

/// Classify a snapshot and plan its expiries and inserts.
///
/// Performs no I/O; `current` is the full current-version set and
/// `next_surrogate` the first unused surrogate id.
pub fn plan_run<'c>(
    schema: &DimensionSchema,
    batch: &[StagingRecord],
    current: impl IntoIterator<Item = &'c DimensionVersion>,
    run_id: RunId,
    run_timestamp: Timestamp,
    next_surrogate: SurrogateId,
    options: &ReconcileOptions,
) -> Result<RunPlan> {
    let classified = classify(schema, batch, current)?;

    let expirations = plan_expirations(
        &classified,
        run_timestamp,
        options.boundary,
        options.missing_keys,
    );

    let ctx = InsertContext {
        run_id,
        run_timestamp,
        source_system: &options.source_system,
    };
    let mut ids = SurrogateAllocator::new(next_surrogate);
    let inserts = plan_inserts(&classified, &ctx, &mut ids);

    let retired_count = expirations
        .iter()
        .filter(|e| e.reason == ExpiryReason::Retired)
        .count() as u64;
    if retired_count > 0 {
        warn!(run_id = %run_id, retired = retired_count, "retiring keys absent from snapshot");
    }

    let summary = RunSummary {
        run_id,
        run_timestamp,
        inserted_count: inserts.len() as u64,
        expired_count: expirations.len() as u64,
        retired_count,
        unchanged_count: classified.unchanged_count() as u64,
        rejected: classified.rejected,
    };

    Ok(RunPlan {
        changes: ChangeSet {
            run_id,
            run_timestamp,
            expirations,
            inserts,
        },
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeKind;
    use serde_json::json;

    #[test]
    fn test_plan_run_counts() {
        let schema = DimensionSchema::new("id").tracked("status", AttributeKind::Text);
        let batch = vec![
            StagingRecord::new(json!({"id": "A", "status": "x"})),
            StagingRecord::new(json!({"id": "B", "status": "y"})),
            StagingRecord::new(json!({"status": "orphan"})),
        ];

        let plan = plan_run(
            &schema,
            &batch,
            std::iter::empty(),
            RunId(1),
            Timestamp(100),
            SurrogateId(1),
            &ReconcileOptions::default(),
        )
        .unwrap();

        assert_eq!(plan.summary.inserted_count, 2);
        assert_eq!(plan.summary.expired_count, 0);
        assert_eq!(plan.summary.rejected.len(), 1);
        assert_eq!(plan.summary.record().rejected_count, 1);
        assert!(plan.changes.expirations.is_empty());
        assert!(!plan.changes.is_empty());
    }
}
