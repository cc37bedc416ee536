//! Creating new current versions.

use super::classify::{Change, ClassifiedBatch};
use crate::types::{DimensionVersion, RunId, SurrogateId, Timestamp};

/// Hands out surrogate ids for a run.
///
/// Ids only become permanent when the run commits; a failed run's ids are
/// simply never written.
#[derive(Clone, Debug)]
pub struct SurrogateAllocator {
    next: SurrogateId,
}

impl SurrogateAllocator {
    pub fn new(next: SurrogateId) -> Self {
        Self { next }
    }

    pub fn allocate(&mut self) -> SurrogateId {
        let id = self.next;
        self.next = id.next();
        id
    }

    /// The id the next allocation would return.
    pub fn peek(&self) -> SurrogateId {
        self.next
    }
}

/// Run-level values stamped onto every inserted version.
#[derive(Clone, Copy, Debug)]
pub struct InsertContext<'a> {
    pub run_id: RunId,
    pub run_timestamp: Timestamp,
    pub source_system: &'a str,
}

/// Build a new current version for every NEW or CHANGED row.
///
/// Each version carries the full projected row, passthrough fields and
/// residual included, so it can be read without its predecessors.
pub fn plan_inserts(
    batch: &ClassifiedBatch,
    ctx: &InsertContext<'_>,
    ids: &mut SurrogateAllocator,
) -> Vec<DimensionVersion> {
    batch
        .rows
        .iter()
        .filter(|classified| {
            matches!(classified.change, Change::New | Change::Changed { .. })
        })
        .map(|classified| DimensionVersion {
            surrogate_id: ids.allocate(),
            business_key: classified.row.business_key.clone(),
            attributes: classified.row.attributes.clone(),
            residual: classified.row.residual.clone(),
            effective_start: ctx.run_timestamp,
            effective_end: Timestamp::INFINITY,
            is_current: true,
            load_timestamp: ctx.run_timestamp,
            source_system: ctx.source_system.to_string(),
            run_id: ctx.run_id,
        })
        .collect()
}
