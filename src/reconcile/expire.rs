//! Closing out superseded and retired versions.

use super::classify::{Change, ClassifiedBatch};
use crate::types::{BoundaryConvention, MissingKeyPolicy, SurrogateId, Timestamp};
use serde::{Deserialize, Serialize};

/// Why a version is being closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryReason {
    /// A CHANGED row replaces it.
    Superseded,
    /// Its key vanished from the snapshot under [`MissingKeyPolicy::Retire`].
    Retired,
}

/// Instruction to close one current version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expiration {
    pub surrogate_id: SurrogateId,
    pub business_key: String,
    pub effective_end: Timestamp,
    pub reason: ExpiryReason,
}

/// Plan the expiries for a run at `run_ts`.
///
/// Every CHANGED row closes its current version. Absent keys are closed only
/// when `policy` is [`MissingKeyPolicy::Retire`]. NEW and UNCHANGED rows
/// produce nothing.
pub fn plan_expirations(
    batch: &ClassifiedBatch,
    run_ts: Timestamp,
    boundary: BoundaryConvention,
    policy: MissingKeyPolicy,
) -> Vec<Expiration> {
    let effective_end = boundary.expiry_end(run_ts);

    let superseded = batch.rows.iter().filter_map(|classified| match classified.change {
        Change::Changed { current } => Some(Expiration {
            surrogate_id: current,
            business_key: classified.row.business_key.clone(),
            effective_end,
            reason: ExpiryReason::Superseded,
        }),
        Change::New | Change::Unchanged { .. } => None,
    });

    let retired = batch
        .absent
        .iter()
        .filter(|_| policy == MissingKeyPolicy::Retire)
        .map(|absent| Expiration {
            surrogate_id: absent.current,
            business_key: absent.business_key.clone(),
            effective_end,
            reason: ExpiryReason::Retired,
        });

    superseded.chain(retired).collect()
}
