//! Change classification of a staging snapshot against the current versions.

use super::compare;
use crate::error::{Result, RowRejection, StoreError};
use crate::schema::{DimensionSchema, ProjectedRow};
use crate::types::{DimensionVersion, StagingRecord, SurrogateId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Outcome of comparing one staging row to the version store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// No current version exists for the key.
    New,
    /// The current version differs on at least one tracked attribute.
    Changed { current: SurrogateId },
    /// The current version matches on every tracked attribute.
    Unchanged { current: SurrogateId },
}

/// A projected staging row with its classification.
#[derive(Clone, Debug)]
pub struct ClassifiedRow {
    pub row: ProjectedRow,
    pub change: Change,
}

/// A staging row that was excluded from the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowWarning {
    /// Position of the row in the incoming batch.
    pub index: usize,
    /// Business key, when it could be read.
    pub business_key: Option<String>,
    pub rejection: RowRejection,
}

/// Current version whose key did not appear in the snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsentKey {
    pub business_key: String,
    pub current: SurrogateId,
}

/// The classified snapshot.
#[derive(Clone, Debug, Default)]
pub struct ClassifiedBatch {
    /// Accepted rows, in batch order.
    pub rows: Vec<ClassifiedRow>,
    /// Current versions not mentioned by the snapshot, ordered by key.
    pub absent: Vec<AbsentKey>,
    /// Rows excluded from classification.
    pub rejected: Vec<RowWarning>,
}

impl ClassifiedBatch {
    pub fn new_count(&self) -> usize {
        self.count(|c| matches!(c, Change::New))
    }

    pub fn changed_count(&self) -> usize {
        self.count(|c| matches!(c, Change::Changed { .. }))
    }

    pub fn unchanged_count(&self) -> usize {
        self.count(|c| matches!(c, Change::Unchanged { .. }))
    }

    fn count(&self, pred: impl Fn(&Change) -> bool) -> usize {
        self.rows.iter().filter(|r| pred(&r.change)).count()
    }
}

/// Classify every staging row as NEW, CHANGED or UNCHANGED.
///
/// `current` must be the complete set of current versions. Malformed rows and
/// repeated business keys are excluded and reported in `rejected`; only the
/// first accepted row for a key is classified, so a malformed row does not
/// shadow a later good one. Fails if `current` holds more than one
/// version for a key, since the result would be ambiguous.
pub fn classify<'c>(
    schema: &DimensionSchema,
    batch: &[StagingRecord],
    current: impl IntoIterator<Item = &'c DimensionVersion>,
) -> Result<ClassifiedBatch> {
    let mut by_key: HashMap<&str, &DimensionVersion> = HashMap::new();
    for version in current {
        if by_key.insert(version.business_key.as_str(), version).is_some() {
            return Err(StoreError::IntegrityViolation {
                business_key: version.business_key.clone(),
                current_count: 2,
            });
        }
    }

    let mut out = ClassifiedBatch::default();
    // Keys of accepted rows, for duplicate detection.
    let mut seen: HashSet<String> = HashSet::new();
    // Every readable key, accepted or not; these are never absent.
    let mut mentioned: HashSet<String> = HashSet::new();

    for (index, record) in batch.iter().enumerate() {
        let row = match schema.project(&record.payload) {
            Ok(row) => row,
            Err(rejection) => {
                let business_key = schema.read_business_key(&record.payload).ok();
                if let Some(key) = &business_key {
                    mentioned.insert(key.clone());
                }
                warn!(index, ?business_key, %rejection, "rejected staging row");
                out.rejected.push(RowWarning {
                    index,
                    business_key,
                    rejection,
                });
                continue;
            }
        };

        mentioned.insert(row.business_key.clone());
        if !seen.insert(row.business_key.clone()) {
            warn!(index, business_key = %row.business_key, "duplicate business key in batch");
            out.rejected.push(RowWarning {
                index,
                business_key: Some(row.business_key.clone()),
                rejection: RowRejection::DuplicateBusinessKey(row.business_key),
            });
            continue;
        }

        let change = match by_key.get(row.business_key.as_str()) {
            None => Change::New,
            Some(version) => {
                let differing =
                    compare::diff_tracked(schema, &row.attributes, &version.attributes);
                if differing.is_empty() {
                    Change::Unchanged {
                        current: version.surrogate_id,
                    }
                } else {
                    debug!(business_key = %row.business_key, ?differing, "tracked attributes changed");
                    Change::Changed {
                        current: version.surrogate_id,
                    }
                }
            }
        };

        out.rows.push(ClassifiedRow { row, change });
    }

    let mut absent: Vec<AbsentKey> = by_key
        .into_iter()
        .filter(|(key, _)| !mentioned.contains(*key))
        .map(|(key, version)| AbsentKey {
            business_key: key.to_string(),
            current: version.surrogate_id,
        })
        .collect();
    absent.sort_by(|a, b| a.business_key.cmp(&b.business_key));
    out.absent = absent;

    debug!(
        new = out.new_count(),
        changed = out.changed_count(),
        unchanged = out.unchanged_count(),
        absent = out.absent.len(),
        rejected = out.rejected.len(),
        "classified snapshot"
    );

    Ok(out)
}
