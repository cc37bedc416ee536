//! In-memory index over every version row.

use super::log::CommittedRun;
use super::projector::project_current;
use crate::error::{Result, StoreError};
use crate::reconcile::ChangeSet;
use crate::types::{DimensionVersion, RunId, RunRecord, StoreStats, SurrogateId, Timestamp};
use std::collections::{BTreeMap, HashMap, HashSet};

/// All version rows plus lookups by business key.
///
/// The table is only ever changed through [`VersionTable::apply`], which
/// takes a whole run at once.
#[derive(Clone, Debug)]
pub struct VersionTable {
    /// Every row by surrogate id.
    rows: BTreeMap<SurrogateId, DimensionVersion>,

    /// Versions per business key, oldest first.
    history: HashMap<String, Vec<SurrogateId>>,

    /// Current version per business key.
    current: HashMap<String, SurrogateId>,

    /// Committed runs, oldest first.
    runs: Vec<RunRecord>,

    next_surrogate: SurrogateId,
    next_run: RunId,
}

impl Default for VersionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionTable {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            history: HashMap::new(),
            current: HashMap::new(),
            runs: Vec::new(),
            next_surrogate: SurrogateId(1),
            next_run: RunId(1),
        }
    }

    /// Rebuild a table from replayed runs.
    pub fn from_runs(runs: Vec<CommittedRun>) -> Result<Self> {
        let mut table = Self::new();
        for run in runs {
            let changes = ChangeSet {
                run_id: run.record.run_id,
                run_timestamp: run.record.run_timestamp,
                expirations: Vec::new(),
                inserts: run.inserts,
            };
            table
                .check_replayed(&changes, &run.expirations)
                .map_err(|e| StoreError::Corruption(format!("run {}: {}", run.record.run_id, e)))?;
            table.apply_parts(&run.expirations, changes.inserts, run.record);
        }
        Ok(table)
    }

    // --- Transactions ---

    /// Check a change set against the table without modifying it.
    pub fn validate(&self, changes: &ChangeSet) -> Result<()> {
        let expirations: Vec<(SurrogateId, Timestamp)> = changes
            .expirations
            .iter()
            .map(|e| (e.surrogate_id, e.effective_end))
            .collect();

        for expiration in &changes.expirations {
            let row = self.rows.get(&expiration.surrogate_id).ok_or_else(|| {
                StoreError::Transaction(format!(
                    "cannot expire unknown version {}",
                    expiration.surrogate_id
                ))
            })?;
            if row.business_key != expiration.business_key {
                return Err(StoreError::Transaction(format!(
                    "version {} belongs to {}, not {}",
                    row.surrogate_id, row.business_key, expiration.business_key
                )));
            }
        }

        self.check_replayed(changes, &expirations)
    }

    /// Constraints shared by live commits and log replay.
    fn check_replayed(
        &self,
        changes: &ChangeSet,
        expirations: &[(SurrogateId, Timestamp)],
    ) -> Result<()> {
        if changes.run_id != self.next_run {
            return Err(StoreError::Transaction(format!(
                "run {} out of order, expected {}",
                changes.run_id, self.next_run
            )));
        }
        if changes.run_timestamp > Timestamp::LATEST_RUN {
            return Err(StoreError::InvalidRunTimestamp(changes.run_timestamp));
        }
        if let Some(last) = self.last_run_timestamp() {
            if changes.run_timestamp <= last {
                return Err(StoreError::NonMonotonicRun {
                    given: changes.run_timestamp,
                    last,
                });
            }
        }

        let mut closing: HashSet<&str> = HashSet::new();
        for &(surrogate_id, effective_end) in expirations {
            let row = self.rows.get(&surrogate_id).ok_or_else(|| {
                StoreError::Transaction(format!("cannot expire unknown version {}", surrogate_id))
            })?;
            if !row.is_current {
                return Err(StoreError::Transaction(format!(
                    "version {} is already expired",
                    surrogate_id
                )));
            }
            if effective_end < row.effective_start {
                return Err(StoreError::Transaction(format!(
                    "version {} would end at {:?} before it starts at {:?}",
                    surrogate_id, effective_end, row.effective_start
                )));
            }
            if effective_end > changes.run_timestamp {
                return Err(StoreError::Transaction(format!(
                    "version {} would end after the run timestamp",
                    surrogate_id
                )));
            }
            if !closing.insert(row.business_key.as_str()) {
                return Err(StoreError::Transaction(format!(
                    "business key {} expired twice",
                    row.business_key
                )));
            }
        }

        let mut opening: HashSet<&str> = HashSet::new();
        let mut next_id = self.next_surrogate;
        for version in &changes.inserts {
            if version.surrogate_id < next_id {
                return Err(StoreError::Transaction(format!(
                    "surrogate id {} reused",
                    version.surrogate_id
                )));
            }
            next_id = version.surrogate_id.next();

            if !version.is_current || !version.effective_end.is_infinity() {
                return Err(StoreError::Transaction(format!(
                    "inserted version {} is not current",
                    version.surrogate_id
                )));
            }
            if version.effective_start != changes.run_timestamp {
                return Err(StoreError::Transaction(format!(
                    "inserted version {} does not start at the run timestamp",
                    version.surrogate_id
                )));
            }
            let key = version.business_key.as_str();
            if self.current.contains_key(key) && !closing.contains(key) {
                return Err(StoreError::Transaction(format!(
                    "business key {} already has a current version",
                    key
                )));
            }
            if !opening.insert(key) {
                return Err(StoreError::Transaction(format!(
                    "business key {} inserted twice",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Apply a validated change set.
    pub fn apply(&mut self, changes: ChangeSet, record: RunRecord) {
        let expirations: Vec<(SurrogateId, Timestamp)> = changes
            .expirations
            .iter()
            .map(|e| (e.surrogate_id, e.effective_end))
            .collect();
        self.apply_parts(&expirations, changes.inserts, record);
    }

    fn apply_parts(
        &mut self,
        expirations: &[(SurrogateId, Timestamp)],
        inserts: Vec<DimensionVersion>,
        record: RunRecord,
    ) {
        for &(surrogate_id, effective_end) in expirations {
            if let Some(row) = self.rows.get_mut(&surrogate_id) {
                row.effective_end = effective_end;
                row.is_current = false;
                if self.current.get(&row.business_key) == Some(&surrogate_id) {
                    self.current.remove(&row.business_key);
                }
            }
        }

        for version in inserts {
            let id = version.surrogate_id;
            let key = version.business_key.clone();
            self.next_surrogate = self.next_surrogate.max(id.next());
            self.history.entry(key.clone()).or_default().push(id);
            self.current.insert(key, id);
            self.rows.insert(id, version);
        }

        self.next_run = record.run_id.next();
        self.runs.push(record);
    }

    // --- Queries ---

    pub fn next_surrogate(&self) -> SurrogateId {
        self.next_surrogate
    }

    pub fn next_run(&self) -> RunId {
        self.next_run
    }

    pub fn last_run_timestamp(&self) -> Option<Timestamp> {
        self.runs.last().map(|r| r.run_timestamp)
    }

    pub fn get(&self, id: SurrogateId) -> Option<&DimensionVersion> {
        self.rows.get(&id)
    }

    /// The current version set, derived from the rows themselves.
    pub fn current_versions(&self) -> Result<Vec<&DimensionVersion>> {
        project_current(self.rows.values())
    }

    /// Current version of one key.
    pub fn current_version(&self, business_key: &str) -> Result<Option<&DimensionVersion>> {
        let current: Vec<&DimensionVersion> = self
            .history_of(business_key)
            .into_iter()
            .filter(|v| v.is_current)
            .collect();
        match current.len() {
            0 => Ok(None),
            1 => Ok(Some(current[0])),
            n => Err(StoreError::IntegrityViolation {
                business_key: business_key.to_string(),
                current_count: n,
            }),
        }
    }

    /// All versions of a key, oldest first.
    pub fn history_of(&self, business_key: &str) -> Vec<&DimensionVersion> {
        self.history
            .get(business_key)
            .map(|ids| ids.iter().filter_map(|id| self.rows.get(id)).collect())
            .unwrap_or_default()
    }

    /// The version of a key valid at `ts`, if any.
    pub fn as_of(&self, business_key: &str, ts: Timestamp) -> Option<&DimensionVersion> {
        self.history_of(business_key)
            .into_iter()
            .rev()
            .find(|v| v.is_valid_at(ts))
    }

    pub fn business_keys(&self) -> impl Iterator<Item = &str> {
        self.history.keys().map(|k| k.as_str())
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn version_count(&self) -> usize {
        self.rows.len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            version_count: self.rows.len() as u64,
            current_count: self.current.len() as u64,
            business_key_count: self.history.len() as u64,
            run_count: self.runs.len() as u64,
            log_size_bytes: 0,
        }
    }

    /// Check every history invariant.
    ///
    /// - at most one current version per key, and it agrees with the index
    /// - `is_current` iff `effective_end` is the sentinel
    /// - intervals are well formed, ordered and non-overlapping
    pub fn verify_integrity(&self) -> Result<()> {
        let projected = self.current_versions()?;
        if projected.len() != self.current.len() {
            return Err(StoreError::Corruption(format!(
                "current index holds {} keys, rows hold {}",
                self.current.len(),
                projected.len()
            )));
        }
        for version in projected {
            if self.current.get(&version.business_key) != Some(&version.surrogate_id) {
                return Err(StoreError::IntegrityViolation {
                    business_key: version.business_key.clone(),
                    current_count: 1,
                });
            }
        }

        for (key, ids) in &self.history {
            let violation = |detail: String| StoreError::HistoryViolation {
                business_key: key.clone(),
                detail,
            };

            let mut prev: Option<&DimensionVersion> = None;
            for id in ids {
                let version = self
                    .rows
                    .get(id)
                    .ok_or_else(|| violation(format!("missing row {}", id)))?;

                if version.is_current != version.effective_end.is_infinity() {
                    return Err(violation(format!(
                        "version {} has is_current={} but effective_end={:?}",
                        id, version.is_current, version.effective_end
                    )));
                }
                if version.effective_end < version.effective_start {
                    return Err(violation(format!("version {} ends before it starts", id)));
                }
                if let Some(prev) = prev {
                    if prev.is_current {
                        return Err(violation(format!(
                            "version {} follows a current version",
                            id
                        )));
                    }
                    if prev.effective_end > version.effective_start {
                        return Err(violation(format!(
                            "versions {} and {} overlap",
                            prev.surrogate_id, id
                        )));
                    }
                }
                prev = Some(version);
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, version: DimensionVersion) {
        let id = version.surrogate_id;
        self.history
            .entry(version.business_key.clone())
            .or_default()
            .push(id);
        if version.is_current {
            self.current.insert(version.business_key.clone(), id);
        }
        self.next_surrogate = self.next_surrogate.max(id.next());
        self.rows.insert(id, version);
    }
}
