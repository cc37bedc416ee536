//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::reconcile::{self, ChangeSet, ReconcileOptions, RunSummary};
use crate::schema::DimensionSchema;
use crate::subscriptions::{
    ChangeSummary, SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
use crate::types::{
    BoundaryConvention, DimensionVersion, MissingKeyPolicy, RunRecord, StagingRecord, StoreStats,
    SurrogateId, Timestamp,
};
use crate::versions::{VersionLog, VersionTable};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the log when a run commits.
    pub sync_on_commit: bool,

    /// Tag written to every version's `source_system`.
    pub source_system: String,

    /// Typed layout of the dimension.
    pub schema: DimensionSchema,

    /// Where an expired version ends relative to its successor.
    pub boundary: BoundaryConvention,

    /// Handling of current versions missing from a snapshot.
    pub missing_keys: MissingKeyPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./dimension"),
            create_if_missing: true,
            sync_on_commit: true,
            source_system: "unknown".to_string(),
            schema: DimensionSchema::default(),
            boundary: BoundaryConvention::default(),
            missing_keys: MissingKeyPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Configuration for a store at `path` with the given schema.
    pub fn new(path: impl Into<PathBuf>, schema: DimensionSchema) -> Self {
        Self {
            path: path.into(),
            schema,
            ..Default::default()
        }
    }

    fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            boundary: self.boundary,
            missing_keys: self.missing_keys,
            source_system: self.source_system.clone(),
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"DIM\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// A historized dimension.
///
/// Provides a unified interface for:
/// - Reconciling full snapshots into Type-2 version history
/// - Reading the current view, per-key history and point-in-time versions
/// - Subscribing to committed runs
///
/// One run at a time: `reconcile` calls are serialized. Readers never block
/// each other and see a run either entirely or not at all.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Options handed to the planner on every run.
    options: ReconcileOptions,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Durable log of committed runs.
    log: VersionLog,

    /// In-memory view of every version.
    table: RwLock<VersionTable>,

    /// Serializes reconciliation runs.
    run_lock: Mutex<()>,

    /// Committed-run notifications.
    subscriptions: SubscriptionManager,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        config.schema.validate()?;

        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path, &config.schema)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        let (log, runs) =
            VersionLog::open(config.path.join("versions.log"), config.sync_on_commit)?;
        let table = VersionTable::from_runs(runs)?;

        info!(path = %config.path.display(), "created dimension store");
        Ok(Self::assemble(config, lock_file, log, table))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.schema.validate()?;

        Self::verify_manifest(&config.path, &config.schema)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let (log, runs) =
            VersionLog::open(config.path.join("versions.log"), config.sync_on_commit)?;
        let table = VersionTable::from_runs(runs)?;

        info!(
            path = %config.path.display(),
            versions = table.version_count(),
            runs = table.runs().len(),
            "opened dimension store"
        );
        Ok(Self::assemble(config, lock_file, log, table))
    }

    fn assemble(config: StoreConfig, lock_file: File, log: VersionLog, table: VersionTable) -> Self {
        Self {
            options: config.reconcile_options(),
            config,
            _lock_file: lock_file,
            log,
            table: RwLock::new(table),
            run_lock: Mutex::new(()),
            subscriptions: SubscriptionManager::new(),
        }
    }

    // --- Reconciliation ---

    /// Reconcile a full snapshot, stamped with the current time.
    ///
    /// The run timestamp is the wall clock, moved forward if needed so it is
    /// strictly after the previous run.
    pub fn reconcile(&self, batch: &[StagingRecord]) -> Result<RunSummary> {
        let _run = self.run_lock.lock();

        let now = Timestamp::now();
        let run_ts = match self.table.read().last_run_timestamp() {
            Some(last) if now <= last => last.next_unit(),
            _ => now,
        };

        self.reconcile_locked(batch, run_ts)
    }

    /// Reconcile a full snapshot at an explicit run timestamp.
    ///
    /// `run_ts` must be after the last committed run and no later than
    /// [`Timestamp::LATEST_RUN`].
    pub fn reconcile_at(&self, batch: &[StagingRecord], run_ts: Timestamp) -> Result<RunSummary> {
        let _run = self.run_lock.lock();

        if let Some(last) = self.table.read().last_run_timestamp() {
            if run_ts <= last {
                return Err(StoreError::NonMonotonicRun { given: run_ts, last });
            }
        }

        self.reconcile_locked(batch, run_ts)
    }

    /// Plan, validate, persist and publish one run. Caller holds `run_lock`.
    fn reconcile_locked(&self, batch: &[StagingRecord], run_ts: Timestamp) -> Result<RunSummary> {
        if run_ts > Timestamp::LATEST_RUN {
            return Err(StoreError::InvalidRunTimestamp(run_ts));
        }

        let plan = {
            let table = self.table.read();
            let current = table.current_versions()?;
            let plan = reconcile::plan_run(
                &self.config.schema,
                batch,
                current,
                table.next_run(),
                run_ts,
                table.next_surrogate(),
                &self.options,
            )?;
            table.validate(&plan.changes)?;
            plan
        };

        let record = plan.summary.record();
        self.commit(plan.changes, &record)?;

        info!(
            run_id = %record.run_id,
            inserted = record.inserted_count,
            expired = record.expired_count,
            retired = record.retired_count,
            unchanged = record.unchanged_count,
            rejected = record.rejected_count,
            "reconciliation run committed"
        );

        Ok(plan.summary)
    }

    /// Write a validated change set to the log, then make it visible.
    ///
    /// Nothing is applied to the table unless the log write succeeded.
    fn commit(&self, changes: ChangeSet, record: &RunRecord) -> Result<()> {
        self.log.append_run(&changes, record)?;

        let summary = summarize(&changes);
        self.table.write().apply(changes, record.clone());

        self.subscriptions.broadcast_run(record, &summary);
        Ok(())
    }

    // --- Current Projection ---

    /// Every current version, ordered by surrogate id.
    pub fn current_versions(&self) -> Result<Vec<DimensionVersion>> {
        let table = self.table.read();
        let current = table.current_versions()?;
        Ok(current.into_iter().cloned().collect())
    }

    /// The current version of one business key.
    pub fn current_version(&self, business_key: &str) -> Result<Option<DimensionVersion>> {
        Ok(self.table.read().current_version(business_key)?.cloned())
    }

    // --- History Queries ---

    /// Every version of a business key, oldest first.
    pub fn history(&self, business_key: &str) -> Vec<DimensionVersion> {
        self.table
            .read()
            .history_of(business_key)
            .into_iter()
            .cloned()
            .collect()
    }

    /// The version of a business key valid at `ts`.
    ///
    /// `None` if the entity did not exist yet, or `ts` falls in the gap left
    /// by [`BoundaryConvention::Gapped`].
    pub fn as_of(&self, business_key: &str, ts: Timestamp) -> Option<DimensionVersion> {
        self.table.read().as_of(business_key, ts).cloned()
    }

    /// Get a version by surrogate id.
    pub fn get_version(&self, id: SurrogateId) -> Result<DimensionVersion> {
        self.table
            .read()
            .get(id)
            .cloned()
            .ok_or(StoreError::VersionNotFound(id))
    }

    /// Check every history invariant across the store.
    pub fn verify_integrity(&self) -> Result<()> {
        let table = self.table.read();
        table.verify_integrity()?;
        debug!(versions = table.version_count(), "integrity verified");
        Ok(())
    }

    /// Committed runs, oldest first.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.table.read().runs().to_vec()
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        self.table.read().runs().last().cloned()
    }

    // --- Subscriptions ---

    /// Subscribe to runs committed from now on.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id)
    }

    // --- Maintenance ---

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let mut stats = self.table.read().stats();
        stats.log_size_bytes = self.log.size();
        stats
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn schema(&self) -> &DimensionSchema {
        &self.config.schema
    }

    // --- Private Helpers ---

    /// Manifest layout: magic, version byte, then the schema as JSON.
    fn write_manifest(path: &Path, schema: &DimensionSchema) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        serde_json::to_writer(&mut file, schema)?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path, schema: &DimensionSchema) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        let mut stored = Vec::new();
        file.read_to_end(&mut stored)?;
        let stored: DimensionSchema = serde_json::from_slice(&stored)
            .map_err(|e| StoreError::InvalidFormat(format!("Unreadable manifest schema: {}", e)))?;
        if &stored != schema {
            return Err(StoreError::InvalidSchema(format!(
                "store was created with a different schema: {}",
                serde_json::to_string(&stored)?
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

fn summarize(changes: &ChangeSet) -> ChangeSummary {
    ChangeSummary {
        inserted_keys: changes
            .inserts
            .iter()
            .map(|v| v.business_key.clone())
            .collect(),
        expired_keys: changes
            .expirations
            .iter()
            .map(|e| e.business_key.clone())
            .collect(),
        inserted_ids: changes.inserts.iter().map(|v| v.surrogate_id).collect(),
    }
}
