//! # Dimension History
//!
//! A historized ("Type-2 slowly changing") dimension store. Periodic full
//! snapshots of business entities are reconciled against the stored versions:
//! new entities get a first version, entities whose tracked attributes changed
//! get their current version closed and a new one opened, and unchanged
//! entities are left alone.
//!
//! ## Core Concepts
//!
//! - **Schema**: which payload fields are promoted to typed attributes, and
//!   which of those are tracked (trigger a new version) or passthrough
//! - **Versions**: append-only rows with a half-open effective interval and
//!   exactly one current row per business key
//! - **Runs**: one snapshot reconciliation, committed all-or-nothing
//! - **Current view**: the set of versions with `is_current = true`
//!
//! ## Example
//!
//! ```ignore
//! use dimension_history::{AttributeKind, DimensionSchema, StagingRecord, Store, StoreConfig};
//!
//! let schema = DimensionSchema::new("patient_id")
//!     .tracked("status", AttributeKind::Text)
//!     .passthrough("phone", AttributeKind::Text);
//!
//! let store = Store::open_or_create(StoreConfig::new("./patients", schema))?;
//!
//! let summary = store.reconcile(&[
//!     StagingRecord::new(json!({"patient_id": "P1", "status": "Active"})),
//! ])?;
//! assert_eq!(summary.inserted_count, 1);
//!
//! let current = store.current_version("P1")?;
//! ```

pub mod error;
pub mod reconcile;
pub mod schema;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod versions;

// Re-exports
pub use error::{Result, RowRejection, StoreError};
pub use reconcile::{
    attributes_differ, classify, normalize, plan_expirations, plan_inserts, plan_run, Change,
    ChangeSet, ClassifiedBatch, Expiration, ExpiryReason, Normalized, ReconcileOptions,
    RowWarning, RunSummary,
};
pub use schema::{AttributeKind, AttributeRole, AttributeSpec, DimensionSchema, ProjectedRow};
pub use store::{Store, StoreConfig};
pub use subscriptions::{
    ChangeSummary, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
pub use versions::{project_current, VersionLog, VersionTable};
