//! Subscription types for committed-run notifications.

use crate::types::{RunRecord, SurrogateId};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only runs touching these business keys (None = any key).
    pub business_keys: Option<Vec<String>>,

    /// Also deliver runs that wrote nothing.
    pub include_empty_runs: bool,
}

impl SubscriptionFilter {
    /// Every run that wrote at least one change.
    pub fn changes() -> Self {
        Self::default()
    }

    /// Every run, including no-op runs.
    pub fn all_runs() -> Self {
        Self {
            include_empty_runs: true,
            ..Default::default()
        }
    }

    /// Runs that touched any of the given keys.
    pub fn business_keys(keys: Vec<String>) -> Self {
        Self {
            business_keys: Some(keys),
            ..Default::default()
        }
    }
}

/// Events emitted by subscriptions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A reconciliation run committed and is visible to readers.
    RunCommitted { run: RunRecord, changes: ChangeSummary },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Which rows a committed run touched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Business keys with a new current version.
    pub inserted_keys: Vec<String>,
    /// Business keys whose previous version was closed.
    pub expired_keys: Vec<String>,
    /// Surrogate ids of the new versions.
    pub inserted_ids: Vec<SurrogateId>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted_keys.is_empty() && self.expired_keys.is_empty()
    }

    pub fn touches(&self, key: &str) -> bool {
        self.inserted_keys.iter().any(|k| k == key) || self.expired_keys.iter().any(|k| k == key)
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
