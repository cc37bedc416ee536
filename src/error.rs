//! Error types for the dimension store.

use crate::types::{SurrogateId, Timestamp};
use thiserror::Error;

/// Main error type for store operations.
///
/// Any of these aborts the whole run. Problems with individual staging rows
/// are reported as [`RowRejection`] instead and never surface here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version not found: {0}")]
    VersionNotFound(SurrogateId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Run timestamp {given:?} is not after the last committed run at {last:?}")]
    NonMonotonicRun { given: Timestamp, last: Timestamp },

    #[error("Run timestamp {0:?} leaves no room before the open-ended sentinel")]
    InvalidRunTimestamp(Timestamp),

    #[error("Log entry of {size} bytes exceeds the {limit} byte limit")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Integrity violation for business key {business_key}: {current_count} current versions")]
    IntegrityViolation {
        business_key: String,
        current_count: usize,
    },

    #[error("History violation for business key {business_key}: {detail}")]
    HistoryViolation { business_key: String, detail: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Why a staging row was left out of a run.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RowRejection {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("business key field `{0}` is missing or null")]
    MissingBusinessKey(String),

    #[error("business key field `{field}` has unusable value: {detail}")]
    InvalidBusinessKey { field: String, detail: String },

    #[error("field `{field}` cannot be read as {expected}: {detail}")]
    InvalidField {
        field: String,
        expected: String,
        detail: String,
    },

    #[error("business key `{0}` already appeared earlier in this batch")]
    DuplicateBusinessKey(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
