//! Core types for the dimension store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// System-generated identity of a single version row. Never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurrogateId(pub u64);

impl fmt::Debug for SurrogateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SurrogateId({})", self.0)
    }
}

impl fmt::Display for SurrogateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SurrogateId {
    pub fn next(self) -> Self {
        SurrogateId(self.0 + 1)
    }
}

/// Identifier of a committed reconciliation run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct RunId(pub u64);

impl fmt::Debug for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Run({})", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RunId {
    pub fn next(self) -> Self {
        RunId(self.0 + 1)
    }
}

/// Microseconds since Unix epoch.
///
/// One microsecond is the smallest time unit the store distinguishes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Sentinel `effective_end` of a current version.
    pub const INFINITY: Timestamp = Timestamp(i64::MAX);

    /// Latest instant a run may be stamped with; anything later leaves no
    /// room between a closed interval and the sentinel.
    pub const LATEST_RUN: Timestamp = Timestamp(i64::MAX - 2);

    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// One time unit before this instant.
    pub fn prev_unit(self) -> Self {
        Timestamp(self.0.saturating_sub(1))
    }

    /// One time unit after this instant.
    pub fn next_unit(self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }

    pub fn is_infinity(self) -> bool {
        self == Self::INFINITY
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            write!(f, "Timestamp(inf)")
        } else {
            write!(f, "Timestamp({})", self.0)
        }
    }
}

/// A typed attribute value promoted out of the staging payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert back to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Text(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Integer(v) => serde_json::Value::from(*v),
            AttributeValue::Float(v) => serde_json::Value::from(*v),
            AttributeValue::Boolean(v) => serde_json::Value::Bool(*v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Integer(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Boolean(v)
    }
}

/// Typed attributes of a version, keyed by attribute name.
///
/// Absent and null values are not stored.
pub type AttributeSet = BTreeMap<String, AttributeValue>;

/// Payload fields the schema does not promote, kept verbatim.
pub type Residual = serde_json::Map<String, serde_json::Value>;

/// One row of an incoming snapshot, as received from extraction.
#[derive(Clone, Debug)]
pub struct StagingRecord {
    /// Raw payload. Expected to be a JSON object that carries the business key.
    pub payload: serde_json::Value,

    /// When the extraction produced this row.
    pub ingested_at: Timestamp,
}

impl StagingRecord {
    /// Create a staging record ingested now.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ingested_at: Timestamp::now(),
        }
    }

    /// Parse a staging record from raw JSON text.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(s)?))
    }

    pub fn with_ingested_at(mut self, ingested_at: Timestamp) -> Self {
        self.ingested_at = ingested_at;
        self
    }
}

/// A historized version row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionVersion {
    /// Unique identifier (assigned by store).
    pub surrogate_id: SurrogateId,

    /// Stable external identifier of the entity.
    pub business_key: String,

    /// Typed tracked and passthrough attributes.
    pub attributes: AttributeSet,

    /// Fields not promoted to typed attributes.
    pub residual: Residual,

    /// Inclusive start of validity.
    pub effective_start: Timestamp,

    /// Exclusive end of validity; [`Timestamp::INFINITY`] while current.
    pub effective_end: Timestamp,

    /// True iff `effective_end` is the sentinel.
    pub is_current: bool,

    /// Timestamp of the run that loaded this row.
    pub load_timestamp: Timestamp,

    /// Source system tag.
    pub source_system: String,

    /// Run that inserted this row.
    pub run_id: RunId,
}

impl DimensionVersion {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Whether `ts` falls inside `[effective_start, effective_end)`.
    pub fn is_valid_at(&self, ts: Timestamp) -> bool {
        self.effective_start <= ts && ts < self.effective_end
    }
}

/// Where an expired version's validity ends relative to its successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BoundaryConvention {
    /// `effective_end = run_ts - 1µs`, leaving a one-unit gap.
    #[default]
    Gapped,

    /// `effective_end = run_ts`; the half-open intervals touch.
    Contiguous,
}

impl BoundaryConvention {
    /// `effective_end` for a version closed by a run at `run_ts`.
    pub fn expiry_end(self, run_ts: Timestamp) -> Timestamp {
        match self {
            BoundaryConvention::Gapped => run_ts.prev_unit(),
            BoundaryConvention::Contiguous => run_ts,
        }
    }
}

/// What to do with current versions whose key is absent from a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MissingKeyPolicy {
    /// Leave them current.
    #[default]
    Retain,

    /// Close them without inserting a successor.
    Retire,
}

/// Persisted summary of a committed run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub run_timestamp: Timestamp,
    pub inserted_count: u64,
    pub expired_count: u64,
    pub retired_count: u64,
    pub unchanged_count: u64,
    pub rejected_count: u64,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub version_count: u64,
    pub current_count: u64,
    pub business_key_count: u64,
    pub run_count: u64,
    pub log_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_conventions() {
        let run = Timestamp(1_000);
        assert_eq!(BoundaryConvention::Gapped.expiry_end(run), Timestamp(999));
        assert_eq!(BoundaryConvention::Contiguous.expiry_end(run), Timestamp(1_000));
    }

    #[test]
    fn test_validity_is_half_open() {
        let version = DimensionVersion {
            surrogate_id: SurrogateId(1),
            business_key: "P1".into(),
            attributes: AttributeSet::new(),
            residual: Residual::new(),
            effective_start: Timestamp(10),
            effective_end: Timestamp(20),
            is_current: false,
            load_timestamp: Timestamp(10),
            source_system: "test".into(),
            run_id: RunId(1),
        };

        assert!(!version.is_valid_at(Timestamp(9)));
        assert!(version.is_valid_at(Timestamp(10)));
        assert!(version.is_valid_at(Timestamp(19)));
        assert!(!version.is_valid_at(Timestamp(20)));
    }

    #[test]
    fn test_infinity_never_moves() {
        assert_eq!(Timestamp::INFINITY.next_unit(), Timestamp::INFINITY);
        assert!(Timestamp::INFINITY.is_infinity());
        assert!(!Timestamp::now().is_infinity());
    }

    #[test]
    fn test_staging_from_json_str() {
        let record = StagingRecord::from_json_str(r#"{"id": "P1"}"#).unwrap();
        assert_eq!(record.payload["id"], "P1");
        assert!(StagingRecord::from_json_str("{not json").is_err());
    }
}
