//! The current view: exactly the versions with `is_current = true`.

use crate::error::{Result, StoreError};
use crate::types::DimensionVersion;
use std::collections::HashMap;
use tracing::error;

/// Filter `versions` down to the current ones.
///
/// Fails with [`StoreError::IntegrityViolation`] if any business key has more
/// than one current version. Nothing is repaired.
pub fn project_current<'a>(
    versions: impl IntoIterator<Item = &'a DimensionVersion>,
) -> Result<Vec<&'a DimensionVersion>> {
    let current: Vec<&DimensionVersion> = versions.into_iter().filter(|v| v.is_current).collect();

    let mut per_key: HashMap<&str, usize> = HashMap::with_capacity(current.len());
    for version in &current {
        *per_key.entry(version.business_key.as_str()).or_default() += 1;
    }

    if let Some((key, count)) = per_key
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .min_by(|a, b| a.0.cmp(b.0))
    {
        error!(business_key = key, current_count = count, "multiple current versions");
        return Err(StoreError::IntegrityViolation {
            business_key: key.to_string(),
            current_count: count,
        });
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeSet, Residual, RunId, SurrogateId, Timestamp};

    fn version(id: u64, key: &str, current: bool) -> DimensionVersion {
        DimensionVersion {
            surrogate_id: SurrogateId(id),
            business_key: key.into(),
            attributes: AttributeSet::new(),
            residual: Residual::new(),
            effective_start: Timestamp(id as i64 * 10),
            effective_end: if current {
                Timestamp::INFINITY
            } else {
                Timestamp(id as i64 * 10 + 5)
            },
            is_current: current,
            load_timestamp: Timestamp(0),
            source_system: "test".into(),
            run_id: RunId(1),
        }
    }

    #[test]
    fn test_filters_to_current() {
        let rows = vec![
            version(1, "P1", false),
            version(2, "P1", true),
            version(3, "P2", true),
        ];
        let current = project_current(&rows).unwrap();
        let ids: Vec<_> = current.iter().map(|v| v.surrogate_id).collect();
        assert_eq!(ids, vec![SurrogateId(2), SurrogateId(3)]);
    }

    #[test]
    fn test_two_current_rows_surface_as_error() {
        let rows = vec![version(1, "P1", true), version(2, "P1", true)];
        let result = project_current(&rows);
        assert!(matches!(
            result,
            Err(StoreError::IntegrityViolation { ref business_key, current_count: 2 })
                if business_key == "P1"
        ));
    }
}
