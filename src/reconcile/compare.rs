//! Tracked-attribute comparison.

use crate::schema::DimensionSchema;
use crate::types::{AttributeSet, AttributeValue};

/// Canonical form used for equality.
///
/// Absent, null and empty text all collapse to `Empty`. This is lossy: a
/// field that goes from `""` to missing is not a change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Normalized<'a> {
    Empty,
    Value(&'a AttributeValue),
}

/// Normalize an optional attribute value for comparison.
pub fn normalize(value: Option<&AttributeValue>) -> Normalized<'_> {
    match value {
        None => Normalized::Empty,
        Some(AttributeValue::Text(s)) if s.is_empty() => Normalized::Empty,
        Some(v) => Normalized::Value(v),
    }
}

/// Names of tracked attributes whose normalized values differ.
pub fn diff_tracked<'s>(
    schema: &'s DimensionSchema,
    staged: &AttributeSet,
    current: &AttributeSet,
) -> Vec<&'s str> {
    schema
        .tracked_attributes()
        .filter(|spec| {
            normalize(staged.get(&spec.name)) != normalize(current.get(&spec.name))
        })
        .map(|spec| spec.name.as_str())
        .collect()
}

/// Whether the staged attributes differ from the current version's on any
/// tracked attribute. Passthrough attributes are ignored.
pub fn attributes_differ(
    schema: &DimensionSchema,
    staged: &AttributeSet,
    current: &AttributeSet,
) -> bool {
    schema
        .tracked_attributes()
        .any(|spec| normalize(staged.get(&spec.name)) != normalize(current.get(&spec.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeKind;

    fn schema() -> DimensionSchema {
        DimensionSchema::new("id")
            .tracked("status", AttributeKind::Text)
            .tracked("age", AttributeKind::Integer)
            .passthrough("phone", AttributeKind::Text)
    }

    fn attrs(pairs: &[(&str, AttributeValue)]) -> AttributeSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_normalize_collapses_empty() {
        assert_eq!(normalize(None), Normalized::Empty);
        assert_eq!(normalize(Some(&AttributeValue::from(""))), Normalized::Empty);
        assert_ne!(normalize(Some(&AttributeValue::from(" "))), Normalized::Empty);
        assert_ne!(normalize(Some(&AttributeValue::Integer(0))), Normalized::Empty);
    }

    #[test]
    fn test_equal_tracked_attributes() {
        let a = attrs(&[("status", "Active".into()), ("age", AttributeValue::Integer(40))]);
        let b = attrs(&[("status", "Active".into()), ("age", AttributeValue::Integer(40))]);
        assert!(!attributes_differ(&schema(), &a, &b));
    }

    #[test]
    fn test_tracked_change_detected() {
        let a = attrs(&[("status", "Inactive".into())]);
        let b = attrs(&[("status", "Active".into())]);
        assert!(attributes_differ(&schema(), &a, &b));
        assert_eq!(diff_tracked(&schema(), &a, &b), vec!["status"]);
    }

    #[test]
    fn test_passthrough_change_ignored() {
        let a = attrs(&[("status", "Active".into()), ("phone", "111".into())]);
        let b = attrs(&[("status", "Active".into()), ("phone", "222".into())]);
        assert!(!attributes_differ(&schema(), &a, &b));
    }

    #[test]
    fn test_empty_string_equals_absent() {
        let a = attrs(&[("status", "".into())]);
        let b = attrs(&[]);
        assert!(!attributes_differ(&schema(), &a, &b));
        assert!(!attributes_differ(&schema(), &b, &a));
    }

    #[test]
    fn test_value_appearing_is_a_change() {
        let a = attrs(&[("age", AttributeValue::Integer(40))]);
        let b = attrs(&[]);
        assert!(attributes_differ(&schema(), &a, &b));
    }

    #[test]
    fn test_type_change_is_a_change() {
        let a = attrs(&[("status", AttributeValue::Integer(1))]);
        let b = attrs(&[("status", "1".into())]);
        assert!(attributes_differ(&schema(), &a, &b));
    }
}
