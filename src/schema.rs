//! Dimension schema: which payload fields are promoted, how they are typed,
//! and which of them trigger a new version.
//!
//! A schema is fixed configuration. Staging payloads are read against it
//! ("schema on read"): declared fields become typed attributes, the business
//! key field identifies the entity, and everything else lands in the residual
//! map untouched.

use crate::error::{Result, RowRejection, StoreError};
use crate::types::{AttributeSet, AttributeValue, Residual};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Declared type of a promoted attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Text,
    Integer,
    Float,
    Boolean,
}

impl AttributeKind {
    fn label(self) -> &'static str {
        match self {
            AttributeKind::Text => "text",
            AttributeKind::Integer => "integer",
            AttributeKind::Float => "float",
            AttributeKind::Boolean => "boolean",
        }
    }
}

/// Whether a change to an attribute opens a new version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeRole {
    /// Compared on every run; a difference creates a new version.
    Tracked,
    /// Stored with each new version but never compared.
    Passthrough,
}

/// Declaration of one promoted attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    pub role: AttributeRole,
}

/// A staging payload after projection through the schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedRow {
    pub business_key: String,
    pub attributes: AttributeSet,
    pub residual: Residual,
}

/// Typed layout of a dimension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSchema {
    /// Payload field holding the business key.
    pub business_key_field: String,

    /// Promoted attributes, in comparison order.
    pub attributes: Vec<AttributeSpec>,
}

impl Default for DimensionSchema {
    fn default() -> Self {
        Self::new("id")
    }
}

impl DimensionSchema {
    /// Create a schema with no promoted attributes.
    pub fn new(business_key_field: impl Into<String>) -> Self {
        Self {
            business_key_field: business_key_field.into(),
            attributes: Vec::new(),
        }
    }

    /// Add a tracked attribute.
    pub fn tracked(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.into(),
            kind,
            role: AttributeRole::Tracked,
        });
        self
    }

    /// Add a passthrough attribute.
    pub fn passthrough(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.into(),
            kind,
            role: AttributeRole::Passthrough,
        });
        self
    }

    /// Load a schema from its JSON form.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(s)
            .map_err(|e| StoreError::InvalidSchema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Tracked attributes, in declaration order.
    pub fn tracked_attributes(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes
            .iter()
            .filter(|a| a.role == AttributeRole::Tracked)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Check the schema is usable for reconciliation.
    pub fn validate(&self) -> Result<()> {
        if self.business_key_field.trim().is_empty() {
            return Err(StoreError::InvalidSchema(
                "business key field name is empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for attr in &self.attributes {
            if attr.name.trim().is_empty() {
                return Err(StoreError::InvalidSchema("attribute name is empty".into()));
            }
            if attr.name == self.business_key_field {
                return Err(StoreError::InvalidSchema(format!(
                    "attribute `{}` collides with the business key field",
                    attr.name
                )));
            }
            if !seen.insert(attr.name.as_str()) {
                return Err(StoreError::InvalidSchema(format!(
                    "attribute `{}` declared twice",
                    attr.name
                )));
            }
        }

        if self.tracked_attributes().next().is_none() {
            return Err(StoreError::InvalidSchema(
                "at least one tracked attribute is required".into(),
            ));
        }

        Ok(())
    }

    /// Read the business key from a payload.
    ///
    /// Strings are taken as-is (but must not be blank); integers are rendered
    /// in decimal. Anything else is unusable.
    pub fn read_business_key(&self, payload: &Value) -> std::result::Result<String, RowRejection> {
        let object = payload.as_object().ok_or(RowRejection::NotAnObject)?;
        let field = &self.business_key_field;

        match object.get(field) {
            None | Some(Value::Null) => Err(RowRejection::MissingBusinessKey(field.clone())),
            Some(Value::String(s)) if s.trim().is_empty() => Err(RowRejection::InvalidBusinessKey {
                field: field.clone(),
                detail: "blank string".into(),
            }),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Some(other) => Err(RowRejection::InvalidBusinessKey {
                field: field.clone(),
                detail: format!("unsupported value {}", other),
            }),
        }
    }

    /// Project a payload into typed attributes and a residual map.
    pub fn project(&self, payload: &Value) -> std::result::Result<ProjectedRow, RowRejection> {
        let business_key = self.read_business_key(payload)?;
        let object = payload.as_object().ok_or(RowRejection::NotAnObject)?;

        let mut attributes = AttributeSet::new();
        for spec in &self.attributes {
            if let Some(raw) = object.get(&spec.name) {
                if let Some(value) = parse_value(spec, raw)? {
                    attributes.insert(spec.name.clone(), value);
                }
            }
        }

        let residual = object
            .iter()
            .filter(|(k, _)| *k != &self.business_key_field && self.attribute(k).is_none())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(ProjectedRow {
            business_key,
            attributes,
            residual,
        })
    }
}

/// Parse one raw field into its declared kind. `Ok(None)` means absent.
fn parse_value(
    spec: &AttributeSpec,
    raw: &Value,
) -> std::result::Result<Option<AttributeValue>, RowRejection> {
    let invalid = |detail: String| RowRejection::InvalidField {
        field: spec.name.clone(),
        expected: spec.kind.label().to_string(),
        detail,
    };

    if raw.is_null() {
        return Ok(None);
    }

    match spec.kind {
        AttributeKind::Text => match raw {
            Value::String(s) => Ok(Some(AttributeValue::Text(s.clone()))),
            Value::Number(n) => Ok(Some(AttributeValue::Text(n.to_string()))),
            Value::Bool(b) => Ok(Some(AttributeValue::Text(b.to_string()))),
            other => Err(invalid(format!("unsupported value {}", other))),
        },
        AttributeKind::Integer => match raw {
            Value::Number(n) => n
                .as_i64()
                .map(|v| Some(AttributeValue::Integer(v)))
                .ok_or_else(|| invalid(format!("{} is not a 64-bit integer", n))),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|v| Some(AttributeValue::Integer(v)))
                .map_err(|e| invalid(format!("{:?}: {}", s, e))),
            other => Err(invalid(format!("unsupported value {}", other))),
        },
        AttributeKind::Float => {
            let parsed = match raw {
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| invalid(format!("{} is not representable", n)))?,
                Value::String(s) if s.trim().is_empty() => return Ok(None),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(format!("{:?}: {}", s, e)))?,
                other => return Err(invalid(format!("unsupported value {}", other))),
            };
            if !parsed.is_finite() {
                return Err(invalid(format!("{} is not finite", parsed)));
            }
            Ok(Some(AttributeValue::Float(parsed)))
        }
        AttributeKind::Boolean => match raw {
            Value::Bool(b) => Ok(Some(AttributeValue::Boolean(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Some(AttributeValue::Boolean(false))),
                Some(1) => Ok(Some(AttributeValue::Boolean(true))),
                _ => Err(invalid(format!("{} is not 0 or 1", n))),
            },
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(AttributeValue::Boolean(true))),
                "false" => Ok(Some(AttributeValue::Boolean(false))),
                _ => Err(invalid(format!("{:?}", s))),
            },
            other => Err(invalid(format!("unsupported value {}", other))),
        },
    }
}
