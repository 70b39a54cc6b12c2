use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntityKind;

/// A single typed field value carried by a change record.
///
/// [`ScalarValue`] is the closed set of value shapes the capture mechanism can
/// deliver: scalars plus one level of ordered lists of scalars. The serde
/// representation is untagged so staged batches contain plain JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Explicit null from the source.
    Null,
    /// Boolean field.
    Boolean(bool),
    /// Numeric field. All source numerics are coerced to floating point.
    Number(f64),
    /// Text field.
    Text(String),
    /// Ordered list of scalar values.
    List(Vec<ScalarValue>),
}

impl ScalarValue {
    /// Returns the textual content of this value, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the numeric content of this value, coercing numeric-looking
    /// text the way the capture format delivers numbers as strings.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScalarValue::Number(value) => Some(*value),
            ScalarValue::Text(value) => value.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Text(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Number(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

/// Kind of mutation captured at the source store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// A new item was created.
    Insert,
    /// An existing item was updated.
    Modify,
    /// An item was deleted. Remove records are dropped at normalization
    /// since the engine only tracks latest state.
    Remove,
}

/// One captured mutation as delivered by the change-capture mechanism.
///
/// [`RawChangeRecord`] is immutable once captured: the normalizer consumes it
/// and never mutates it. The `source_table` carries the provenance of the
/// record and is resolved to an [`EntityKind`] during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeRecord {
    /// Name of the source store table this change originated from.
    pub source_table: String,
    /// Kind of mutation.
    pub operation: ChangeOperation,
    /// Time at which the change was captured.
    pub capture_time: DateTime<Utc>,
    /// Field name to typed scalar mapping of the item's new state.
    pub payload: HashMap<String, ScalarValue>,
}

/// A flattened change record tagged with provenance and timing.
///
/// Produced by the normalizer and grouped into batches on durable storage.
/// Batches are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Entity kind resolved from the source table name.
    pub entity: EntityKind,
    /// Original operation kind, kept for provenance.
    pub operation: ChangeOperation,
    /// Time at which the change was captured.
    pub capture_time: DateTime<Utc>,
    /// Time at which the record was normalized.
    pub processing_time: DateTime<Utc>,
    /// Flattened field values under their source field names.
    pub fields: HashMap<String, ScalarValue>,
}

impl NormalizedRecord {
    /// Returns the text content of a field, or the empty string when the
    /// field is absent or not textual.
    pub fn text_field(&self, name: &str) -> String {
        self.fields
            .get(name)
            .and_then(|value| value.as_text())
            .unwrap_or_default()
            .to_string()
    }

    /// Returns the numeric content of a field, or zero when the field is
    /// absent or not numeric.
    pub fn number_field(&self, name: &str) -> f64 {
        self.fields
            .get(name)
            .and_then(|value| value.as_number())
            .unwrap_or_default()
    }
}
