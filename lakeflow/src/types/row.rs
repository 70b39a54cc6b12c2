use serde_json::{Map, Value};

use crate::types::{ColumnType, EntityDescriptor, ScalarValue};

/// One deduplicated, enriched row destined for an entity's target table.
///
/// Values are ordered to match the entity descriptor's column order, the same
/// way a table row mirrors its table schema. The primary key is kept
/// separately because deduplication and merge matching key on it.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    /// Primary key value of the business entity.
    pub key: String,
    /// Column values in descriptor column order.
    pub values: Vec<ScalarValue>,
}

impl EnrichedRow {
    /// Creates a row after checking the value count against the descriptor.
    ///
    /// Callers build values positionally, so a mismatch is a programming
    /// error in the shaping code rather than bad input.
    pub fn new(key: String, values: Vec<ScalarValue>, descriptor: &EntityDescriptor) -> Self {
        debug_assert_eq!(values.len(), descriptor.columns.len());
        Self { key, values }
    }

    /// Renders the row as a self-describing JSON object keyed by column name.
    ///
    /// Integer columns are emitted as JSON integers even though the engine
    /// carries all numerics as floating point.
    pub fn to_json(&self, descriptor: &EntityDescriptor) -> Value {
        let mut object = Map::with_capacity(self.values.len());
        for (column, value) in descriptor.columns.iter().zip(&self.values) {
            let rendered = match (column.column_type, value) {
                (ColumnType::Int, ScalarValue::Number(number)) => Value::from(*number as i64),
                _ => scalar_to_json(value),
            };
            object.insert(column.name.to_string(), rendered);
        }
        Value::Object(object)
    }
}

fn scalar_to_json(value: &ScalarValue) -> Value {
    match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::Boolean(value) => Value::from(*value),
        ScalarValue::Number(value) => Value::from(*value),
        ScalarValue::Text(value) => Value::from(value.clone()),
        ScalarValue::List(values) => Value::from(
            values
                .iter()
                .map(scalar_to_json)
                .collect::<Vec<_>>(),
        ),
    }
}
