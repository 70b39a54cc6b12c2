//! Change event normalization and bronze batch writing.
//!
//! Converts heterogeneous captured change records into the canonical flat
//! shape and groups them into immutable JSON-lines batches on durable
//! storage. Remove-operation records are dropped: the engine tracks latest
//! state, not deletions.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{ErrorKind, FlowResult};
use crate::flow_error;
use crate::store::ObjectStore;
use crate::types::{
    ChangeOperation, EntityKind, NormalizedRecord, RawChangeRecord, ScalarValue,
};

/// A captured record whose shape the normalizer does not recognize.
///
/// Shape errors are never fatal to a batch: the caller skips the record and
/// logs the reason.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// The source table name maps to no tracked entity kind.
    #[error("source table '{0}' maps to no tracked entity")]
    UnknownSourceTable(String),
}

/// Converts one captured change record into zero or one normalized record.
///
/// Returns [`None`] for Remove operations and for unrecognized shapes, which
/// are logged and skipped. Numeric payload fields are already carried as
/// floating point; list fields are flattened to their scalar element values.
pub fn normalize(raw: &RawChangeRecord, processing_time: DateTime<Utc>) -> Option<NormalizedRecord> {
    if raw.operation == ChangeOperation::Remove {
        debug!(source_table = %raw.source_table, "dropping remove-operation record");
        return None;
    }

    match try_normalize(raw, processing_time) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(source_table = %raw.source_table, "skipping unrecognized record: {}", err);
            None
        }
    }
}

/// Fallible core of [`normalize`], exposed for tests that assert the shape
/// error itself.
pub fn try_normalize(
    raw: &RawChangeRecord,
    processing_time: DateTime<Utc>,
) -> Result<NormalizedRecord, ShapeError> {
    let entity = EntityKind::from_source_table(&raw.source_table)
        .ok_or_else(|| ShapeError::UnknownSourceTable(raw.source_table.clone()))?;

    let fields = raw
        .payload
        .iter()
        .map(|(name, value)| (name.clone(), flatten_value(value)))
        .collect();

    Ok(NormalizedRecord {
        entity,
        operation: raw.operation,
        capture_time: raw.capture_time,
        processing_time,
        fields,
    })
}

/// Flattens nested lists to a single level of scalar element values.
fn flatten_value(value: &ScalarValue) -> ScalarValue {
    match value {
        ScalarValue::List(values) => {
            let mut flattened = Vec::with_capacity(values.len());
            for value in values {
                match flatten_value(value) {
                    ScalarValue::List(inner) => flattened.extend(inner),
                    scalar => flattened.push(scalar),
                }
            }
            ScalarValue::List(flattened)
        }
        scalar => scalar.clone(),
    }
}

/// Encodes a batch of normalized records as JSON lines.
pub fn encode_batch(records: &[NormalizedRecord]) -> FlowResult<Vec<u8>> {
    let mut encoded = Vec::new();
    for record in records {
        serde_json::to_writer(&mut encoded, record)?;
        encoded.push(b'\n');
    }

    Ok(encoded)
}

/// Decodes a JSON-lines batch back into normalized records.
pub fn decode_batch(data: &[u8]) -> FlowResult<Vec<NormalizedRecord>> {
    let text = std::str::from_utf8(data)
        .map_err(|err| flow_error!(ErrorKind::BatchDecodeFailed, "Batch is not valid UTF-8", err))?;

    let mut records = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }

    Ok(records)
}

/// Writes normalized batches to durable storage under collision-free keys.
///
/// Keys are partitioned by processing date and suffixed with a random id so
/// concurrent writers capturing within the same second never collide.
#[derive(Debug)]
pub struct BatchWriter<'a, S> {
    store: &'a S,
    config: &'a PipelineConfig,
}

impl<'a, S> BatchWriter<'a, S>
where
    S: ObjectStore,
{
    /// Creates a writer over the given store.
    pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Writes one entity's records as a batch and returns its key.
    ///
    /// The batch is immutable once written; callers must not write the same
    /// key twice.
    pub async fn write_batch(
        &self,
        kind: EntityKind,
        records: &[NormalizedRecord],
    ) -> FlowResult<String> {
        let now = Utc::now();
        let batch_id = &Uuid::new_v4().simple().to_string()[..8];
        let key = format!(
            "{}/{}/year={}/month={:02}/day={:02}/{}_{}.json",
            self.config.bronze_prefix,
            kind.descriptor().short_name,
            now.format("%Y"),
            now.format("%m"),
            now.format("%d"),
            now.format("%Y%m%d%H%M%S"),
            batch_id,
        );

        let encoded = encode_batch(records)?;
        self.store.put(&key, encoded).await?;

        debug!(
            key = %key,
            records = records.len(),
            "wrote normalized batch"
        );

        Ok(key)
    }
}
