//! Deduplication and enrichment of normalized records.
//!
//! Collapses the run's records to the latest version per primary key and
//! shapes them into rows for the target tables. Order rows are enriched with
//! customer attributes from the reference store; a lookup miss yields empty
//! attributes rather than dropping the record.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::error::FlowResult;
use crate::reader::LoadedBatch;
use crate::store::ReferenceStore;
use crate::types::{EnrichedRow, EntityKind, NormalizedRecord, ScalarValue};

/// The deduplicated, enriched output of one run, per entity kind.
///
/// Within each kind, rows are addressable by primary key with no duplicates.
/// This is the invariant downstream merge idempotence depends on: merging the
/// same key twice in one statement would make the MERGE non-deterministic.
#[derive(Debug, Default)]
pub struct EntityRowSets {
    sets: HashMap<EntityKind, HashMap<String, EnrichedRow>>,
}

impl EntityRowSets {
    /// Returns the rows for one entity kind, in unspecified order.
    pub fn rows(&self, kind: EntityKind) -> Vec<&EnrichedRow> {
        self.sets
            .get(&kind)
            .map(|rows| rows.values().collect())
            .unwrap_or_default()
    }

    /// Returns the number of rows held for one entity kind.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.sets.get(&kind).map(HashMap::len).unwrap_or_default()
    }

    /// Returns `true` when no entity kind has any rows.
    pub fn is_empty(&self) -> bool {
        self.sets.values().all(HashMap::is_empty)
    }

    fn upsert(&mut self, kind: EntityKind, row: EnrichedRow) {
        // Last writer wins within the batch window: scan order is capture
        // order because the reader sorts batches by modification time.
        self.sets.entry(kind).or_default().insert(row.key.clone(), row);
    }
}

/// Collapses and enriches the records read in one run.
#[derive(Debug)]
pub struct DedupStage<'a, R> {
    reference: &'a R,
}

impl<'a, R> DedupStage<'a, R>
where
    R: ReferenceStore,
{
    /// Creates a stage over the given reference store.
    pub fn new(reference: &'a R) -> Self {
        Self { reference }
    }

    /// Processes all loaded batches into per-kind deduplicated row sets.
    ///
    /// `processed_at` becomes the processing timestamp of every shaped row,
    /// so re-running the same window differs only in that column.
    pub async fn collapse(
        &self,
        batches: &[LoadedBatch],
        processed_at: DateTime<Utc>,
    ) -> FlowResult<EntityRowSets> {
        let mut sets = EntityRowSets::default();

        for batch in batches {
            for record in &batch.records {
                match self.shape(record, processed_at).await? {
                    Some(row) => sets.upsert(record.entity, row),
                    None => {
                        warn!(
                            entity = %record.entity,
                            key = %batch.key,
                            "record is missing its primary key, skipping"
                        );
                    }
                }
            }
        }

        for kind in EntityKind::ALL {
            debug!(entity = %kind, rows = sets.len(kind), "deduplicated entity rows");
        }

        Ok(sets)
    }

    /// Shapes one normalized record into a target-table row.
    ///
    /// Absent fields default to a type-appropriate empty value (empty string,
    /// zero). Returns [`None`] when the record has no primary key to merge
    /// on.
    async fn shape(
        &self,
        record: &NormalizedRecord,
        processed_at: DateTime<Utc>,
    ) -> FlowResult<Option<EnrichedRow>> {
        let event_timestamp = timestamp_text(record.capture_time);
        let processing_timestamp = timestamp_text(processed_at);

        let row = match record.entity {
            EntityKind::Order => {
                let order_id = record.text_field("OrderID");
                if order_id.is_empty() {
                    return Ok(None);
                }

                let customer_id = record.text_field("CustomerID");
                let profile = self.enrich_customer(&customer_id).await;

                EnrichedRow::new(
                    order_id.clone(),
                    vec![
                        ScalarValue::Text(order_id),
                        ScalarValue::Text(customer_id),
                        ScalarValue::Text(record.text_field("OrderDate")),
                        ScalarValue::Number(record.number_field("TotalAmount")),
                        ScalarValue::Text(profile.0),
                        ScalarValue::Text(profile.1),
                        ScalarValue::Text(event_timestamp),
                        ScalarValue::Text(processing_timestamp),
                    ],
                    record.entity.descriptor(),
                )
            }
            EntityKind::Product => {
                let product_id = record.text_field("ProductID");
                if product_id.is_empty() {
                    return Ok(None);
                }

                EnrichedRow::new(
                    product_id.clone(),
                    vec![
                        ScalarValue::Text(product_id),
                        ScalarValue::Text(record.text_field("Name")),
                        ScalarValue::Number(record.number_field("Price")),
                        ScalarValue::Number(record.number_field("StockLevel")),
                        ScalarValue::Text(event_timestamp),
                        ScalarValue::Text(processing_timestamp),
                    ],
                    record.entity.descriptor(),
                )
            }
            EntityKind::Customer => {
                let customer_id = record.text_field("CustomerID");
                if customer_id.is_empty() {
                    return Ok(None);
                }

                EnrichedRow::new(
                    customer_id.clone(),
                    vec![
                        ScalarValue::Text(customer_id),
                        ScalarValue::Text(record.text_field("Name")),
                        ScalarValue::Text(record.text_field("Region")),
                        ScalarValue::Text(event_timestamp),
                        ScalarValue::Text(processing_timestamp),
                    ],
                    record.entity.descriptor(),
                )
            }
        };

        Ok(Some(row))
    }

    /// Looks up the customer attributes for an order.
    ///
    /// Misses and transient lookup failures both yield empty attributes: the
    /// order is still merged, just without denormalized customer data.
    async fn enrich_customer(&self, customer_id: &str) -> (String, String) {
        if customer_id.is_empty() {
            return (String::new(), String::new());
        }

        match self.reference.lookup_customer(customer_id).await {
            Ok(Some(profile)) => (profile.name, profile.region),
            Ok(None) => (String::new(), String::new()),
            Err(err) => {
                warn!(customer_id = %customer_id, "customer lookup failed, enriching with defaults: {}", err);
                (String::new(), String::new())
            }
        }
    }
}

fn timestamp_text(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::store::memory::MemoryReferenceStore;
    use crate::types::ChangeOperation;

    fn order_record(order_id: &str, customer_id: &str, amount: f64) -> NormalizedRecord {
        let mut fields = HashMap::new();
        fields.insert("OrderID".to_string(), ScalarValue::from(order_id));
        fields.insert("CustomerID".to_string(), ScalarValue::from(customer_id));
        fields.insert("TotalAmount".to_string(), ScalarValue::from(amount));

        NormalizedRecord {
            entity: EntityKind::Order,
            operation: ChangeOperation::Insert,
            capture_time: Utc::now(),
            processing_time: Utc::now(),
            fields,
        }
    }

    fn product_record(product_id: &str, stock: f64) -> NormalizedRecord {
        let mut fields = HashMap::new();
        fields.insert("ProductID".to_string(), ScalarValue::from(product_id));
        fields.insert("StockLevel".to_string(), ScalarValue::from(stock));

        NormalizedRecord {
            entity: EntityKind::Product,
            operation: ChangeOperation::Modify,
            capture_time: Utc::now(),
            processing_time: Utc::now(),
            fields,
        }
    }

    fn batch(records: Vec<NormalizedRecord>) -> LoadedBatch {
        LoadedBatch {
            key: "bronze/test.json".to_string(),
            last_modified: Utc::now(),
            records,
        }
    }

    #[tokio::test]
    async fn last_record_per_key_wins() {
        let reference = MemoryReferenceStore::new();
        let stage = DedupStage::new(&reference);

        let batches = vec![batch(vec![
            product_record("P1", 5.0),
            product_record("P1", 80.0),
        ])];
        let sets = stage.collapse(&batches, Utc::now()).await.unwrap();

        assert_eq!(sets.len(EntityKind::Product), 1);
        let rows = sets.rows(EntityKind::Product);
        let descriptor = EntityKind::Product.descriptor();
        assert_eq!(rows[0].to_json(descriptor)["stocklevel"], serde_json::json!(80));
    }

    #[tokio::test]
    async fn orders_are_enriched_from_the_reference_store() {
        let reference = MemoryReferenceStore::new();
        reference.insert_customer("C1", "Acme", "US-East").await;
        let stage = DedupStage::new(&reference);

        let batches = vec![batch(vec![order_record("O1", "C1", 42.5)])];
        let sets = stage.collapse(&batches, Utc::now()).await.unwrap();

        let rows = sets.rows(EntityKind::Order);
        let json = rows[0].to_json(EntityKind::Order.descriptor());
        assert_eq!(json["customer_region"], serde_json::json!("US-East"));
        assert_eq!(json["customer_name"], serde_json::json!("Acme"));
        assert_eq!(json["totalamount"], serde_json::json!(42.5));
    }

    #[tokio::test]
    async fn lookup_miss_defaults_to_empty_attributes() {
        let reference = MemoryReferenceStore::new();
        let stage = DedupStage::new(&reference);

        let batches = vec![batch(vec![order_record("O1", "C-missing", 10.0)])];
        let sets = stage.collapse(&batches, Utc::now()).await.unwrap();

        let rows = sets.rows(EntityKind::Order);
        assert_eq!(rows.len(), 1);
        let json = rows[0].to_json(EntityKind::Order.descriptor());
        assert_eq!(json["customer_region"], serde_json::json!(""));
    }

    #[tokio::test]
    async fn records_without_a_primary_key_are_skipped() {
        let reference = MemoryReferenceStore::new();
        let stage = DedupStage::new(&reference);

        let mut record = product_record("P1", 5.0);
        record.fields.remove("ProductID");

        let sets = stage
            .collapse(&[batch(vec![record])], Utc::now())
            .await
            .unwrap();
        assert!(sets.is_empty());
    }
}
