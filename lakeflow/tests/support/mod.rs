//! Shared helpers for the end-to-end pipeline tests.

use std::collections::HashMap;
use std::sync::Once;
use std::time::Duration;

use chrono::{DateTime, Utc};

use lakeflow::config::PipelineConfig;
use lakeflow::ingest::{encode_batch, normalize};
use lakeflow::orchestrator::Orchestrator;
use lakeflow::query::memory::MemoryQueryExecutor;
use lakeflow::store::memory::{MemoryObjectStore, MemoryReferenceStore};
use lakeflow::types::{ChangeOperation, EntityKind, RawChangeRecord, ScalarValue};

static TRACING: Once = Once::new();

/// Initializes test tracing once per process, honoring `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// In-memory collaborators plus configuration for one test pipeline.
pub struct TestPipeline {
    pub store: MemoryObjectStore,
    pub reference: MemoryReferenceStore,
    pub executor: MemoryQueryExecutor,
    pub config: PipelineConfig,
}

impl TestPipeline {
    pub fn new() -> Self {
        init_test_tracing();

        Self {
            store: MemoryObjectStore::new(),
            reference: MemoryReferenceStore::new(),
            executor: MemoryQueryExecutor::new(),
            config: PipelineConfig::new("lake", "analytics")
                .with_polling(Duration::from_millis(1), 5),
        }
    }

    /// Builds an orchestrator sharing this pipeline's collaborators.
    pub fn orchestrator(
        &self,
    ) -> Orchestrator<MemoryObjectStore, MemoryReferenceStore, MemoryQueryExecutor> {
        Orchestrator::new(
            self.store.clone(),
            self.reference.clone(),
            self.executor.clone(),
            self.config.clone(),
        )
    }

    /// Normalizes raw records into a batch object seeded at `last_modified`,
    /// returning its key.
    pub async fn seed_batch(
        &self,
        kind: EntityKind,
        name: &str,
        records: &[RawChangeRecord],
        last_modified: DateTime<Utc>,
    ) -> String {
        let normalized: Vec<_> = records
            .iter()
            .filter_map(|raw| normalize(raw, last_modified))
            .collect();
        let encoded = encode_batch(&normalized).expect("encode batch");

        let key = format!(
            "{}/{}/{name}.json",
            self.config.bronze_prefix,
            kind.descriptor().short_name,
        );
        self.store
            .insert_with_timestamp(&key, encoded, last_modified)
            .await;

        key
    }

    /// Returns every row staged for one entity kind across all merges so
    /// far, parsed from the write log since the pipeline deletes staging
    /// objects before returning.
    pub async fn staged_rows(&self, kind: EntityKind) -> Vec<serde_json::Value> {
        let prefix = format!(
            "{}/{}/",
            self.config.staging_prefix,
            kind.descriptor().short_name,
        );

        let mut rows = Vec::new();
        for (key, data) in self.store.writes().await {
            if !key.starts_with(&prefix) {
                continue;
            }
            let text = String::from_utf8(data).expect("staged rows are UTF-8");
            for line in text.lines().filter(|line| !line.trim().is_empty()) {
                rows.push(serde_json::from_str(line).expect("staged row is JSON"));
            }
        }

        rows
    }
}

fn payload(fields: &[(&str, ScalarValue)]) -> HashMap<String, ScalarValue> {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn raw_order(order_id: &str, customer_id: &str, total_amount: f64) -> RawChangeRecord {
    RawChangeRecord {
        source_table: "prod-Orders-table".to_string(),
        operation: ChangeOperation::Insert,
        capture_time: Utc::now(),
        payload: payload(&[
            ("OrderID", ScalarValue::from(order_id)),
            ("CustomerID", ScalarValue::from(customer_id)),
            ("OrderDate", ScalarValue::from("2024-06-01 12:00:00")),
            ("TotalAmount", ScalarValue::from(total_amount)),
        ]),
    }
}

pub fn raw_product(product_id: &str, name: &str, price: f64, stock_level: f64) -> RawChangeRecord {
    RawChangeRecord {
        source_table: "prod-Products-table".to_string(),
        operation: ChangeOperation::Modify,
        capture_time: Utc::now(),
        payload: payload(&[
            ("ProductID", ScalarValue::from(product_id)),
            ("Name", ScalarValue::from(name)),
            ("Price", ScalarValue::from(price)),
            ("StockLevel", ScalarValue::from(stock_level)),
        ]),
    }
}

pub fn raw_customer(customer_id: &str, name: &str, region: &str) -> RawChangeRecord {
    RawChangeRecord {
        source_table: "prod-Customers-table".to_string(),
        operation: ChangeOperation::Insert,
        capture_time: Utc::now(),
        payload: payload(&[
            ("CustomerID", ScalarValue::from(customer_id)),
            ("Name", ScalarValue::from(name)),
            ("Region", ScalarValue::from(region)),
        ]),
    }
}
