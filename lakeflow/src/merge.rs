//! Staged, idempotent merges into the versioned entity tables.
//!
//! Each entity's deduplicated rows are materialized as a JSON staging object,
//! exposed to the query facility through a temporary external table, and
//! folded into the target table with a single MERGE keyed on the primary key.
//! Re-running the same rows converges to the same target state, so a crashed
//! run can safely be repeated.
//!
//! Staging artifacts are leased, not owned: the temporary table and the
//! staging object are dropped on every exit path, success or failure, so a
//! failed merge never leaves debris that a later CREATE would trip over.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::FlowResult;
use crate::query::{QueryExecutor, QueryRunner};
use crate::store::ObjectStore;
use crate::types::{EnrichedRow, EntityDescriptor, EntityKind};

/// Staging artifacts created for one merge, released when the merge finishes.
#[derive(Debug)]
struct StagingLease {
    temp_table: String,
    staging_key: String,
}

/// Merges deduplicated entity rows into their target tables.
#[derive(Debug)]
pub struct MergeEngine<'a, S, Q> {
    store: &'a S,
    runner: &'a QueryRunner<Q>,
    config: &'a PipelineConfig,
}

impl<'a, S, Q> MergeEngine<'a, S, Q>
where
    S: ObjectStore,
    Q: QueryExecutor,
{
    /// Creates an engine over the given store and query runner.
    pub fn new(store: &'a S, runner: &'a QueryRunner<Q>, config: &'a PipelineConfig) -> Self {
        Self {
            store,
            runner,
            config,
        }
    }

    /// Merges one entity's rows into its target table.
    ///
    /// Returns the number of rows staged. An empty row set is a no-op and
    /// issues no statements.
    pub async fn merge_entity(&self, kind: EntityKind, rows: &[&EnrichedRow]) -> FlowResult<usize> {
        if rows.is_empty() {
            debug!(entity = %kind, "no rows to merge");
            return Ok(0);
        }

        let descriptor = kind.descriptor();
        let lease = self.stage_rows(kind, rows).await?;

        let result = self.run_merge(descriptor, &lease).await;
        // Cleanup runs on every path so a failed merge leaves no temp table
        // or staging object behind.
        self.release(&lease).await;
        result?;

        info!(entity = %kind, rows = rows.len(), "merged entity rows");

        Ok(rows.len())
    }

    /// Writes the rows as a JSON-lines staging object under a per-merge
    /// directory, so the external table's location covers exactly this batch.
    async fn stage_rows(&self, kind: EntityKind, rows: &[&EnrichedRow]) -> FlowResult<StagingLease> {
        let descriptor = kind.descriptor();
        let now = Utc::now();
        let merge_id = &Uuid::new_v4().simple().to_string()[..8];

        let staging_dir = format!(
            "{}/{}/{}_{}",
            self.config.staging_prefix,
            descriptor.short_name,
            now.format("%Y%m%d%H%M%S"),
            merge_id,
        );
        let staging_key = format!("{staging_dir}/rows.json");

        let mut encoded = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut encoded, &row.to_json(descriptor))?;
            encoded.push(b'\n');
        }
        self.store.put(&staging_key, encoded).await?;

        debug!(
            entity = %kind,
            key = %staging_key,
            rows = rows.len(),
            "staged rows for merge"
        );

        Ok(StagingLease {
            temp_table: format!("temp_{}_{}", descriptor.table, now.timestamp()),
            staging_key,
        })
    }

    async fn run_merge(&self, descriptor: &EntityDescriptor, lease: &StagingLease) -> FlowResult<()> {
        self.runner
            .execute(ensure_target_table(descriptor, self.config))
            .await?;
        self.runner
            .execute(create_staging_table(descriptor, lease, self.config))
            .await?;
        self.runner
            .execute(merge_statement(descriptor, &lease.temp_table))
            .await?;

        Ok(())
    }

    /// Drops the temporary table and deletes the staging object, best effort.
    async fn release(&self, lease: &StagingLease) {
        self.runner
            .execute_best_effort(format!("DROP TABLE IF EXISTS {}", lease.temp_table))
            .await;

        if let Err(err) = self.store.delete(&lease.staging_key).await {
            warn!(key = %lease.staging_key, "failed to delete staging object: {}", err);
        }
    }
}

fn column_definitions(descriptor: &EntityDescriptor) -> String {
    descriptor
        .columns
        .iter()
        .map(|column| format!("{} {}", column.name, column.column_type.sql()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders the idempotent DDL for an entity's target table.
fn ensure_target_table(descriptor: &EntityDescriptor, config: &PipelineConfig) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}) \
         LOCATION '{}' \
         TBLPROPERTIES ('table_type' = 'ICEBERG')",
        descriptor.table,
        column_definitions(descriptor),
        config.object_uri(&format!("silver/iceberg/{}/", descriptor.short_name)),
    )
}

/// Renders the external table over the merge's staging directory.
fn create_staging_table(
    descriptor: &EntityDescriptor,
    lease: &StagingLease,
    config: &PipelineConfig,
) -> String {
    let staging_dir = lease
        .staging_key
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or(lease.staging_key.as_str());

    format!(
        "CREATE EXTERNAL TABLE {} ({}) \
         ROW FORMAT SERDE 'org.openx.data.jsonserde.JsonSerDe' \
         LOCATION '{}'",
        lease.temp_table,
        column_definitions(descriptor),
        config.object_uri(&format!("{staging_dir}/")),
    )
}

/// Renders the MERGE folding staged rows into the target table.
///
/// Matched rows rewrite only the descriptor's update columns, carrying the
/// primary key and original capture timestamp forward; unmatched rows insert
/// every column.
fn merge_statement(descriptor: &EntityDescriptor, temp_table: &str) -> String {
    let updates = descriptor
        .update_columns()
        .map(|column| format!("{name} = source.{name}", name = column.name))
        .collect::<Vec<_>>()
        .join(", ");

    let insert_columns = descriptor
        .columns
        .iter()
        .map(|column| column.name)
        .collect::<Vec<_>>()
        .join(", ");

    let insert_values = descriptor
        .columns
        .iter()
        .map(|column| format!("source.{}", column.name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "MERGE INTO {table} AS target \
         USING {temp_table} AS source \
         ON target.{key} = source.{key} \
         WHEN MATCHED THEN UPDATE SET {updates} \
         WHEN NOT MATCHED THEN INSERT ({insert_columns}) VALUES ({insert_values})",
        table = descriptor.table,
        key = descriptor.primary_key,
    )
}
