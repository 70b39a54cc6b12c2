//! Run orchestration.
//!
//! One orchestrator invocation executes the full stage sequence: read the
//! watermark, load newer batches, deduplicate and enrich, merge each entity,
//! refresh aggregates, advance the watermark. The watermark moves only after
//! every downstream stage succeeded, so a failed run leaves it unchanged and
//! the window visible to the next invocation.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::aggregate::AggregateRefresher;
use crate::concurrency::shutdown::{create_shutdown_channel, ShutdownTx};
use crate::config::PipelineConfig;
use crate::dedup::DedupStage;
use crate::error::FlowResult;
use crate::merge::MergeEngine;
use crate::query::{QueryExecutor, QueryRunner};
use crate::reader::BatchReader;
use crate::store::{ObjectStore, ReferenceStore};
use crate::types::EntityKind;
use crate::watermark::WatermarkStore;

/// How a run was invoked.
#[derive(Debug, Clone)]
pub enum RunTrigger {
    /// Time-based invocation: scan everything newer than the watermark.
    Scheduled,
    /// Event-based invocation carrying the keys of newly arrived batches.
    ///
    /// Event runs process exactly the named batches and do not advance the
    /// watermark, leaving window accounting to the scheduled runs.
    BatchArrivals(Vec<String>),
}

/// Structured result of one successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Batches loaded in this run.
    pub batches_read: usize,
    /// Batches that could not be loaded or decoded.
    pub batches_skipped: usize,
    /// Records across all loaded batches.
    pub records_read: usize,
    /// Rows staged and merged, per entity kind.
    pub rows_merged: Vec<(EntityKind, usize)>,
    /// Aggregates refreshed after the merges.
    pub aggregates_refreshed: usize,
    /// The watermark after the run, when the run advanced it.
    pub watermark: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Renders a one-line human-readable summary.
    pub fn summary(&self) -> String {
        let merged = self
            .rows_merged
            .iter()
            .map(|(kind, rows)| format!("{kind}={rows}"))
            .collect::<Vec<_>>()
            .join(" ");

        let watermark = self
            .watermark
            .map(|watermark| watermark.to_rfc3339())
            .unwrap_or_else(|| "unchanged".to_string());

        format!(
            "read {} batches ({} skipped), {} records; merged {}; refreshed {} aggregates; watermark {}",
            self.batches_read,
            self.batches_skipped,
            self.records_read,
            merged,
            self.aggregates_refreshed,
            watermark,
        )
    }
}

/// Sequences the pipeline stages for one invocation at a time.
///
/// External collaborators are injected at construction so tests drive the
/// orchestrator end to end against in-memory doubles.
#[derive(Debug)]
pub struct Orchestrator<S, R, Q> {
    store: S,
    reference: R,
    runner: QueryRunner<Q>,
    config: PipelineConfig,
    shutdown_tx: ShutdownTx,
}

impl<S, R, Q> Orchestrator<S, R, Q>
where
    S: ObjectStore,
    R: ReferenceStore,
    Q: QueryExecutor,
{
    /// Creates an orchestrator over the given collaborators.
    pub fn new(store: S, reference: R, executor: Q, config: PipelineConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let runner = QueryRunner::new(executor, &config, shutdown_rx);

        Self {
            store,
            reference,
            runner,
            config,
            shutdown_tx,
        }
    }

    /// Returns a handle that interrupts in-flight query waits when signalled.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Executes one full run.
    ///
    /// Any merge or aggregate failure aborts the run without touching the
    /// watermark; the next scheduled run retries the same window and the
    /// merge idempotence makes the retry safe.
    pub async fn run(&self, trigger: RunTrigger) -> FlowResult<RunReport> {
        let watermarks = WatermarkStore::new(&self.store, &self.config);
        let watermark = watermarks.read().await?;

        let reader = BatchReader::new(&self.store, &self.config);
        let outcome = match &trigger {
            RunTrigger::Scheduled => {
                reader.read_since(watermark.last_processed_time).await?
            }
            RunTrigger::BatchArrivals(keys) => reader.read_keys(keys).await?,
        };

        if outcome.batches.is_empty() {
            info!("no new batches since watermark");
        }

        let processed_at = Utc::now();
        let dedup = DedupStage::new(&self.reference);
        let row_sets = dedup.collapse(&outcome.batches, processed_at).await?;

        let merge = MergeEngine::new(&self.store, &self.runner, &self.config);
        let mut rows_merged = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let rows = row_sets.rows(kind);
            let merged = merge.merge_entity(kind, &rows).await?;
            rows_merged.push((kind, merged));
        }

        let refresher = AggregateRefresher::new(&self.runner, &self.config);
        let aggregates_refreshed = refresher.refresh_all().await?;

        // Every downstream stage succeeded; only now does the watermark
        // move, so any failure above leaves it untouched. The candidate is
        // capped below the oldest skipped batch, which must stay visible.
        let advanced = match &trigger {
            RunTrigger::Scheduled => match outcome.watermark_candidate() {
                Some(candidate) => {
                    Some(watermarks.advance(candidate).await?.last_processed_time)
                }
                None => {
                    if outcome.batches_skipped > 0 {
                        warn!(
                            batches_skipped = outcome.batches_skipped,
                            "withholding watermark advance, skipped batches must stay visible"
                        );
                    }
                    None
                }
            },
            RunTrigger::BatchArrivals(_) => None,
        };

        let report = RunReport {
            batches_read: outcome.batches.len(),
            batches_skipped: outcome.batches_skipped,
            records_read: outcome.record_count(),
            rows_merged,
            aggregates_refreshed,
            watermark: advanced,
        };

        info!("run complete: {}", report.summary());

        Ok(report)
    }
}
