//! Batch reading from durable storage.
//!
//! Lists every tracked entity prefix for batches written after the watermark
//! and loads them in capture order. Reading is best-effort: a batch that
//! fails to load or decode is logged and skipped, and remains visible to the
//! next run because the watermark has not advanced past it.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::FlowResult;
use crate::ingest::decode_batch;
use crate::store::{ObjectMeta, ObjectStore};
use crate::types::{EntityKind, NormalizedRecord};

/// One successfully loaded batch.
#[derive(Debug, Clone)]
pub struct LoadedBatch {
    /// Object key the batch was read from.
    pub key: String,
    /// Storage-level last-modified time of the batch object.
    pub last_modified: DateTime<Utc>,
    /// Decoded records, in the order they were written.
    pub records: Vec<NormalizedRecord>,
}

/// Result of one read pass.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Batches loaded, ordered by storage last-modified time.
    pub batches: Vec<LoadedBatch>,
    /// Batches that could not be loaded or decoded.
    pub batches_skipped: usize,
    /// Oldest last-modified time among skipped batches, when any were listed
    /// with metadata.
    pub oldest_skipped: Option<DateTime<Utc>>,
}

impl ReadOutcome {
    /// Returns the watermark candidate for this read: the newest loaded
    /// last-modified time, capped strictly below the oldest skipped batch.
    ///
    /// A skipped batch must stay visible to the next run, so the watermark
    /// may never move past it. When every loaded batch is newer than a
    /// skipped one there is no safe candidate and the advance is withheld.
    pub fn watermark_candidate(&self) -> Option<DateTime<Utc>> {
        let loaded = self.batches.iter().map(|batch| batch.last_modified);
        match self.oldest_skipped {
            Some(skipped) => loaded.filter(|time| *time < skipped).max(),
            None => loaded.max(),
        }
    }

    /// Returns the total number of records across loaded batches.
    pub fn record_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.records.len()).sum()
    }
}

/// Lists and loads normalized batches newer than the watermark.
#[derive(Debug)]
pub struct BatchReader<'a, S> {
    store: &'a S,
    config: &'a PipelineConfig,
}

impl<'a, S> BatchReader<'a, S>
where
    S: ObjectStore,
{
    /// Creates a reader over the given store.
    pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Loads all batches whose last-modified time is strictly greater than
    /// `watermark`, across all entity prefixes.
    pub async fn read_since(&self, watermark: DateTime<Utc>) -> FlowResult<ReadOutcome> {
        let mut metas = Vec::new();
        for kind in EntityKind::ALL {
            let prefix = self
                .config
                .bronze_entity_prefix(kind.descriptor().short_name);
            self.collect_newer_than(&prefix, watermark, &mut metas)
                .await?;
        }

        // Batches are processed in storage modification order so that within
        // the run, later captures overwrite earlier ones during dedup.
        metas.sort_by_key(|meta| meta.last_modified);

        info!(
            batches = metas.len(),
            watermark = %watermark,
            "listed batches newer than watermark"
        );

        self.load_all(metas).await
    }

    /// Loads an explicit set of batch keys, for event-driven invocations that
    /// already know which objects arrived.
    pub async fn read_keys(&self, keys: &[String]) -> FlowResult<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        for key in keys {
            match self.load_one(key).await {
                Some(records) => outcome.batches.push(LoadedBatch {
                    key: key.clone(),
                    // Explicit keys carry no listing metadata; the capture
                    // time bound stays with the scheduled runs.
                    last_modified: Utc::now(),
                    records,
                }),
                None => outcome.batches_skipped += 1,
            }
        }

        Ok(outcome)
    }

    /// Pages through one prefix, keeping objects newer than the watermark.
    ///
    /// Only object metadata is held per page, so arbitrarily long listings
    /// never materialize the full object set in memory.
    async fn collect_newer_than(
        &self,
        prefix: &str,
        watermark: DateTime<Utc>,
        metas: &mut Vec<ObjectMeta>,
    ) -> FlowResult<()> {
        let mut token = None;
        loop {
            let page = self.store.list(prefix, token.take()).await?;
            metas.extend(
                page.objects
                    .into_iter()
                    .filter(|meta| meta.last_modified > watermark),
            );

            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(()),
            }
        }
    }

    async fn load_all(&self, metas: Vec<ObjectMeta>) -> FlowResult<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        for meta in metas {
            match self.load_one(&meta.key).await {
                Some(records) => outcome.batches.push(LoadedBatch {
                    key: meta.key,
                    last_modified: meta.last_modified,
                    records,
                }),
                None => {
                    outcome.batches_skipped += 1;
                    outcome.oldest_skipped = Some(match outcome.oldest_skipped {
                        Some(existing) => existing.min(meta.last_modified),
                        None => meta.last_modified,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Loads and decodes a single batch, returning [`None`] when it cannot be
    /// read. The failure is logged; the batch stays visible to the next run.
    async fn load_one(&self, key: &str) -> Option<Vec<NormalizedRecord>> {
        let data = match self.store.get(key).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                warn!(key = %key, "listed batch no longer exists, skipping");
                return None;
            }
            Err(err) => {
                warn!(key = %key, "failed to read batch, skipping: {}", err);
                return None;
            }
        };

        match decode_batch(&data) {
            Ok(records) => Some(records),
            Err(err) => {
                warn!(key = %key, "failed to decode batch, skipping: {}", err);
                None
            }
        }
    }
}
