//! Watermark persistence and advancement.
//!
//! The watermark is the timestamp boundary below which all change events are
//! considered durably processed. It brackets every run: the reader scans only
//! batches newer than it, and the orchestrator advances it only after every
//! downstream stage of the run has succeeded. A failed run therefore leaves it
//! unchanged and the next run reprocesses the same window, relying on merge
//! idempotence to make that safe.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::FlowResult;
use crate::store::ObjectStore;

/// The persisted high-water mark of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    /// Everything captured before this time has been durably processed.
    pub last_processed_time: DateTime<Utc>,
    /// When the watermark was last written.
    pub updated_at: DateTime<Utc>,
}

/// Reads and advances the watermark object at its well-known key.
#[derive(Debug)]
pub struct WatermarkStore<'a, S> {
    store: &'a S,
    config: &'a PipelineConfig,
}

impl<'a, S> WatermarkStore<'a, S>
where
    S: ObjectStore,
{
    /// Creates a watermark store over the given object store.
    pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Reads the current watermark.
    ///
    /// Fallbacks are conservative and never fatal: a missing watermark yields
    /// "now minus the default lookback" (first run), and an unreadable or
    /// corrupt one yields "now minus the corrupt lookback", favoring
    /// reprocessing over data loss.
    pub async fn read(&self) -> FlowResult<Watermark> {
        let key = &self.config.watermark_key;

        let data = match self.store.get(key).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                let fallback = Utc::now() - Duration::hours(self.config.default_lookback_hours);
                info!(
                    key = %key,
                    lookback_hours = self.config.default_lookback_hours,
                    "no watermark found, starting from default lookback"
                );
                return Ok(Watermark {
                    last_processed_time: fallback,
                    updated_at: Utc::now(),
                });
            }
            Err(err) => {
                warn!(key = %key, "watermark read failed, using corrupt fallback: {}", err);
                return Ok(self.corrupt_fallback());
            }
        };

        match serde_json::from_slice::<Watermark>(&data) {
            Ok(watermark) => Ok(watermark),
            Err(err) => {
                warn!(key = %key, "watermark is corrupt, using conservative fallback: {}", err);
                Ok(self.corrupt_fallback())
            }
        }
    }

    /// Advances the watermark to `candidate`, never regressing it.
    ///
    /// Only the orchestrator calls this, and only after all downstream work
    /// in the run has succeeded. A candidate older than the stored value keeps the
    /// stored value, preserving monotonicity across runs.
    pub async fn advance(&self, candidate: DateTime<Utc>) -> FlowResult<Watermark> {
        let current = self.read().await?;
        let last_processed_time = if candidate < current.last_processed_time {
            warn!(
                candidate = %candidate,
                current = %current.last_processed_time,
                "watermark candidate is older than stored value, keeping stored value"
            );
            current.last_processed_time
        } else {
            candidate
        };

        let watermark = Watermark {
            last_processed_time,
            updated_at: Utc::now(),
        };

        let encoded = serde_json::to_vec(&watermark)?;
        self.store.put(&self.config.watermark_key, encoded).await?;

        info!(last_processed_time = %watermark.last_processed_time, "watermark advanced");

        Ok(watermark)
    }

    fn corrupt_fallback(&self) -> Watermark {
        Watermark {
            last_processed_time: Utc::now()
                - Duration::hours(self.config.corrupt_lookback_hours),
            updated_at: Utc::now(),
        }
    }
}
