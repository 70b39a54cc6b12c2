//! Configuration for the merge and refresh pipeline.

use std::time::Duration;

/// Configuration for one pipeline instance.
///
/// Storage layout, query-execution context and the operational knobs of the
/// run (lookback fallbacks, polling budget, aggregate window) all live here
/// so the orchestrator and its stages share one source of truth.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bucket holding bronze batches, staging artifacts and the watermark.
    pub bucket: String,

    /// Prefix under which normalized batches are written, per entity.
    pub bronze_prefix: String,

    /// Prefix under which merge staging batches are materialized.
    pub staging_prefix: String,

    /// Key of the persisted watermark object.
    pub watermark_key: String,

    /// Database name passed to the query-execution facility.
    pub database: String,

    /// Output location for query results.
    pub output_location: String,

    /// Scan window used when no watermark exists yet, in hours.
    pub default_lookback_hours: i64,

    /// Scan window used when the stored watermark is unreadable, in hours.
    /// Deliberately short: reprocessing is favored over data loss.
    pub corrupt_lookback_hours: i64,

    /// Interval between status polls of a submitted query.
    pub poll_interval: Duration,

    /// Maximum number of status polls before a query is treated as timed out.
    pub max_poll_attempts: u32,

    /// Trailing window, in days, recomputed by delta-refreshed aggregates.
    pub sales_window_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: "lake".to_string(),
            bronze_prefix: "bronze".to_string(),
            staging_prefix: "silver/staging".to_string(),
            watermark_key: "state/watermark.json".to_string(),
            database: "analytics".to_string(),
            output_location: "s3://lake/query-results/".to_string(),
            default_lookback_hours: 24,
            corrupt_lookback_hours: 1,
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 60,
            sales_window_days: 30,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration for the given bucket and database.
    pub fn new(bucket: impl Into<String>, database: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let output_location = format!("s3://{bucket}/query-results/");

        Self {
            bucket,
            database: database.into(),
            output_location,
            ..Default::default()
        }
    }

    /// Sets the polling cadence for query executions.
    pub fn with_polling(mut self, poll_interval: Duration, max_poll_attempts: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_poll_attempts = max_poll_attempts;
        self
    }

    /// Sets the trailing window for delta-refreshed aggregates.
    pub fn with_sales_window_days(mut self, days: u32) -> Self {
        self.sales_window_days = days;
        self
    }

    /// Returns the bronze listing prefix for one entity short name.
    pub fn bronze_entity_prefix(&self, short_name: &str) -> String {
        format!("{}/{}/", self.bronze_prefix, short_name)
    }

    /// Returns the `s3://` URI for an object key in the pipeline bucket.
    pub fn object_uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
