//! Incremental merge and refresh engine for a layered analytical dataset.
//!
//! Change events captured from a source-of-record are normalized into
//! immutable batches, deduplicated and enriched per entity, merged
//! idempotently into versioned entity tables through an external
//! query-execution facility, and finally rolled up into aggregate tables. A
//! persisted watermark brackets every run so reprocessing is bounded and a
//! failed run is safely retried.

pub mod aggregate;
pub mod concurrency;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod macros;
pub mod merge;
pub mod orchestrator;
pub mod query;
pub mod reader;
pub mod store;
pub mod types;
pub mod watermark;

pub use config::PipelineConfig;
pub use orchestrator::{Orchestrator, RunReport, RunTrigger};
