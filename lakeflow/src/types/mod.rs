//! Common types used throughout the merge and refresh engine.
//!
//! Re-exports change records, scalar values, entity descriptors and enriched
//! rows used across the pipeline stages.

mod entity;
mod record;
mod row;

pub use entity::*;
pub use record::*;
pub use row::*;
