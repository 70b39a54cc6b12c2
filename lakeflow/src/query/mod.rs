//! Interface to the external query-execution facility.
//!
//! The engine issues set-based SQL statements (DDL, DELETE, INSERT, MERGE)
//! through the [`QueryExecutor`] trait and waits for completion with the
//! bounded, cancellation-aware poll loop in [`QueryRunner`].

pub mod executor;
pub mod memory;

pub use executor::*;
