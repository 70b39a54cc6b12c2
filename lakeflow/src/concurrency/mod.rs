//! Concurrency primitives for run coordination.

pub mod shutdown;
