//! Trait seams for the durable blob store and the reference entity store.
//!
//! The engine never talks to storage directly: every stage receives an
//! implementation of these traits, which keeps the external collaborators
//! injectable and testable with the in-memory doubles in [`memory`].

pub mod base;
pub mod memory;

pub use base::*;
