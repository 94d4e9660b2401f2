//! Core type system and domain definitions
//!
//! Strongly-typed wrappers for organization, owner, repository, and cursor
//! values, plus the aggregate counters and the flat output row emitted for
//! every harvested repository.

pub mod repository;
pub mod stats;

pub use repository::*;
pub use stats::*;
