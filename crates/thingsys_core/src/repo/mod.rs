//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the persistence contract the content store writes through.
//! - Isolate SQLite and record-encoding details from store orchestration.
//!
//! # Invariants
//! - Every write stores the whole record, history included.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod thing_repo;
