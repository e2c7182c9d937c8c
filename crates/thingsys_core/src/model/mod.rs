//! Content unit domain model.
//!
//! # Responsibility
//! - Define the Thing record, its component bundle and history snapshots.
//! - Hold the built-in templates new Things and the system Thing start from.
//!
//! # Invariants
//! - Every Thing is identified by a stable `ThingId`.
//! - History snapshots are immutable once appended.

pub mod template;
pub mod thing;
