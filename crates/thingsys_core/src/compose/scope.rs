//! Render-instance scope identifiers.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Produces one fresh scope id per rendered Thing instance.
///
/// Ids are used verbatim inside HTML attribute values and CSS attribute
/// selectors, so implementations must only emit `[A-Za-z0-9_-]`.
pub trait ScopeIdGenerator: Send + Sync {
    fn next_scope_id(&self) -> String;
}

/// Random 128-bit ids, `t-<32 hex>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomScopeIds;

impl ScopeIdGenerator for RandomScopeIds {
    fn next_scope_id(&self) -> String {
        format!("t-{}", Uuid::new_v4().simple())
    }
}

/// Deterministic `t-1`, `t-2`, ... ids.
#[derive(Debug, Default)]
pub struct SequentialScopeIds {
    issued: AtomicU64,
}

impl SequentialScopeIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScopeIdGenerator for SequentialScopeIds {
    fn next_scope_id(&self) -> String {
        let next = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        format!("t-{next}")
    }
}
