//! HTTP surface: request/response types, router and first-party handlers.

pub mod handlers;
pub mod router;
pub mod types;
