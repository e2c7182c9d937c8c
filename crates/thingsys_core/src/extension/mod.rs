//! Capability boundary for the system Thing's server fragment.
//!
//! The server fragment is a declarative route table. It is never evaluated as
//! code: its routes bind to first-party handlers and it only ever sees a store
//! accessor and a route registrar.

pub mod capability;
pub mod fragment;
pub mod runtime;
