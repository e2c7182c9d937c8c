//! Composition engine: turns a Thing tree into HTML.

pub mod css;
pub mod engine;
pub mod scope;

pub use css::scope_css;
pub use engine::{
    CompositionEngine, RenderError, RenderResult, ThingSource, CHILDREN_SLOT,
    DEFAULT_MAX_RENDER_DEPTH, SYSTEM_ID_PLACEHOLDER,
};
pub use scope::{RandomScopeIds, ScopeIdGenerator, SequentialScopeIds};
