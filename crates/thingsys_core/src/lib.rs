//! Core domain logic for the Thing system.
//! This crate is the single source of truth for Thing invariants.

pub mod compose;
pub mod config;
pub mod db;
pub mod extension;
pub mod host;
pub mod http;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use compose::{CompositionEngine, RenderError, ThingSource};
pub use config::{ConfigError, Profile, ServiceConfig};
pub use host::{
    DirectorySources, LoaderError, LoaderState, ReloadSignal, SelfHostingLoader, SourceWatcher,
    RESTART_EXIT_CODE,
};
pub use http::handlers::FirstPartyHandlers;
pub use http::router::Router;
pub use http::types::{HttpMethod, HttpRequest, HttpResponse};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::thing::{ComponentBundle, ComponentPatch, HistorySnapshot, Thing, ThingId};
pub use repo::thing_repo::{RepoError, RepoResult, SqliteThingRepository, ThingRepository};
pub use service::content_store::{ContentStore, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
