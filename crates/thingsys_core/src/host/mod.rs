//! Self-hosting loader: boot reconcile, change watching and restart signalling.

pub mod loader;
pub mod sources;
pub mod watcher;

pub use loader::{LoaderError, LoaderState, ReloadSignal, SelfHostingLoader, RESTART_EXIT_CODE};
pub use sources::{DirectorySources, SourceKind, TemplateSources};
pub use watcher::SourceWatcher;
