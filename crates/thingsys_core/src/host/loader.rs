//! Self-hosting boot and reload protocol.
//!
//! # Responsibility
//! - Reconcile the persisted system Thing with its on-disk sources.
//! - Drive the `ColdStart -> Loaded -> UpdateDetected -> Restarting` machine.
//! - Execute the system Thing's server fragment through the capability
//!   boundary.
//!
//! # Invariants
//! - One changed source yields exactly one new system snapshot.
//! - Unchanged sources never write history.
//! - `Restarting` is terminal for the process.

use crate::extension::runtime::{
    execute_server_fragment, ExecutionError, ExecutionReport, HandlerCatalog, RouteRegistrar,
    ServiceContext, StoreAccessor,
};
use crate::host::sources::{SourceFingerprints, SourceSnapshot, TemplateSources, UnreadableSource};
use crate::model::template::SYSTEM_VERSION;
use crate::model::thing::{TemplateHashes, Thing, ThingId};
use crate::service::content_store::{ContentStore, StoreError, SystemMeta};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Exit code asking the supervisor to start a fresh process.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Window in which queued change signals are merged into one check.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Lifecycle state of the running system definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    ColdStart,
    Loaded,
    UpdateDetected,
    Restarting,
}

impl LoaderState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::Loaded => "loaded",
            Self::UpdateDetected => "update_detected",
            Self::Restarting => "restarting",
        }
    }
}

/// Message from the source watcher to the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadSignal {
    /// One or more template files changed.
    SourcesChanged(Vec<PathBuf>),
    /// Stop waiting without restarting.
    Shutdown,
}

/// Loader failures.
#[derive(Debug)]
pub enum LoaderError {
    /// A template source could not be read at boot.
    ContentUnreadable { location: String, error: io::Error },
    /// The server fragment could not be executed.
    ExecutionFailure(ExecutionError),
    /// Reading or writing the system Thing failed.
    Store(StoreError),
    /// The requested transition is not valid from the current state.
    InvalidState(LoaderState),
}

impl Display for LoaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentUnreadable { location, error } => {
                write!(f, "system template source `{location}` is unreadable: {error}")
            }
            Self::ExecutionFailure(err) => write!(f, "server fragment execution failed: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InvalidState(state) => {
                write!(f, "operation not valid in loader state `{}`", state.as_str())
            }
        }
    }
}

impl Error for LoaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ContentUnreadable { error, .. } => Some(error),
            Self::ExecutionFailure(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::InvalidState(_) => None,
        }
    }
}

impl From<StoreError> for LoaderError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<UnreadableSource> for LoaderError {
    fn from(value: UnreadableSource) -> Self {
        Self::ContentUnreadable {
            location: value.location,
            error: value.error,
        }
    }
}

/// Boots and watches the system Thing definition.
pub struct SelfHostingLoader<S> {
    store: Arc<ContentStore>,
    sources: S,
    state: LoaderState,
    system_version: u32,
    debounce: Duration,
}

impl<S: TemplateSources> SelfHostingLoader<S> {
    pub fn new(store: Arc<ContentStore>, sources: S) -> Self {
        Self {
            store,
            sources,
            state: LoaderState::ColdStart,
            system_version: SYSTEM_VERSION,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Overrides the build-time system version.
    pub fn with_system_version(mut self, system_version: u32) -> Self {
        self.system_version = system_version;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn sources(&self) -> &S {
        &self.sources
    }

    /// Runs the cold-start reconcile.
    ///
    /// # Errors
    /// - `ContentUnreadable` when any source cannot be read.
    /// - `Store` when the system Thing cannot be read or written.
    pub fn boot(&mut self) -> Result<LoaderState, LoaderError> {
        if self.state != LoaderState::ColdStart {
            return Err(LoaderError::InvalidState(self.state));
        }
        let snapshot = SourceSnapshot::read(&self.sources)?;

        let existing = match self.store.get(&ThingId::system()) {
            Ok(thing) => Some(thing),
            Err(StoreError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        let Some(system) = existing else {
            let write = self.store.write_system(snapshot.components, self.meta(snapshot.hashes))?;
            info!(
                "event=loader_boot module=host status=created version={}",
                write.thing.version
            );
            return Ok(self.transition(LoaderState::Loaded));
        };

        if self.is_current(&system, |stored| *stored == snapshot.hashes) {
            info!(
                "event=loader_boot module=host status=unchanged version={}",
                system.version
            );
            return Ok(self.transition(LoaderState::Loaded));
        }

        self.transition(LoaderState::UpdateDetected);
        self.reconcile(snapshot)
    }

    /// Re-checks the sources after a change notification.
    ///
    /// Unreadable sources are logged and leave the loader `Loaded`.
    pub fn handle_signal(&mut self) -> Result<LoaderState, LoaderError> {
        if self.state != LoaderState::Loaded {
            return Err(LoaderError::InvalidState(self.state));
        }

        let system = self.store.get(&ThingId::system())?;
        let current = SourceFingerprints::compute(&self.sources);
        if self.is_current(&system, |stored| current.matches(stored)) {
            debug!("event=loader_check module=host status=unchanged");
            return Ok(self.state);
        }

        self.transition(LoaderState::UpdateDetected);
        match SourceSnapshot::read(&self.sources) {
            Ok(snapshot) => self.reconcile(snapshot),
            Err(unreadable) => {
                warn!(
                    "event=loader_check module=host status=unreadable source={} error={}",
                    unreadable.location, unreadable.error
                );
                Ok(self.transition(LoaderState::Loaded))
            }
        }
    }

    /// Waits for change signals until a restart is required.
    ///
    /// Signals queued within the debounce window are merged. Returns the
    /// final state: `Restarting`, or `Loaded` on shutdown or when every
    /// sender is gone.
    pub fn run(&mut self, signals: &Receiver<ReloadSignal>) -> Result<LoaderState, LoaderError> {
        while self.state == LoaderState::Loaded {
            let Ok(signal) = signals.recv() else {
                break;
            };
            let ReloadSignal::SourcesChanged(mut paths) = signal else {
                break;
            };

            let mut shutdown = false;
            loop {
                match signals.recv_timeout(self.debounce) {
                    Ok(ReloadSignal::SourcesChanged(more)) => paths.extend(more),
                    Ok(ReloadSignal::Shutdown) => {
                        shutdown = true;
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(
                "event=loader_signal module=host status=received paths={}",
                paths.len()
            );

            self.handle_signal()?;
            if shutdown {
                break;
            }
        }
        info!(
            "event=loader_run module=host status=stopped state={}",
            self.state.as_str()
        );
        Ok(self.state)
    }

    /// Executes the system Thing's server fragment.
    ///
    /// Only valid once `Loaded`. The fragment sees a store accessor and
    /// `registrar`, nothing else.
    pub fn execute_server_fragment(
        &self,
        catalog: &dyn HandlerCatalog,
        registrar: &mut dyn RouteRegistrar,
    ) -> Result<ExecutionReport, LoaderError> {
        if self.state != LoaderState::Loaded {
            return Err(LoaderError::InvalidState(self.state));
        }
        let system = self.store.get(&ThingId::system())?;
        let context = ServiceContext::new(StoreAccessor::new(Arc::clone(&self.store)), registrar);
        execute_server_fragment(&system.components.server_js, catalog, context).map_err(|err| {
            error!(
                "event=fragment_execute module=host status=error error={}",
                err
            );
            LoaderError::ExecutionFailure(err)
        })
    }

    fn reconcile(&mut self, snapshot: SourceSnapshot) -> Result<LoaderState, LoaderError> {
        let write = self
            .store
            .write_system(snapshot.components, self.meta(snapshot.hashes))?;
        let next = if write.snapshot_appended {
            LoaderState::Restarting
        } else {
            LoaderState::Loaded
        };
        info!(
            "event=loader_reconcile module=host status=ok version={} snapshot_appended={} next={}",
            write.thing.version,
            write.snapshot_appended,
            next.as_str()
        );
        Ok(self.transition(next))
    }

    fn is_current(
        &self,
        system: &Thing,
        hashes_match: impl FnOnce(&TemplateHashes) -> bool,
    ) -> bool {
        system.system_version == Some(self.system_version)
            && system.template_hashes.as_ref().is_some_and(hashes_match)
    }

    fn meta(&self, template_hashes: TemplateHashes) -> SystemMeta {
        SystemMeta {
            system_version: self.system_version,
            template_hashes,
        }
    }

    fn transition(&mut self, next: LoaderState) -> LoaderState {
        if self.state != next {
            debug!(
                "event=loader_transition module=host status=ok from={} to={}",
                self.state.as_str(),
                next.as_str()
            );
            self.state = next;
        }
        next
    }
}
