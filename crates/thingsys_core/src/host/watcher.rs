//! File watcher feeding the loader's signal queue.

use crate::host::loader::ReloadSignal;
use crate::host::sources::SourceKind;
use log::{debug, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

/// Keeps the platform watcher alive; dropping it stops notifications.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl SourceWatcher {
    /// Watches `dir` and forwards template file changes to `signals`.
    pub fn start(dir: &Path, signals: Sender<ReloadSignal>) -> notify::Result<Self> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let Some(paths) = relevant_paths(&event) else {
                        return;
                    };
                    debug!(
                        "event=source_watch module=host status=changed paths={}",
                        paths.len()
                    );
                    if signals.send(ReloadSignal::SourcesChanged(paths)).is_err() {
                        debug!("event=source_watch module=host status=receiver_gone");
                    }
                }
                Err(err) => warn!("event=source_watch module=host status=error error={}", err),
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        debug!(
            "event=source_watch module=host status=started dir={}",
            dir.display()
        );
        Ok(Self {
            _watcher: watcher,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Template paths touched by a content-changing event.
fn relevant_paths(event: &Event) -> Option<Vec<PathBuf>> {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    ) {
        return None;
    }
    let paths: Vec<PathBuf> = event
        .paths
        .iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(SourceKind::from_file_name)
                .is_some()
        })
        .cloned()
        .collect();
    (!paths.is_empty()).then_some(paths)
}
