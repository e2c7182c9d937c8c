//! Content store use-case service.
//!
//! # Responsibility
//! - Own identity, version history and persistence of every Thing.
//! - Enforce parent/child referential integrity and acyclicity.
//!
//! # Invariants
//! - This is the only component that mutates stored Things.
//! - Mutation of one Thing is serialized through its own lock.
//! - Structural mutations hold the structure lock and take Thing locks in id
//!   order.
//! - A mutation is committed to memory only after it was persisted.

use crate::model::template::{default_components, SYSTEM_THING_NAME};
use crate::model::thing::{
    now_epoch_ms, ComponentBundle, ComponentPatch, TemplateHashes, Thing, ThingId,
    DEFAULT_ORDER, DEFAULT_THING_NAME, SYSTEM_THING_TYPE,
};
use crate::repo::thing_repo::{RepoError, ThingRepository};
use log::{debug, info};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from content store operations.
#[derive(Debug)]
pub enum StoreError {
    /// No record backs this id.
    NotFound(ThingId),
    /// Restore target is absent from history.
    VersionNotFound { id: ThingId, version: u64 },
    /// Attaching would make a Thing its own ancestor.
    CycleRejected { parent: ThingId, child: ThingId },
    /// The system Thing cannot be deleted.
    SystemThingProtected,
    /// Persistence failure.
    Repo(RepoError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "thing not found: {id}"),
            Self::VersionNotFound { id, version } => {
                write!(f, "version {version} not found for thing {id}")
            }
            Self::CycleRejected { parent, child } => write!(
                f,
                "attaching {child} under {parent} would create a cycle"
            ),
            Self::SystemThingProtected => write!(f, "the system thing cannot be deleted"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for StoreError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Metadata the loader stamps onto the system Thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMeta {
    pub system_version: u32,
    pub template_hashes: TemplateHashes,
}

/// Result of writing the system Thing definition.
#[derive(Debug, Clone)]
pub struct SystemWrite {
    pub thing: Thing,
    /// `true` when the system record did not exist before.
    pub created: bool,
    /// `true` when a new history snapshot was appended.
    pub snapshot_appended: bool,
}

type Entry = Arc<Mutex<Thing>>;
type Locked = (ThingId, ArcMutexGuard<RawMutex, Thing>);

/// Keyed, persisted arena of Things.
pub struct ContentStore {
    repo: Mutex<Box<dyn ThingRepository>>,
    entries: RwLock<HashMap<ThingId, Entry>>,
    structure: Mutex<()>,
}

impl ContentStore {
    /// Builds the store by loading every persisted record.
    pub fn open(repo: impl ThingRepository + 'static) -> StoreResult<Self> {
        let things = repo.load_all()?;
        info!(
            "event=store_open module=store status=ok things={}",
            things.len()
        );
        let entries = things
            .into_iter()
            .map(|thing| (thing.id.clone(), Arc::new(Mutex::new(thing))))
            .collect();
        Ok(Self {
            repo: Mutex::new(Box::new(repo)),
            entries: RwLock::new(entries),
            structure: Mutex::new(()),
        })
    }

    /// Creates and persists a Thing with default components.
    ///
    /// # Contract
    /// - Fresh id, version 0, empty history.
    /// - Blank names fall back to the default name.
    pub fn create(&self, name: &str) -> StoreResult<Thing> {
        let name = match name.trim() {
            "" => DEFAULT_THING_NAME,
            trimmed => trimmed,
        };
        let thing = Thing::new(name, default_components());
        self.repo.lock().write_things(&[&thing])?;
        self.entries
            .write()
            .insert(thing.id.clone(), Arc::new(Mutex::new(thing.clone())));
        info!("event=thing_create module=store status=ok id={}", thing.id);
        Ok(thing)
    }

    /// Returns a snapshot of one Thing.
    pub fn get(&self, id: &ThingId) -> StoreResult<Thing> {
        let entry = self.entry(id)?;
        let thing = entry.lock().clone();
        Ok(thing)
    }

    /// Returns `true` when a record backs `id`.
    pub fn contains(&self, id: &ThingId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Lists snapshots of all Things ordered by creation time then id.
    pub fn list(&self) -> Vec<Thing> {
        let entries: Vec<Entry> = self.entries.read().values().cloned().collect();
        let mut things: Vec<Thing> = entries.iter().map(|entry| entry.lock().clone()).collect();
        things.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        things
    }

    /// Saves components, appending a snapshot only when they changed.
    ///
    /// # Contract
    /// - Byte-identical components compared to the latest snapshot: no new
    ///   snapshot, version unchanged. The record is rewritten only when the
    ///   current components were restored from an older version.
    /// - Otherwise appends `version + 1` and rewrites the whole record.
    pub fn save(&self, id: &ThingId, components: ComponentBundle) -> StoreResult<Thing> {
        self.mutate(id, |thing| {
            let appended = thing.record_components(components, now_epoch_ms());
            if appended {
                debug!(
                    "event=thing_save module=store status=ok id={} version={}",
                    thing.id, thing.version
                );
            }
            Ok(appended)
        })
    }

    /// Merges a partial update into the current components, then saves.
    pub fn update_components(&self, id: &ThingId, patch: ComponentPatch) -> StoreResult<Thing> {
        self.mutate(id, |thing| {
            let merged = patch.apply_to(&thing.components);
            Ok(thing.record_components(merged, now_epoch_ms()))
        })
    }

    /// Restores components from the snapshot with exactly `version`.
    ///
    /// # Contract
    /// - No new snapshot, `version` untouched.
    /// - A missing version leaves the Thing unmodified.
    pub fn restore(&self, id: &ThingId, version: u64) -> StoreResult<Thing> {
        self.mutate(id, |thing| {
            let restored = thing
                .snapshot(version)
                .map(|snapshot| snapshot.components.clone())
                .ok_or_else(|| StoreError::VersionNotFound {
                    id: thing.id.clone(),
                    version,
                })?;
            thing.components = restored;
            thing.modified = now_epoch_ms();
            info!(
                "event=thing_restore module=store status=ok id={} restored_version={} version={}",
                thing.id, version, thing.version
            );
            Ok(true)
        })
    }

    /// Attaches `child` under `parent`, returning the updated parent.
    ///
    /// # Contract
    /// - Rejects self-parenting and attaches that would create a cycle.
    /// - A child attached elsewhere is detached from its previous parent.
    /// - `order` defaults to the append position among siblings; re-attaching
    ///   to the same parent without an order keeps the current one.
    /// - The child id is never listed twice.
    pub fn add_child(
        &self,
        parent_id: &ThingId,
        child_id: &ThingId,
        order: Option<i64>,
    ) -> StoreResult<Thing> {
        let _structure = self.structure.lock();
        self.entry(parent_id)?;
        let child_entry = self.entry(child_id)?;

        if parent_id == child_id || self.is_ancestor(child_id, parent_id) {
            return Err(StoreError::CycleRejected {
                parent: parent_id.clone(),
                child: child_id.clone(),
            });
        }

        let previous_parent = child_entry.lock().parent_id.clone();
        let mut involved = vec![parent_id.clone(), child_id.clone()];
        if let Some(previous) = previous_parent.filter(|previous| previous != parent_id) {
            involved.push(previous);
        }
        let mut locked = self.lock_all(&involved);
        let mut updated = snapshot_locked(&locked);
        let now = now_epoch_ms();

        let already_attached = updated
            .get(child_id)
            .is_some_and(|child| child.parent_id.as_ref() == Some(parent_id));
        if let Some(previous) = updated
            .get(child_id)
            .and_then(|child| child.parent_id.clone())
            .filter(|previous| previous != parent_id)
        {
            if let Some(old_parent) = updated.get_mut(&previous) {
                old_parent.children.retain(|id| id != child_id);
                old_parent.modified = now;
            }
        }

        let parent = updated
            .get_mut(parent_id)
            .ok_or_else(|| StoreError::NotFound(parent_id.clone()))?;
        let append_position = parent.children.iter().filter(|id| *id != child_id).count() as i64;
        if !parent.has_child(child_id) {
            parent.children.push(child_id.clone());
        }
        parent.modified = now;

        let child = updated
            .get_mut(child_id)
            .ok_or_else(|| StoreError::NotFound(child_id.clone()))?;
        child.parent_id = Some(parent_id.clone());
        child.order = match order {
            Some(order) => order,
            None if already_attached => child.order,
            None => append_position,
        };
        child.modified = now;

        let records: Vec<&Thing> = updated.values().collect();
        self.repo.lock().write_things(&records)?;
        let parent = updated
            .get(parent_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(parent_id.clone()))?;
        commit_locked(&mut locked, updated);
        info!(
            "event=thing_add_child module=store status=ok parent={} child={}",
            parent_id, child_id
        );
        Ok(parent)
    }

    /// Detaches `child` from `parent`, returning the updated parent.
    ///
    /// The child's `parentId`/`order` are reset only when it points at
    /// `parent`.
    pub fn remove_child(&self, parent_id: &ThingId, child_id: &ThingId) -> StoreResult<Thing> {
        let _structure = self.structure.lock();
        self.entry(parent_id)?;
        self.entry(child_id)?;
        if parent_id == child_id {
            return self.get(parent_id);
        }

        let mut locked = self.lock_all(&[parent_id.clone(), child_id.clone()]);
        let mut updated = snapshot_locked(&locked);
        let now = now_epoch_ms();

        if let Some(parent) = updated.get_mut(parent_id) {
            parent.children.retain(|id| id != child_id);
            parent.modified = now;
        }
        if let Some(child) = updated.get_mut(child_id) {
            if child.parent_id.as_ref() == Some(parent_id) {
                child.parent_id = None;
                child.order = DEFAULT_ORDER;
                child.modified = now;
            }
        }

        let records: Vec<&Thing> = updated.values().collect();
        self.repo.lock().write_things(&records)?;
        let parent = updated
            .get(parent_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(parent_id.clone()))?;
        commit_locked(&mut locked, updated);
        info!(
            "event=thing_remove_child module=store status=ok parent={} child={}",
            parent_id, child_id
        );
        Ok(parent)
    }

    /// Deletes a Thing, detaching it from its parent and its children.
    ///
    /// Children are kept as top-level Things with `parentId` cleared and
    /// `order` reset.
    pub fn delete(&self, id: &ThingId) -> StoreResult<()> {
        if id.is_system() {
            return Err(StoreError::SystemThingProtected);
        }
        let _structure = self.structure.lock();
        let target = self.entry(id)?;

        let (parent_id, children) = {
            let thing = target.lock();
            (thing.parent_id.clone(), thing.children.clone())
        };
        let involved: Vec<ThingId> = children
            .into_iter()
            .chain(parent_id)
            .chain(std::iter::once(id.clone()))
            .collect();
        let mut locked = self.lock_all(&involved);
        let mut updated = snapshot_locked(&locked);
        updated.remove(id);

        let now = now_epoch_ms();
        for thing in updated.values_mut() {
            thing.children.retain(|child| child != id);
            if thing.parent_id.as_ref() == Some(id) {
                thing.parent_id = None;
                thing.order = DEFAULT_ORDER;
            }
            thing.modified = now;
        }

        let records: Vec<&Thing> = updated.values().collect();
        self.repo.lock().delete_thing(id, &records)?;
        let detached = updated.len();
        commit_locked(&mut locked, updated);
        self.entries.write().remove(id);
        info!(
            "event=thing_delete module=store status=ok id={} detached={}",
            id, detached
        );
        Ok(())
    }

    /// Creates or revises the system Thing from a sourced definition.
    ///
    /// # Contract
    /// - An existing record keeps its children and full history.
    /// - Components follow `save` semantics; metadata is always stamped.
    pub fn write_system(
        &self,
        components: ComponentBundle,
        meta: SystemMeta,
    ) -> StoreResult<SystemWrite> {
        let system_id = ThingId::system();
        let existing = self.entries.read().get(&system_id).cloned();
        let Some(entry) = existing else {
            let mut thing = Thing::with_id(
                system_id,
                SYSTEM_THING_NAME,
                SYSTEM_THING_TYPE,
                components.clone(),
            );
            let now = now_epoch_ms();
            thing.record_components(components, now);
            thing.system_version = Some(meta.system_version);
            thing.template_hashes = Some(meta.template_hashes);
            self.repo.lock().write_things(&[&thing])?;
            self.entries
                .write()
                .insert(thing.id.clone(), Arc::new(Mutex::new(thing.clone())));
            info!(
                "event=system_write module=store status=created version={}",
                thing.version
            );
            return Ok(SystemWrite {
                thing,
                created: true,
                snapshot_appended: true,
            });
        };

        let mut guard = entry.lock();
        let mut thing = guard.clone();
        let now = now_epoch_ms();
        let snapshot_appended = thing.record_components(components, now);
        thing.system_version = Some(meta.system_version);
        thing.template_hashes = Some(meta.template_hashes);
        thing.modified = now;
        self.repo.lock().write_things(&[&thing])?;
        *guard = thing.clone();
        info!(
            "event=system_write module=store status=revised version={} snapshot_appended={}",
            thing.version, snapshot_appended
        );
        Ok(SystemWrite {
            thing,
            created: false,
            snapshot_appended,
        })
    }

    fn entry(&self, id: &ThingId) -> StoreResult<Entry> {
        self.entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Locks the existing entries among `ids` in id order.
    fn lock_all(&self, ids: &[ThingId]) -> Vec<Locked> {
        let mut ids: Vec<ThingId> = ids.to_vec();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| self.entry(&id).ok().map(|entry| (id, entry.lock_arc())))
            .collect()
    }

    /// Applies `change` to a copy of one Thing under its lock.
    ///
    /// `change` returns whether the copy must be persisted. A copy that
    /// differs from the stored Thing is persisted either way.
    fn mutate(
        &self,
        id: &ThingId,
        change: impl FnOnce(&mut Thing) -> StoreResult<bool>,
    ) -> StoreResult<Thing> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        if !self.contains(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        let mut thing = guard.clone();
        let persist = change(&mut thing)?;
        if persist || thing != *guard {
            self.repo.lock().write_things(&[&thing])?;
            *guard = thing.clone();
        }
        Ok(thing)
    }

    /// Walks `descendant`'s parent chain looking for `ancestor`.
    ///
    /// Must be called with the structure lock held. A chain that loops on
    /// itself counts as a match.
    fn is_ancestor(&self, ancestor: &ThingId, descendant: &ThingId) -> bool {
        let mut visited = HashSet::new();
        let mut cursor = Some(descendant.clone());
        while let Some(current) = cursor {
            if current == *ancestor || !visited.insert(current.clone()) {
                return true;
            }
            cursor = self
                .entry(&current)
                .ok()
                .and_then(|entry| entry.lock().parent_id.clone());
        }
        false
    }
}

fn snapshot_locked(locked: &[Locked]) -> HashMap<ThingId, Thing> {
    locked
        .iter()
        .map(|(id, guard)| (id.clone(), (**guard).clone()))
        .collect()
}

fn commit_locked(
    locked: &mut [Locked],
    mut updated: HashMap<ThingId, Thing>,
) {
    for (id, guard) in locked.iter_mut() {
        if let Some(thing) = updated.remove(id) {
            **guard = thing;
        }
    }
}
