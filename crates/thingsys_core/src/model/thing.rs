//! Thing domain model.
//!
//! # Responsibility
//! - Define the canonical record for one versioned content unit.
//! - Provide the snapshot/compare helpers the store builds save/restore on.
//!
//! # Invariants
//! - `id` is stable and never reused for another Thing.
//! - `version == max(history[].version)`, or `0` when history is empty.
//! - `history` is append-only with strictly increasing versions.
//! - `children` holds no duplicates and never the Thing itself.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Fixed identifier of the process-wide system Thing.
pub const SYSTEM_THING_ID: &str = "system-thing";

/// Default display name for Things created without a usable name.
pub const DEFAULT_THING_NAME: &str = "Unnamed Thing";

/// Default type for user-created Things.
pub const DEFAULT_THING_TYPE: &str = "generic";

/// Type tag carried by the system Thing.
pub const SYSTEM_THING_TYPE: &str = "system";

/// Default sibling order for detached Things.
pub const DEFAULT_ORDER: i64 = 0;

/// Opaque Thing identifier.
///
/// Fresh ids are UUID v4 text; the system Thing uses [`SYSTEM_THING_ID`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThingId(String);

impl ThingId {
    /// Allocates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Identifier of the system Thing.
    pub fn system() -> Self {
        Self(SYSTEM_THING_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_THING_ID
    }
}

impl From<&str> for ThingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ThingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for ThingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four-fragment payload of a Thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentBundle {
    /// Markup fragment; may contain the children slot marker.
    pub html: String,
    /// Style fragment, scoped per render instance.
    pub css: String,
    /// Script executed in the browser inside a failure-isolating envelope.
    pub client_js: String,
    /// Server fragment; for the system Thing this is the route declaration table.
    pub server_js: String,
}

/// Partial component update.
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentPatch {
    pub html: Option<String>,
    pub css: Option<String>,
    pub client_js: Option<String>,
    pub server_js: Option<String>,
}

impl ComponentPatch {
    /// Applies the supplied fields on top of `base`.
    pub fn apply_to(self, base: &ComponentBundle) -> ComponentBundle {
        ComponentBundle {
            html: self.html.unwrap_or_else(|| base.html.clone()),
            css: self.css.unwrap_or_else(|| base.css.clone()),
            client_js: self.client_js.unwrap_or_else(|| base.client_js.clone()),
            server_js: self.server_js.unwrap_or_else(|| base.server_js.clone()),
        }
    }
}

/// Immutable record of one past component bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub version: u64,
    pub components: ComponentBundle,
}

/// Content digests of the system Thing's four authoritative sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateHashes {
    pub html: String,
    pub css: String,
    pub client_js: String,
    pub server_js: String,
}

/// Canonical Thing record.
///
/// Serialized field names follow the persisted record shape
/// (`type`, `parentId`, `systemVersion`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    pub id: ThingId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub created: i64,
    /// Unix epoch milliseconds of the last persisted mutation.
    #[serde(default)]
    pub modified: i64,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub history: Vec<HistorySnapshot>,
    #[serde(default)]
    pub components: ComponentBundle,
    #[serde(default)]
    pub children: Vec<ThingId>,
    #[serde(default)]
    pub parent_id: Option<ThingId>,
    #[serde(default)]
    pub order: i64,
    /// System Thing only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_version: Option<u32>,
    /// System Thing only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_hashes: Option<TemplateHashes>,
}

impl Thing {
    /// Creates an unsaved Thing with a fresh id, version 0 and empty history.
    pub fn new(name: impl Into<String>, components: ComponentBundle) -> Self {
        Self::with_id(ThingId::generate(), name, DEFAULT_THING_TYPE, components)
    }

    /// Creates an unsaved Thing with a caller-provided id.
    pub fn with_id(
        id: ThingId,
        name: impl Into<String>,
        kind: impl Into<String>,
        components: ComponentBundle,
    ) -> Self {
        let now = now_epoch_ms();
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            created: now,
            modified: now,
            version: 0,
            history: Vec::new(),
            components,
            children: Vec::new(),
            parent_id: None,
            order: DEFAULT_ORDER,
            system_version: None,
            template_hashes: None,
        }
    }

    /// Highest version recorded in history, `0` when empty.
    pub fn highest_version(&self) -> u64 {
        self.history.iter().map(|h| h.version).max().unwrap_or(0)
    }

    /// Most recent snapshot, if any.
    pub fn latest_snapshot(&self) -> Option<&HistorySnapshot> {
        self.history.last()
    }

    /// Looks up the snapshot with exactly `version`.
    pub fn snapshot(&self, version: u64) -> Option<&HistorySnapshot> {
        self.history.iter().find(|h| h.version == version)
    }

    /// Appends a snapshot of `components` if they differ from the latest one.
    ///
    /// Returns `true` when a snapshot was appended. Current components still
    /// follow `components` when no snapshot is appended (e.g. after a restore).
    pub fn record_components(&mut self, components: ComponentBundle, timestamp: i64) -> bool {
        let unchanged = self
            .latest_snapshot()
            .is_some_and(|latest| latest.components == components);
        if unchanged {
            if self.components != components {
                self.components = components;
                self.modified = timestamp;
            }
            return false;
        }

        let next = self.version + 1;
        self.history.push(HistorySnapshot {
            timestamp,
            version: next,
            components: components.clone(),
        });
        self.components = components;
        self.version = next;
        self.modified = timestamp;
        true
    }

    pub fn has_child(&self, child: &ThingId) -> bool {
        self.children.iter().any(|id| id == child)
    }

    /// Validates record-level invariants.
    pub fn validate(&self) -> Result<(), ThingValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ThingValidationError::EmptyId);
        }

        let mut previous = 0;
        for snapshot in &self.history {
            if snapshot.version <= previous {
                return Err(ThingValidationError::HistoryOutOfOrder {
                    version: snapshot.version,
                });
            }
            previous = snapshot.version;
        }

        let highest = self.highest_version();
        if self.version != highest {
            return Err(ThingValidationError::VersionMismatch {
                version: self.version,
                highest,
            });
        }

        let mut seen = HashSet::new();
        for child in &self.children {
            if *child == self.id {
                return Err(ThingValidationError::SelfChild);
            }
            if !seen.insert(child) {
                return Err(ThingValidationError::DuplicateChild(child.clone()));
            }
        }
        Ok(())
    }
}

/// Record-level invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThingValidationError {
    EmptyId,
    HistoryOutOfOrder { version: u64 },
    VersionMismatch { version: u64, highest: u64 },
    SelfChild,
    DuplicateChild(ThingId),
}

impl Display for ThingValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "thing id must not be empty"),
            Self::HistoryOutOfOrder { version } => {
                write!(f, "history versions must increase, found {version} out of order")
            }
            Self::VersionMismatch { version, highest } => write!(
                f,
                "version {version} does not match highest history version {highest}"
            ),
            Self::SelfChild => write!(f, "thing lists itself as a child"),
            Self::DuplicateChild(id) => write!(f, "duplicate child id: {id}"),
        }
    }
}

impl Error for ThingValidationError {}

/// Current wall clock in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{ComponentBundle, ComponentPatch, Thing, ThingId, ThingValidationError};

    fn bundle(html: &str) -> ComponentBundle {
        ComponentBundle {
            html: html.to_string(),
            ..ComponentBundle::default()
        }
    }

    #[test]
    fn record_components_skips_identical_bundle() {
        let mut thing = Thing::new("a", bundle("<p>x</p>"));
        assert!(thing.record_components(bundle("<p>x</p>"), 10));
        assert!(!thing.record_components(bundle("<p>x</p>"), 20));
        assert_eq!(thing.version, 1);
        assert_eq!(thing.history.len(), 1);
    }

    #[test]
    fn record_components_returns_to_latest_after_restore() {
        let mut thing = Thing::new("a", bundle("x"));
        thing.record_components(bundle("v1"), 10);
        thing.record_components(bundle("v2"), 20);
        thing.components = bundle("v1");

        assert!(!thing.record_components(bundle("v2"), 30));
        assert_eq!(thing.components, bundle("v2"));
        assert_eq!(thing.version, 2);
        assert_eq!(thing.modified, 30);
    }

    #[test]
    fn patch_keeps_unspecified_fields() {
        let base = ComponentBundle {
            html: "h".to_string(),
            css: "c".to_string(),
            client_js: "j".to_string(),
            server_js: "s".to_string(),
        };
        let patched = ComponentPatch {
            css: Some("new".to_string()),
            ..ComponentPatch::default()
        }
        .apply_to(&base);
        assert_eq!(patched.html, "h");
        assert_eq!(patched.css, "new");
        assert_eq!(patched.server_js, "s");
    }

    #[test]
    fn validate_rejects_version_drift() {
        let mut thing = Thing::new("a", bundle("x"));
        thing.record_components(bundle("y"), 1);
        thing.version = 5;
        assert_eq!(
            thing.validate(),
            Err(ThingValidationError::VersionMismatch {
                version: 5,
                highest: 1
            })
        );
    }

    #[test]
    fn validate_rejects_duplicate_children() {
        let mut thing = Thing::new("a", bundle("x"));
        let child = ThingId::from("child");
        thing.children = vec![child.clone(), child.clone()];
        assert_eq!(
            thing.validate(),
            Err(ThingValidationError::DuplicateChild(child))
        );
    }

    #[test]
    fn serializes_persisted_field_names() {
        let mut thing = Thing::new("a", bundle("x"));
        thing.parent_id = Some(ThingId::from("p"));
        let json = serde_json::to_value(&thing).expect("serialize thing");
        assert_eq!(json["type"], "generic");
        assert_eq!(json["parentId"], "p");
        assert!(json["components"].get("clientJs").is_some());
        assert!(json.get("systemVersion").is_none());
    }
}
