//! Authoritative sources of the system Thing definition.
//!
//! # Responsibility
//! - Read the four template sources and fingerprint them.
//!
//! # Invariants
//! - Fingerprints are lowercase hex SHA-256 of the exact source bytes.
//! - A source that cannot be read has no fingerprint.

use crate::model::thing::{ComponentBundle, TemplateHashes};
use log::warn;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

/// One of the four system template sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Html,
    Css,
    ClientJs,
    ServerJs,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [Self::Html, Self::Css, Self::ClientJs, Self::ServerJs];

    /// File name inside a template directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Html => "template.html",
            Self::Css => "style.css",
            Self::ClientJs => "client.js",
            Self::ServerJs => "server.routes",
        }
    }

    /// Resolves a template file name back to its kind.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_name() == name)
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Read access to the system template sources.
pub trait TemplateSources: Send {
    fn read(&self, kind: SourceKind) -> io::Result<String>;
    /// Human-readable location of one source, for diagnostics.
    fn describe(&self, kind: SourceKind) -> String;
}

/// Sources stored as files in one directory.
#[derive(Debug, Clone)]
pub struct DirectorySources {
    root: PathBuf,
}

impl DirectorySources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, kind: SourceKind) -> PathBuf {
        self.root.join(kind.file_name())
    }
}

impl TemplateSources for DirectorySources {
    fn read(&self, kind: SourceKind) -> io::Result<String> {
        std::fs::read_to_string(self.path(kind))
    }

    fn describe(&self, kind: SourceKind) -> String {
        self.path(kind).display().to_string()
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprints one source, `None` when it cannot be read.
pub fn fingerprint_source(sources: &dyn TemplateSources, kind: SourceKind) -> Option<String> {
    match sources.read(kind) {
        Ok(content) => Some(fingerprint(&content)),
        Err(err) => {
            warn!(
                "event=source_fingerprint module=host status=error source={} error={}",
                sources.describe(kind),
                err
            );
            None
        }
    }
}

/// Current digests of all four sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFingerprints {
    pub html: Option<String>,
    pub css: Option<String>,
    pub client_js: Option<String>,
    pub server_js: Option<String>,
}

impl SourceFingerprints {
    pub fn compute(sources: &dyn TemplateSources) -> Self {
        Self {
            html: fingerprint_source(sources, SourceKind::Html),
            css: fingerprint_source(sources, SourceKind::Css),
            client_js: fingerprint_source(sources, SourceKind::ClientJs),
            server_js: fingerprint_source(sources, SourceKind::ServerJs),
        }
    }

    /// `true` only when every digest exists and equals the stored one.
    pub fn matches(&self, stored: &TemplateHashes) -> bool {
        let same = |current: &Option<String>, stored: &str| current.as_deref() == Some(stored);
        same(&self.html, &stored.html)
            && same(&self.css, &stored.css)
            && same(&self.client_js, &stored.client_js)
            && same(&self.server_js, &stored.server_js)
    }
}

/// Contents and digests of all four sources read together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub components: ComponentBundle,
    pub hashes: TemplateHashes,
}

/// A source that could not be read.
#[derive(Debug)]
pub struct UnreadableSource {
    pub kind: SourceKind,
    pub location: String,
    pub error: io::Error,
}

impl SourceSnapshot {
    /// Reads all four sources, failing on the first unreadable one.
    pub fn read(sources: &dyn TemplateSources) -> Result<Self, UnreadableSource> {
        let read = |kind: SourceKind| {
            sources.read(kind).map_err(|error| UnreadableSource {
                kind,
                location: sources.describe(kind),
                error,
            })
        };
        let components = ComponentBundle {
            html: read(SourceKind::Html)?,
            css: read(SourceKind::Css)?,
            client_js: read(SourceKind::ClientJs)?,
            server_js: read(SourceKind::ServerJs)?,
        };
        let hashes = TemplateHashes {
            html: fingerprint(&components.html),
            css: fingerprint(&components.css),
            client_js: fingerprint(&components.client_js),
            server_js: fingerprint(&components.server_js),
        };
        Ok(Self { components, hashes })
    }
}
