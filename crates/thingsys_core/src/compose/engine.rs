//! Hierarchical composition of Things into HTML.
//!
//! # Responsibility
//! - Render one Thing and its subtree into a single string.
//! - Scope each instance's style fragment and isolate its client script.
//!
//! # Invariants
//! - Rendering never mutates the source it reads from.
//! - Only the first children-slot marker of a markup fragment is replaced.
//! - An id revisited on the current recursion path fails the whole render.
//! - Nesting deeper than the engine's depth limit fails the whole render.

use crate::compose::css::scope_css;
use crate::compose::scope::{RandomScopeIds, ScopeIdGenerator};
use crate::model::thing::{Thing, ThingId};
use crate::service::content_store::ContentStore;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Literal sentinel replaced by a Thing's rendered children.
pub const CHILDREN_SLOT: &str = r#"<div class="children"></div>"#;

/// Placeholder in the system markup that receives the system style fragment.
pub const STYLE_PLACEHOLDER: &str = "<style></style>";

/// Placeholder in the system markup that receives the system Thing id.
pub const SYSTEM_ID_PLACEHOLDER: &str = "${SYSTEM_THING_ID}";

/// Default number of Things allowed on one root-to-leaf render path.
pub const DEFAULT_MAX_RENDER_DEPTH: usize = 128;

static SCRIPT_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(script)").expect("script close pattern is valid"));

pub type RenderResult<T> = Result<T, RenderError>;

/// Composition failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// `id` was reached again while already on the recursion `path`.
    CycleDetected { id: ThingId, path: Vec<ThingId> },
    /// Rendering `id` would put `depth` Things on the path.
    DepthExceeded { id: ThingId, depth: usize },
}

impl Display for RenderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected { id, path } => {
                let chain: Vec<&str> = path.iter().map(ThingId::as_str).collect();
                write!(f, "cycle detected at {id}: {}", chain.join(" -> "))
            }
            Self::DepthExceeded { id, depth } => {
                write!(f, "render depth {depth} at {id} exceeds the nesting limit")
            }
        }
    }
}

impl Error for RenderError {}

/// Read-only lookup the engine resolves children through.
pub trait ThingSource {
    fn fetch(&self, id: &ThingId) -> Option<Thing>;
}

impl ThingSource for ContentStore {
    fn fetch(&self, id: &ThingId) -> Option<Thing> {
        self.get(id).ok()
    }
}

impl ThingSource for HashMap<ThingId, Thing> {
    fn fetch(&self, id: &ThingId) -> Option<Thing> {
        self.get(id).cloned()
    }
}

/// Renders Things with an injectable scope id generator.
pub struct CompositionEngine<G = RandomScopeIds> {
    scope_ids: G,
    max_depth: usize,
}

impl CompositionEngine<RandomScopeIds> {
    pub fn new() -> Self {
        Self::with_scope_ids(RandomScopeIds)
    }
}

impl Default for CompositionEngine<RandomScopeIds> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: ScopeIdGenerator> CompositionEngine<G> {
    pub fn with_scope_ids(scope_ids: G) -> Self {
        Self {
            scope_ids,
            max_depth: DEFAULT_MAX_RENDER_DEPTH,
        }
    }

    /// Caps how many Things one render path may hold. Values below 1 are
    /// raised to 1.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Renders `root` and every reachable child.
    ///
    /// # Errors
    /// - `CycleDetected` when a Thing is reachable from itself.
    /// - `DepthExceeded` when a path holds more Things than the depth limit.
    pub fn render<S>(&self, root: &Thing, source: &S) -> RenderResult<String>
    where
        S: ThingSource + ?Sized,
    {
        let mut path = Vec::new();
        self.render_instance(root, source, &mut path)
    }

    /// Renders the service root page from the system Thing.
    ///
    /// The system markup is used as the page itself: it is not wrapped, its
    /// style placeholder receives the raw system style fragment and its
    /// children slot receives the composed children.
    pub fn render_page<S>(&self, system: &Thing, source: &S) -> RenderResult<String>
    where
        S: ThingSource + ?Sized,
    {
        let mut path = vec![system.id.clone()];
        let mut page = system.components.html.clone();
        if page.contains(CHILDREN_SLOT) {
            let children = self.render_children(system, source, &mut path)?;
            page = page.replacen(CHILDREN_SLOT, &children, 1);
        }
        let style = format!("<style>{}</style>", system.components.css);
        page = page.replacen(STYLE_PLACEHOLDER, &style, 1);
        Ok(page.replace(SYSTEM_ID_PLACEHOLDER, system.id.as_str()))
    }

    /// Renders one Thing as a standalone HTML document.
    pub fn render_preview<S>(&self, thing: &Thing, source: &S) -> RenderResult<String>
    where
        S: ThingSource + ?Sized,
    {
        let body = self.render(thing, source)?;
        Ok(format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
            escape_html(&thing.name),
            body
        ))
    }

    fn render_instance<S>(
        &self,
        thing: &Thing,
        source: &S,
        path: &mut Vec<ThingId>,
    ) -> RenderResult<String>
    where
        S: ThingSource + ?Sized,
    {
        if path.contains(&thing.id) {
            let mut cycle = path.clone();
            cycle.push(thing.id.clone());
            return Err(RenderError::CycleDetected {
                id: thing.id.clone(),
                path: cycle,
            });
        }
        if path.len() >= self.max_depth {
            return Err(RenderError::DepthExceeded {
                id: thing.id.clone(),
                depth: path.len() + 1,
            });
        }
        path.push(thing.id.clone());

        let scope = self.scope_ids.next_scope_id();
        let components = &thing.components;
        let mut out = String::new();

        if !components.css.trim().is_empty() {
            let selector = format!("[data-thing-scope=\"{scope}\"]");
            out.push_str(&format!(
                "<style data-thing-scope=\"{scope}\">\n{}</style>\n",
                scope_css(&components.css, &selector)
            ));
        }

        let mut markup = components.html.clone();
        if markup.contains(CHILDREN_SLOT) {
            let children = self.render_children(thing, source, path)?;
            markup = markup.replacen(CHILDREN_SLOT, &children, 1);
        }
        out.push_str(&format!(
            "<div class=\"thing\" data-thing-id=\"{}\" data-thing-scope=\"{scope}\">{markup}</div>\n",
            escape_html(thing.id.as_str())
        ));

        if !components.client_js.trim().is_empty() {
            out.push_str(&script_envelope(thing, &components.client_js));
        }

        path.pop();
        Ok(out)
    }

    fn render_children<S>(
        &self,
        parent: &Thing,
        source: &S,
        path: &mut Vec<ThingId>,
    ) -> RenderResult<String>
    where
        S: ThingSource + ?Sized,
    {
        let mut children = Vec::with_capacity(parent.children.len());
        for (position, child_id) in parent.children.iter().enumerate() {
            match source.fetch(child_id) {
                Some(child) => children.push((child.order, position, child)),
                None => warn!(
                    "event=render_child module=compose status=skipped parent={} child={}",
                    parent.id, child_id
                ),
            }
        }
        children.sort_by_key(|(order, position, _)| (*order, *position));

        let mut rendered = String::new();
        for (_, _, child) in &children {
            rendered.push_str(&self.render_instance(child, source, path)?);
        }
        Ok(rendered)
    }
}

fn script_envelope(thing: &Thing, script: &str) -> String {
    let body = SCRIPT_CLOSE.replace_all(script, r"<\/$1");
    let label = serde_json::to_string(thing.id.as_str()).unwrap_or_else(|_| "\"\"".to_string());
    let label = SCRIPT_CLOSE.replace_all(&label, r"<\/$1");
    format!(
        "<script>(function(){{try{{\n{body}\n}}catch(e){{console.error(\"Thing script failed:\", {label}, e);}}}})();</script>\n"
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
