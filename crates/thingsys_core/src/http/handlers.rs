//! First-party handler catalog.
//!
//! # Responsibility
//! - Provide every handler a server fragment may bind a route to.
//! - Map store and render failures onto HTTP status codes.
//!
//! # Invariants
//! - Each API handler calls exactly one store operation.
//! - Error responses carry a `{"error": ...}` body.

use crate::compose::engine::{CompositionEngine, RenderError};
use crate::compose::scope::{RandomScopeIds, ScopeIdGenerator};
use crate::extension::capability::ServiceCapability;
use crate::extension::runtime::{HandlerCatalog, StoreAccessor};
use crate::http::types::{Handler, HttpRequest, HttpResponse, PathParams};
use crate::model::thing::{ComponentPatch, ThingId};
use crate::service::content_store::StoreError;
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

pub const PAGE_ROOT: &str = "page.root";
pub const PAGE_PREVIEW: &str = "page.preview";
pub const ASSET_CLIENT_SCRIPT: &str = "asset.client_script";
pub const THINGS_LIST: &str = "things.list";
pub const THINGS_GET: &str = "things.get";
pub const THINGS_CREATE: &str = "things.create";
pub const THINGS_UPDATE: &str = "things.update";
pub const THINGS_RESTORE: &str = "things.restore";
pub const THINGS_ADD_CHILD: &str = "things.add_child";
pub const THINGS_REMOVE_CHILD: &str = "things.remove_child";
pub const THINGS_DELETE: &str = "things.delete";

const FIRST_PARTY_HANDLER_IDS: &[&str] = &[
    PAGE_ROOT,
    PAGE_PREVIEW,
    ASSET_CLIENT_SCRIPT,
    THINGS_LIST,
    THINGS_GET,
    THINGS_CREATE,
    THINGS_UPDATE,
    THINGS_RESTORE,
    THINGS_ADD_CHILD,
    THINGS_REMOVE_CHILD,
    THINGS_DELETE,
];

const STORE_ONLY: &[ServiceCapability] = &[ServiceCapability::Store];

/// Returns every handler id the catalog can bind.
pub fn first_party_handler_ids() -> &'static [&'static str] {
    FIRST_PARTY_HANDLER_IDS
}

type Route<G> = fn(&Bound<G>, &HttpRequest, &PathParams) -> HttpResponse;

struct Bound<G> {
    store: StoreAccessor,
    engine: Arc<CompositionEngine<G>>,
}

/// Built-in handlers sharing one composition engine.
pub struct FirstPartyHandlers<G = RandomScopeIds> {
    engine: Arc<CompositionEngine<G>>,
}

impl FirstPartyHandlers<RandomScopeIds> {
    pub fn new() -> Self {
        Self::with_engine(CompositionEngine::new())
    }
}

impl Default for FirstPartyHandlers<RandomScopeIds> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: ScopeIdGenerator + 'static> FirstPartyHandlers<G> {
    pub fn with_engine(engine: CompositionEngine<G>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    fn route(handler_id: &str) -> Option<Route<G>> {
        let route: Route<G> = match handler_id {
            PAGE_ROOT => page_root,
            PAGE_PREVIEW => page_preview,
            ASSET_CLIENT_SCRIPT => asset_client_script,
            THINGS_LIST => things_list,
            THINGS_GET => things_get,
            THINGS_CREATE => things_create,
            THINGS_UPDATE => things_update,
            THINGS_RESTORE => things_restore,
            THINGS_ADD_CHILD => things_add_child,
            THINGS_REMOVE_CHILD => things_remove_child,
            THINGS_DELETE => things_delete,
            _ => return None,
        };
        Some(route)
    }
}

impl<G: ScopeIdGenerator + 'static> HandlerCatalog for FirstPartyHandlers<G> {
    fn requires(&self, handler_id: &str) -> Option<&'static [ServiceCapability]> {
        Self::route(handler_id).map(|_| STORE_ONLY)
    }

    fn bind(&self, handler_id: &str, store: &StoreAccessor) -> Option<Handler> {
        let route = Self::route(handler_id)?;
        let bound = Bound {
            store: store.clone(),
            engine: Arc::clone(&self.engine),
        };
        Some(Arc::new(
            move |request: &HttpRequest, params: &PathParams| route(&bound, request, params),
        ))
    }
}

#[derive(Deserialize)]
struct CreateBody {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct UpdateBody {
    #[serde(default)]
    components: ComponentPatch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddChildBody {
    child_id: ThingId,
    #[serde(default)]
    order: Option<i64>,
}

#[derive(serde::Serialize)]
struct Deleted<'a> {
    deleted: &'a ThingId,
}

fn page_root<G: ScopeIdGenerator>(
    bound: &Bound<G>,
    _: &HttpRequest,
    _: &PathParams,
) -> HttpResponse {
    let system = match bound.store.get(&ThingId::system()) {
        Ok(system) => system,
        Err(err) => return store_error_response(&err),
    };
    match bound.engine.render_page(&system, &bound.store) {
        Ok(page) => HttpResponse::html(200, page),
        Err(err) => render_error_response(&err),
    }
}

fn page_preview<G: ScopeIdGenerator>(
    bound: &Bound<G>,
    _: &HttpRequest,
    params: &PathParams,
) -> HttpResponse {
    let id = match thing_id_param(params, "id") {
        Ok(id) => id,
        Err(response) => return response,
    };
    let thing = match bound.store.get(&id) {
        Ok(thing) => thing,
        Err(err) => return store_error_response(&err),
    };
    match bound.engine.render_preview(&thing, &bound.store) {
        Ok(page) => HttpResponse::html(200, page),
        Err(err) => render_error_response(&err),
    }
}

fn asset_client_script<G>(bound: &Bound<G>, _: &HttpRequest, _: &PathParams) -> HttpResponse {
    match bound.store.get(&ThingId::system()) {
        Ok(system) => HttpResponse::javascript(system.components.client_js),
        Err(err) => store_error_response(&err),
    }
}

fn things_list<G>(bound: &Bound<G>, _: &HttpRequest, _: &PathParams) -> HttpResponse {
    HttpResponse::json(200, &bound.store.list())
}

fn things_get<G>(bound: &Bound<G>, _: &HttpRequest, params: &PathParams) -> HttpResponse {
    with_id(params, |id| bound.store.get(&id))
}

fn things_create<G>(bound: &Bound<G>, request: &HttpRequest, _: &PathParams) -> HttpResponse {
    let body: CreateBody = match parse_body(request) {
        Ok(body) => body,
        Err(response) => return response,
    };
    respond(bound.store.create(body.name.as_deref().unwrap_or_default()))
}

fn things_update<G>(bound: &Bound<G>, request: &HttpRequest, params: &PathParams) -> HttpResponse {
    let body: UpdateBody = match parse_body(request) {
        Ok(body) => body,
        Err(response) => return response,
    };
    with_id(params, |id| bound.store.update_components(&id, body.components))
}

fn things_restore<G>(bound: &Bound<G>, _: &HttpRequest, params: &PathParams) -> HttpResponse {
    let version = match params.get("version").map(str::parse::<u64>) {
        Some(Ok(version)) => version,
        Some(Err(_)) => return HttpResponse::error(400, "version must be a non-negative integer"),
        None => return HttpResponse::error(400, "missing path parameter `version`"),
    };
    with_id(params, |id| bound.store.restore(&id, version))
}

fn things_add_child<G>(
    bound: &Bound<G>,
    request: &HttpRequest,
    params: &PathParams,
) -> HttpResponse {
    let body: AddChildBody = match parse_body(request) {
        Ok(body) => body,
        Err(response) => return response,
    };
    with_id(params, |id| {
        bound.store.add_child(&id, &body.child_id, body.order)
    })
}

fn things_remove_child<G>(
    bound: &Bound<G>,
    _: &HttpRequest,
    params: &PathParams,
) -> HttpResponse {
    let child = match thing_id_param(params, "childId") {
        Ok(child) => child,
        Err(response) => return response,
    };
    with_id(params, |id| bound.store.remove_child(&id, &child))
}

fn things_delete<G>(bound: &Bound<G>, _: &HttpRequest, params: &PathParams) -> HttpResponse {
    let id = match thing_id_param(params, "id") {
        Ok(id) => id,
        Err(response) => return response,
    };
    match bound.store.delete(&id) {
        Ok(()) => HttpResponse::json(200, &Deleted { deleted: &id }),
        Err(err) => store_error_response(&err),
    }
}

fn with_id<T: serde::Serialize>(
    params: &PathParams,
    op: impl FnOnce(ThingId) -> Result<T, StoreError>,
) -> HttpResponse {
    match thing_id_param(params, "id") {
        Ok(id) => respond(op(id)),
        Err(response) => response,
    }
}

fn respond<T: serde::Serialize>(result: Result<T, StoreError>) -> HttpResponse {
    match result {
        Ok(value) => HttpResponse::json(200, &value),
        Err(err) => store_error_response(&err),
    }
}

fn thing_id_param(params: &PathParams, name: &str) -> Result<ThingId, HttpResponse> {
    params
        .get(name)
        .map(ThingId::from)
        .ok_or_else(|| HttpResponse::error(400, &format!("missing path parameter `{name}`")))
}

/// Decodes a JSON body; an empty body decodes as `{}`.
fn parse_body<T: DeserializeOwned>(request: &HttpRequest) -> Result<T, HttpResponse> {
    let body: &[u8] = if request.body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &request.body
    };
    serde_json::from_slice(body)
        .map_err(|err| HttpResponse::error(400, &format!("invalid request body: {err}")))
}

/// Maps a store failure to its client-visible response.
pub fn store_error_response(err: &StoreError) -> HttpResponse {
    let status = match err {
        StoreError::NotFound(_) => 404,
        StoreError::VersionNotFound { .. } => 400,
        StoreError::CycleRejected { .. } | StoreError::SystemThingProtected => 409,
        StoreError::Repo(_) => {
            error!(
                "event=http_store module=http status=error error={}",
                err
            );
            500
        }
    };
    HttpResponse::error(status, &err.to_string())
}

fn render_error_response(err: &RenderError) -> HttpResponse {
    warn!("event=http_render module=http status=error error={}", err);
    HttpResponse::error(500, &err.to_string())
}
