//! Capability-scoped execution of the server fragment.
//!
//! # Responsibility
//! - Define the only interface a server fragment runs against: a store
//!   accessor and a route registrar.
//! - Bind declared routes to first-party handlers from a catalog.
//!
//! # Invariants
//! - A handler is bound only when the fragment declared every capability the
//!   handler requires.
//! - Every route is resolved and accepted by the registrar's check before
//!   the first one is registered.

use crate::compose::engine::ThingSource;
use crate::extension::capability::ServiceCapability;
use crate::extension::fragment::{FragmentError, RouteDeclaration, ServerFragment};
use crate::http::router::PatternError;
use crate::http::types::{Handler, HttpMethod};
use crate::model::thing::{ComponentPatch, Thing, ThingId};
use crate::service::content_store::{ContentStore, StoreResult};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Receives route registrations from an executing fragment.
pub trait RouteRegistrar {
    /// Verifies that every `(method, pattern)` could be registered, in order,
    /// without registering any. Fails with the index of the first rejected one.
    fn check(&self, routes: &[(HttpMethod, &str)]) -> Result<(), (usize, RouteRegistrationError)>;

    fn register(
        &mut self,
        method: HttpMethod,
        pattern: &str,
        handler_id: &str,
        handler: Handler,
    ) -> Result<(), RouteRegistrationError>;
}

/// Route registration rejected by the registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRegistrationError {
    Pattern(PatternError),
    Duplicate { method: HttpMethod, pattern: String },
}

impl Display for RouteRegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern(err) => write!(f, "{err}"),
            Self::Duplicate { method, pattern } => {
                write!(f, "route already registered: {method} {pattern}")
            }
        }
    }
}

impl Error for RouteRegistrationError {}

/// Store operations available to bound handlers.
///
/// Loader-only operations such as writing the system Thing are not exposed.
#[derive(Clone)]
pub struct StoreAccessor {
    store: Arc<ContentStore>,
}

impl StoreAccessor {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Vec<Thing> {
        self.store.list()
    }

    pub fn get(&self, id: &ThingId) -> StoreResult<Thing> {
        self.store.get(id)
    }

    pub fn create(&self, name: &str) -> StoreResult<Thing> {
        self.store.create(name)
    }

    pub fn update_components(&self, id: &ThingId, patch: ComponentPatch) -> StoreResult<Thing> {
        self.store.update_components(id, patch)
    }

    pub fn restore(&self, id: &ThingId, version: u64) -> StoreResult<Thing> {
        self.store.restore(id, version)
    }

    pub fn add_child(
        &self,
        parent: &ThingId,
        child: &ThingId,
        order: Option<i64>,
    ) -> StoreResult<Thing> {
        self.store.add_child(parent, child, order)
    }

    pub fn remove_child(&self, parent: &ThingId, child: &ThingId) -> StoreResult<Thing> {
        self.store.remove_child(parent, child)
    }

    pub fn delete(&self, id: &ThingId) -> StoreResult<()> {
        self.store.delete(id)
    }
}

impl ThingSource for StoreAccessor {
    fn fetch(&self, id: &ThingId) -> Option<Thing> {
        self.store.get(id).ok()
    }
}

/// Fixed set of handlers a fragment may bind routes to.
pub trait HandlerCatalog {
    /// Capabilities the handler needs, or `None` for an unknown id.
    fn requires(&self, handler_id: &str) -> Option<&'static [ServiceCapability]>;
    /// Builds the handler bound to `store`, or `None` for an unknown id.
    fn bind(&self, handler_id: &str, store: &StoreAccessor) -> Option<Handler>;
}

/// The two capabilities a server fragment is executed against.
pub struct ServiceContext<'a> {
    store: StoreAccessor,
    routes: &'a mut dyn RouteRegistrar,
}

impl<'a> ServiceContext<'a> {
    pub fn new(store: StoreAccessor, routes: &'a mut dyn RouteRegistrar) -> Self {
        Self { store, routes }
    }

    pub fn store(&self) -> &StoreAccessor {
        &self.store
    }
}

/// Outcome of one successful fragment execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub routes_registered: usize,
    pub capabilities: Vec<ServiceCapability>,
}

/// Parses `source` and executes it against `context`.
pub fn execute_server_fragment(
    source: &str,
    catalog: &dyn HandlerCatalog,
    context: ServiceContext<'_>,
) -> Result<ExecutionReport, ExecutionError> {
    let fragment = ServerFragment::parse(source).map_err(ExecutionError::Fragment)?;
    execute_fragment(&fragment, catalog, context)
}

/// Binds and registers every declared route.
pub fn execute_fragment(
    fragment: &ServerFragment,
    catalog: &dyn HandlerCatalog,
    context: ServiceContext<'_>,
) -> Result<ExecutionReport, ExecutionError> {
    let mut bound = Vec::with_capacity(fragment.routes.len());
    for route in &fragment.routes {
        let requires = catalog
            .requires(&route.handler)
            .ok_or_else(|| unknown_handler(route))?;
        if let Some(missing) = requires
            .iter()
            .copied()
            .find(|capability| !fragment.declares(*capability))
        {
            return Err(ExecutionError::UndeclaredCapability {
                line: route.line,
                handler: route.handler.clone(),
                capability: missing,
            });
        }
        let handler = catalog
            .bind(&route.handler, &context.store)
            .ok_or_else(|| unknown_handler(route))?;
        bound.push((route, handler));
    }

    let ServiceContext { routes, .. } = context;
    let shapes: Vec<(HttpMethod, &str)> = fragment
        .routes
        .iter()
        .map(|route| (route.method, route.pattern.as_str()))
        .collect();
    if let Err((index, error)) = routes.check(&shapes) {
        let line = fragment.routes.get(index).map_or(0, |route| route.line);
        return Err(ExecutionError::Registration { line, error });
    }
    for (route, handler) in bound {
        routes
            .register(route.method, &route.pattern, &route.handler, handler)
            .map_err(|error| ExecutionError::Registration {
                line: route.line,
                error,
            })?;
    }

    info!(
        "event=fragment_execute module=extension status=ok routes={}",
        fragment.routes.len()
    );
    Ok(ExecutionReport {
        routes_registered: fragment.routes.len(),
        capabilities: fragment.capabilities.iter().copied().collect(),
    })
}

fn unknown_handler(route: &RouteDeclaration) -> ExecutionError {
    ExecutionError::UnknownHandler {
        line: route.line,
        handler: route.handler.clone(),
    }
}

/// Server fragment execution failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    Fragment(FragmentError),
    UnknownHandler {
        line: usize,
        handler: String,
    },
    UndeclaredCapability {
        line: usize,
        handler: String,
        capability: ServiceCapability,
    },
    Registration {
        line: usize,
        error: RouteRegistrationError,
    },
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fragment(err) => write!(f, "invalid server fragment: {err}"),
            Self::UnknownHandler { line, handler } => {
                write!(f, "line {line}: unknown handler `{handler}`")
            }
            Self::UndeclaredCapability {
                line,
                handler,
                capability,
            } => write!(
                f,
                "line {line}: handler `{handler}` requires undeclared capability `{capability}`"
            ),
            Self::Registration { line, error } => write!(f, "line {line}: {error}"),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fragment(err) => Some(err),
            Self::Registration { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        execute_server_fragment, ExecutionError, HandlerCatalog, ServiceContext, StoreAccessor,
    };
    use crate::db::open_db_in_memory;
    use crate::extension::capability::ServiceCapability;
    use crate::http::router::Router;
    use crate::http::types::{Handler, HttpMethod, HttpRequest, HttpResponse, PathParams};
    use crate::repo::thing_repo::SqliteThingRepository;
    use crate::service::content_store::ContentStore;
    use std::sync::Arc;

    struct CountCatalog;

    impl HandlerCatalog for CountCatalog {
        fn requires(&self, handler_id: &str) -> Option<&'static [ServiceCapability]> {
            match handler_id {
                "test.count" => Some(&[ServiceCapability::Store]),
                "test.ping" => Some(&[]),
                _ => None,
            }
        }

        fn bind(&self, handler_id: &str, store: &StoreAccessor) -> Option<Handler> {
            let store = store.clone();
            match handler_id {
                "test.count" => Some(Arc::new(move |_: &HttpRequest, _: &PathParams| {
                    HttpResponse::json(200, &store.list().len())
                })),
                "test.ping" => Some(Arc::new(|_: &HttpRequest, _: &PathParams| {
                    HttpResponse::json(200, "pong")
                })),
                _ => None,
            }
        }
    }

    fn accessor() -> StoreAccessor {
        let repo = SqliteThingRepository::new(open_db_in_memory().expect("db"));
        StoreAccessor::new(Arc::new(ContentStore::open(repo).expect("store")))
    }

    #[test]
    fn registers_bound_routes() {
        let store = accessor();
        store.create("one").expect("create");
        let mut router = Router::new();
        let report = execute_server_fragment(
            "requires store, routes\nGET /count test.count\nGET /ping test.ping",
            &CountCatalog,
            ServiceContext::new(store, &mut router),
        )
        .expect("execute");

        assert_eq!(report.routes_registered, 2);
        let response = router.dispatch(&HttpRequest::new(HttpMethod::Get, "/count"));
        assert_eq!(response.body_json().expect("json"), 1);
    }

    #[test]
    fn rejects_handler_needing_undeclared_store() {
        let mut router = Router::new();
        let err = execute_server_fragment(
            "requires routes\nGET /ping test.ping\nGET /count test.count",
            &CountCatalog,
            ServiceContext::new(accessor(), &mut router),
        )
        .expect_err("store not declared");
        assert!(matches!(
            err,
            ExecutionError::UndeclaredCapability {
                line: 3,
                capability: ServiceCapability::Store,
                ..
            }
        ));
        assert!(router.is_empty());
    }

    #[test]
    fn rejects_unknown_handler() {
        let mut router = Router::new();
        let err = execute_server_fragment(
            "requires routes\nGET /x test.missing",
            &CountCatalog,
            ServiceContext::new(accessor(), &mut router),
        )
        .expect_err("unknown handler");
        assert_eq!(
            err,
            ExecutionError::UnknownHandler {
                line: 2,
                handler: "test.missing".to_string()
            }
        );
    }

    #[test]
    fn surfaces_registrar_conflicts() {
        let mut router = Router::new();
        let err = execute_server_fragment(
            "requires routes\nGET /a/:x test.ping\nGET /a/:y test.ping",
            &CountCatalog,
            ServiceContext::new(accessor(), &mut router),
        )
        .expect_err("same shape");
        assert!(matches!(err, ExecutionError::Registration { line: 3, .. }));
        assert!(router.is_empty());
    }

    #[test]
    fn leaves_router_untouched_when_a_route_is_already_taken() {
        let mut router = Router::new();
        execute_server_fragment(
            "requires routes\nGET /ping test.ping",
            &CountCatalog,
            ServiceContext::new(accessor(), &mut router),
        )
        .expect("first fragment");

        let err = execute_server_fragment(
            "requires store, routes\nGET /count test.count\nGET /ping test.ping",
            &CountCatalog,
            ServiceContext::new(accessor(), &mut router),
        )
        .expect_err("ping already registered");
        assert!(matches!(err, ExecutionError::Registration { line: 3, .. }));
        assert_eq!(router.len(), 1);
    }
}
