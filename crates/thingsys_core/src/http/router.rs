//! Route table and request dispatch.
//!
//! # Responsibility
//! - Hold the routes the server fragment registered.
//! - Match request paths against `:param` patterns and call the bound handler.
//!
//! # Invariants
//! - A `(method, pattern)` pair is registered at most once.
//! - Unmatched paths answer 404; matched paths with no route for the method
//!   answer 405.

use crate::extension::runtime::{RouteRegistrar, RouteRegistrationError};
use crate::http::types::{Handler, HttpMethod, HttpRequest, HttpResponse, PathParams};
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Parsed route pattern such as `/api/things/:id/children`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parses and validates a pattern.
    ///
    /// # Errors
    /// - Missing leading `/`, empty inner segments, whitespace, query or
    ///   fragment characters, invalid or repeated parameter names.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let invalid = |reason: &'static str| PatternError {
            pattern: raw.to_string(),
            reason,
        };
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(invalid("must start with `/`"));
        };
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c == '?' || c == '#')
        {
            return Err(invalid("contains whitespace, `?` or `#`"));
        }

        let mut segments = Vec::new();
        if !rest.is_empty() {
            for part in rest.split('/') {
                if part.is_empty() {
                    return Err(invalid("contains an empty segment"));
                }
                match part.strip_prefix(':') {
                    Some(name) => {
                        if !is_param_name(name) {
                            return Err(invalid("has an invalid parameter name"));
                        }
                        if segments
                            .iter()
                            .any(|segment| matches!(segment, Segment::Param(existing) if existing == name))
                        {
                            return Err(invalid("repeats a parameter name"));
                        }
                        segments.push(Segment::Param(name.to_string()));
                    }
                    None => segments.push(Segment::Literal(part.to_string())),
                }
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches a request path, capturing parameter values.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let rest = path.strip_prefix('/')?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => params.insert(name.clone(), part),
            }
        }
        Some(params)
    }

    /// `true` when both patterns match exactly the same paths.
    fn same_shape(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    _ => false,
                })
    }
}

fn is_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Rejected route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub pattern: String,
    pub reason: &'static str,
}

impl Display for PatternError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid route pattern `{}`: {}", self.pattern, self.reason)
    }
}

impl Error for PatternError {}

struct Route {
    method: HttpMethod,
    pattern: RoutePattern,
    handler_id: String,
    handler: Handler,
}

/// Registered routes, matched in registration order.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `(method, pattern, handler id)` for every registered route.
    pub fn describe(&self) -> Vec<(HttpMethod, String, String)> {
        self.routes
            .iter()
            .map(|route| {
                (
                    route.method,
                    route.pattern.as_str().to_string(),
                    route.handler_id.clone(),
                )
            })
            .collect()
    }

    /// Routes one request to its handler.
    pub fn dispatch(&self, request: &HttpRequest) -> HttpResponse {
        let mut path_matched = false;
        for route in &self.routes {
            let Some(params) = route.pattern.matches(&request.path) else {
                continue;
            };
            if route.method != request.method {
                path_matched = true;
                continue;
            }
            let response = (route.handler)(request, &params);
            debug!(
                "event=http_dispatch module=http status={} method={} path={} handler={}",
                response.status, request.method, request.path, route.handler_id
            );
            return response;
        }

        debug!(
            "event=http_dispatch module=http status=unmatched method={} path={}",
            request.method, request.path
        );
        if path_matched {
            HttpResponse::error(405, "method not allowed")
        } else {
            HttpResponse::error(404, "route not found")
        }
    }
}

impl Router {
    fn has_shape(&self, method: HttpMethod, pattern: &RoutePattern) -> bool {
        self.routes
            .iter()
            .any(|route| route.method == method && route.pattern.same_shape(pattern))
    }
}

fn duplicate(method: HttpMethod, pattern: &RoutePattern) -> RouteRegistrationError {
    RouteRegistrationError::Duplicate {
        method,
        pattern: pattern.as_str().to_string(),
    }
}

impl RouteRegistrar for Router {
    fn check(&self, routes: &[(HttpMethod, &str)]) -> Result<(), (usize, RouteRegistrationError)> {
        let mut pending: Vec<(HttpMethod, RoutePattern)> = Vec::with_capacity(routes.len());
        for (index, (method, raw)) in routes.iter().enumerate() {
            let pattern = RoutePattern::parse(raw)
                .map_err(|err| (index, RouteRegistrationError::Pattern(err)))?;
            let taken = self.has_shape(*method, &pattern)
                || pending
                    .iter()
                    .any(|(other, seen)| other == method && seen.same_shape(&pattern));
            if taken {
                return Err((index, duplicate(*method, &pattern)));
            }
            pending.push((*method, pattern));
        }
        Ok(())
    }

    fn register(
        &mut self,
        method: HttpMethod,
        pattern: &str,
        handler_id: &str,
        handler: Handler,
    ) -> Result<(), RouteRegistrationError> {
        let pattern = RoutePattern::parse(pattern).map_err(RouteRegistrationError::Pattern)?;
        if self.has_shape(method, &pattern) {
            return Err(duplicate(method, &pattern));
        }
        self.routes.push(Route {
            method,
            pattern,
            handler_id: handler_id.to_string(),
            handler,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{RoutePattern, Router};
    use crate::extension::runtime::{RouteRegistrar, RouteRegistrationError};
    use crate::http::types::{Handler, HttpMethod, HttpRequest, HttpResponse, PathParams};
    use std::sync::Arc;

    fn echo(param: &'static str) -> Handler {
        Arc::new(move |_: &HttpRequest, params: &PathParams| {
            HttpResponse::json(200, &params.get(param).unwrap_or("none").to_string())
        })
    }

    #[test]
    fn pattern_captures_params() {
        let pattern = RoutePattern::parse("/api/things/:id/restore/:version").expect("pattern");
        let params = pattern
            .matches("/api/things/abc/restore/3")
            .expect("matches");
        assert_eq!(params.get("id"), Some("abc"));
        assert_eq!(params.get("version"), Some("3"));
        assert!(pattern.matches("/api/things/abc/restore").is_none());
    }

    #[test]
    fn root_pattern_matches_only_root() {
        let pattern = RoutePattern::parse("/").expect("pattern");
        assert!(pattern.matches("/").is_some());
        assert!(pattern.matches("/x").is_none());
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(RoutePattern::parse("api").is_err());
        assert!(RoutePattern::parse("/a//b").is_err());
        assert!(RoutePattern::parse("/a/:1x").is_err());
        assert!(RoutePattern::parse("/a/:id/:id").is_err());
    }

    #[test]
    fn dispatch_distinguishes_404_and_405() {
        let mut router = Router::new();
        router
            .register(HttpMethod::Get, "/api/things/:id", "test.get", echo("id"))
            .expect("register");

        let ok = router.dispatch(&HttpRequest::new(HttpMethod::Get, "/api/things/7"));
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body_json().expect("json"), "7");

        let wrong_method = router.dispatch(&HttpRequest::new(HttpMethod::Put, "/api/things/7"));
        assert_eq!(wrong_method.status, 405);

        let missing = router.dispatch(&HttpRequest::new(HttpMethod::Get, "/nowhere"));
        assert_eq!(missing.status, 404);
    }

    #[test]
    fn rejects_routes_with_same_shape() {
        let mut router = Router::new();
        router
            .register(HttpMethod::Get, "/api/things/:id", "a", echo("id"))
            .expect("register");
        let err = router
            .register(HttpMethod::Get, "/api/things/:other", "b", echo("other"))
            .expect_err("duplicate shape");
        assert!(matches!(err, RouteRegistrationError::Duplicate { .. }));
        router
            .register(HttpMethod::Delete, "/api/things/:id", "c", echo("id"))
            .expect("other method is fine");
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn check_reports_first_conflict_without_registering() {
        let mut router = Router::new();
        router
            .register(HttpMethod::Get, "/taken", "a", echo("id"))
            .expect("register");

        assert_eq!(
            router.check(&[(HttpMethod::Get, "/a/:x"), (HttpMethod::Post, "/a/:y")]),
            Ok(())
        );
        let (index, err) = router
            .check(&[
                (HttpMethod::Get, "/a/:x"),
                (HttpMethod::Get, "/b"),
                (HttpMethod::Get, "/a/:y"),
            ])
            .expect_err("same shape in batch");
        assert_eq!(index, 2);
        assert!(matches!(err, RouteRegistrationError::Duplicate { .. }));

        let (index, _) = router
            .check(&[(HttpMethod::Get, "/ok"), (HttpMethod::Get, "/taken")])
            .expect_err("already registered");
        assert_eq!(index, 1);
        let (index, err) = router
            .check(&[(HttpMethod::Get, "nope")])
            .expect_err("bad pattern");
        assert_eq!(index, 0);
        assert!(matches!(err, RouteRegistrationError::Pattern(_)));
        assert_eq!(router.len(), 1);
    }
}
