//! Server fragment declaration parsing and validation.
//!
//! A server fragment is a line-oriented route table:
//!
//! ```text
//! requires store, routes
//! # METHOD PATTERN HANDLER_ID
//! GET /api/things things.list
//! ```
//!
//! The optional `requires` header must precede every route. A fragment that
//! declares routes must declare the `routes` capability.

use crate::extension::capability::{
    parse_service_capability, ServiceCapability, ServiceCapabilityError,
};
use crate::http::router::{PatternError, RoutePattern};
use crate::http::types::HttpMethod;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Keyword that opens the capability header line.
pub const REQUIRES_KEYWORD: &str = "requires";

/// One `METHOD PATTERN HANDLER_ID` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDeclaration {
    /// 1-based source line.
    pub line: usize,
    pub method: HttpMethod,
    pub pattern: String,
    pub handler: String,
}

/// Parsed server fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFragment {
    pub capabilities: BTreeSet<ServiceCapability>,
    pub routes: Vec<RouteDeclaration>,
}

impl ServerFragment {
    /// Parses and validates fragment text.
    pub fn parse(source: &str) -> Result<Self, FragmentError> {
        let mut fragment = Self::default();
        let mut header_seen = false;

        for (index, raw_line) in source.lines().enumerate() {
            let line = index + 1;
            let content = strip_comment(raw_line).trim();
            if content.is_empty() {
                continue;
            }

            let tokens: Vec<&str> = content.split_whitespace().collect();
            if tokens[0] == REQUIRES_KEYWORD {
                if header_seen || !fragment.routes.is_empty() {
                    return Err(FragmentError::MisplacedHeader { line });
                }
                header_seen = true;
                let declared = content[REQUIRES_KEYWORD.len()..].trim();
                for value in declared.split(',') {
                    let capability = parse_service_capability(value)
                        .map_err(|error| FragmentError::Capability { line, error })?;
                    if !fragment.capabilities.insert(capability) {
                        return Err(FragmentError::DuplicateCapability { line, capability });
                    }
                }
                continue;
            }

            fragment.routes.push(parse_route(line, content, &tokens)?);
        }

        fragment.validate()?;
        Ok(fragment)
    }

    pub fn declares(&self, capability: ServiceCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Checks cross-line invariants.
    pub fn validate(&self) -> Result<(), FragmentError> {
        if let Some(first) = self.routes.first() {
            if !self.declares(ServiceCapability::Routes) {
                return Err(FragmentError::UndeclaredCapability {
                    line: first.line,
                    capability: ServiceCapability::Routes,
                });
            }
        }

        let mut seen = BTreeSet::new();
        for route in &self.routes {
            if !seen.insert((route.method, route.pattern.as_str())) {
                return Err(FragmentError::DuplicateRoute {
                    line: route.line,
                    method: route.method,
                    pattern: route.pattern.clone(),
                });
            }
        }
        Ok(())
    }
}

fn parse_route(line: usize, content: &str, tokens: &[&str]) -> Result<RouteDeclaration, FragmentError> {
    let [method, pattern, handler] = tokens else {
        return Err(FragmentError::MalformedLine {
            line,
            content: content.to_string(),
        });
    };
    let method = HttpMethod::parse(method).ok_or_else(|| FragmentError::UnknownMethod {
        line,
        method: method.to_string(),
    })?;
    RoutePattern::parse(pattern).map_err(|error| FragmentError::InvalidPattern { line, error })?;
    if !is_valid_handler_id(handler) {
        return Err(FragmentError::InvalidHandlerId {
            line,
            handler: handler.to_string(),
        });
    }
    Ok(RouteDeclaration {
        line,
        method,
        pattern: pattern.to_string(),
        handler: handler.to_string(),
    })
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

fn is_valid_handler_id(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

/// Server fragment declaration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    MalformedLine { line: usize, content: String },
    MisplacedHeader { line: usize },
    Capability { line: usize, error: ServiceCapabilityError },
    DuplicateCapability { line: usize, capability: ServiceCapability },
    UndeclaredCapability { line: usize, capability: ServiceCapability },
    UnknownMethod { line: usize, method: String },
    InvalidPattern { line: usize, error: PatternError },
    InvalidHandlerId { line: usize, handler: String },
    DuplicateRoute { line: usize, method: HttpMethod, pattern: String },
}

impl Display for FragmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedLine { line, content } => write!(
                f,
                "line {line}: expected `METHOD PATTERN HANDLER_ID`, found `{content}`"
            ),
            Self::MisplacedHeader { line } => write!(
                f,
                "line {line}: `{REQUIRES_KEYWORD}` may appear once, before any route"
            ),
            Self::Capability { line, error } => write!(f, "line {line}: {error}"),
            Self::DuplicateCapability { line, capability } => {
                write!(f, "line {line}: capability is duplicated: {capability}")
            }
            Self::UndeclaredCapability { line, capability } => {
                write!(f, "line {line}: capability `{capability}` is not declared")
            }
            Self::UnknownMethod { line, method } => {
                write!(f, "line {line}: unsupported method `{method}`")
            }
            Self::InvalidPattern { line, error } => write!(f, "line {line}: {error}"),
            Self::InvalidHandlerId { line, handler } => {
                write!(f, "line {line}: handler id is invalid: {handler}")
            }
            Self::DuplicateRoute {
                line,
                method,
                pattern,
            } => write!(f, "line {line}: route declared twice: {method} {pattern}"),
        }
    }
}

impl Error for FragmentError {}

#[cfg(test)]
mod tests {
    use super::{FragmentError, ServerFragment};
    use crate::extension::capability::ServiceCapability;
    use crate::http::types::HttpMethod;

    #[test]
    fn parses_header_routes_and_comments() {
        let fragment = ServerFragment::parse(
            "# service routes\nrequires store, routes\n\nGET / page.root   # root\nDELETE /api/things/:id things.delete\n",
        )
        .expect("valid fragment");
        assert!(fragment.declares(ServiceCapability::Store));
        assert!(fragment.declares(ServiceCapability::Routes));
        assert_eq!(fragment.routes.len(), 2);
        assert_eq!(fragment.routes[0].line, 4);
        assert_eq!(fragment.routes[1].method, HttpMethod::Delete);
        assert_eq!(fragment.routes[1].handler, "things.delete");
    }

    #[test]
    fn comment_only_fragment_is_empty() {
        let fragment = ServerFragment::parse("# nothing here\n").expect("valid fragment");
        assert!(fragment.routes.is_empty());
        assert!(fragment.capabilities.is_empty());
    }

    #[test]
    fn routes_require_routes_capability() {
        let err = ServerFragment::parse("GET / page.root").expect_err("undeclared");
        assert_eq!(
            err,
            FragmentError::UndeclaredCapability {
                line: 1,
                capability: ServiceCapability::Routes
            }
        );
    }

    #[test]
    fn rejects_header_after_routes() {
        let err = ServerFragment::parse("requires routes\nGET / page.root\nrequires store")
            .expect_err("misplaced");
        assert_eq!(err, FragmentError::MisplacedHeader { line: 3 });
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = ServerFragment::parse("requires routes\nGET /").expect_err("malformed");
        assert!(matches!(err, FragmentError::MalformedLine { line: 2, .. }));

        let err = ServerFragment::parse("requires routes\nFETCH / page.root").expect_err("method");
        assert!(matches!(err, FragmentError::UnknownMethod { line: 2, .. }));

        let err = ServerFragment::parse("requires routes\nGET nowhere page.root").expect_err("pattern");
        assert!(matches!(err, FragmentError::InvalidPattern { line: 2, .. }));

        let err = ServerFragment::parse("requires routes\nGET / Page-Root").expect_err("handler");
        assert!(matches!(err, FragmentError::InvalidHandlerId { line: 2, .. }));
    }

    #[test]
    fn rejects_duplicate_routes_and_capabilities() {
        let err = ServerFragment::parse("requires routes\nGET / page.root\nGET / page.preview")
            .expect_err("duplicate route");
        assert!(matches!(err, FragmentError::DuplicateRoute { line: 3, .. }));

        let err = ServerFragment::parse("requires routes, routes").expect_err("duplicate cap");
        assert!(matches!(err, FragmentError::DuplicateCapability { line: 1, .. }));

        let err = ServerFragment::parse("requires network").expect_err("unsupported cap");
        assert!(matches!(err, FragmentError::Capability { line: 1, .. }));
    }
}
