//! Capability declarations for the server fragment boundary.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Privilege a server fragment may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceCapability {
    /// Read and mutate Things through the store accessor.
    Store,
    /// Register HTTP routes.
    Routes,
}

impl ServiceCapability {
    /// Stable string id used in fragment headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => SERVICE_CAPABILITY_STORE,
            Self::Routes => SERVICE_CAPABILITY_ROUTES,
        }
    }
}

impl Display for ServiceCapability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header string value for the store capability.
pub const SERVICE_CAPABILITY_STORE: &str = "store";
/// Header string value for the route capability.
pub const SERVICE_CAPABILITY_ROUTES: &str = "routes";

const SUPPORTED_SERVICE_CAPABILITY_STRINGS: &[&str] =
    &[SERVICE_CAPABILITY_STORE, SERVICE_CAPABILITY_ROUTES];

/// Returns supported capability declaration strings.
pub fn supported_service_capability_strings() -> &'static [&'static str] {
    SUPPORTED_SERVICE_CAPABILITY_STRINGS
}

/// Parses one capability from its declaration string.
pub fn parse_service_capability(value: &str) -> Result<ServiceCapability, ServiceCapabilityError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(ServiceCapabilityError::EmptyCapability);
    }

    match normalized {
        SERVICE_CAPABILITY_STORE => Ok(ServiceCapability::Store),
        SERVICE_CAPABILITY_ROUTES => Ok(ServiceCapability::Routes),
        other => Err(ServiceCapabilityError::UnsupportedCapability(
            other.to_string(),
        )),
    }
}

/// Capability parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCapabilityError {
    EmptyCapability,
    UnsupportedCapability(String),
}

impl Display for ServiceCapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCapability => write!(f, "capability value must not be empty"),
            Self::UnsupportedCapability(value) => {
                write!(
                    f,
                    "capability is unsupported: {value}; expected one of {}",
                    supported_service_capability_strings().join(", ")
                )
            }
        }
    }
}

impl Error for ServiceCapabilityError {}
