//! Service configuration resolved from environment variables.
//!
//! # Invariants
//! - Resolution is a pure function of the lookup it is given.
//! - Unset variables fall back to per-profile defaults; set but invalid
//!   variables are errors, never silently ignored.

use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_PROFILE: &str = "THINGSYS_ENV";
pub const ENV_HOST: &str = "THINGSYS_HOST";
pub const ENV_PORT: &str = "THINGSYS_PORT";
pub const ENV_STORAGE_DIR: &str = "THINGSYS_STORAGE_DIR";
pub const ENV_TEMPLATE_DIR: &str = "THINGSYS_TEMPLATE_DIR";
pub const ENV_LOG_DIR: &str = "THINGSYS_LOG_DIR";
pub const ENV_LOG_LEVEL: &str = "THINGSYS_LOG_LEVEL";

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TEMPLATE_DIR: &str = "templates/system";
const LOG_SUBDIR: &str = "logs";

/// Deployment profile selecting the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Production,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    fn default_host(self) -> &'static str {
        match self {
            Self::Development => "localhost",
            Self::Production => "0.0.0.0",
        }
    }

    fn default_storage_dir(self) -> &'static str {
        match self {
            Self::Development => "./storage",
            Self::Production => "/var/thing-system/storage",
        }
    }
}

/// Resolved service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub profile: Profile,
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub template_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: &'static str,
}

impl ServiceConfig {
    /// Resolves settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Resolves settings from `lookup`.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str| -> Option<String> {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        let profile = match var(ENV_PROFILE) {
            Some(value) => Profile::parse(&value).ok_or(ConfigError::Invalid {
                name: ENV_PROFILE,
                value,
                expected: "development|production",
            })?,
            None => Profile::Development,
        };

        let host = var(ENV_HOST)
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| profile.default_host().to_string());

        let port = match var(ENV_PORT) {
            Some(value) => match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: ENV_PORT,
                        value,
                        expected: "a port number between 1 and 65535",
                    })
                }
            },
            None => DEFAULT_PORT,
        };

        let storage_dir = PathBuf::from(
            var(ENV_STORAGE_DIR).unwrap_or_else(|| profile.default_storage_dir().to_string()),
        );
        let template_dir =
            PathBuf::from(var(ENV_TEMPLATE_DIR).unwrap_or_else(|| DEFAULT_TEMPLATE_DIR.to_string()));
        let log_dir = var(ENV_LOG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| storage_dir.join(LOG_SUBDIR));

        let log_level = match var(ENV_LOG_LEVEL) {
            Some(value) => normalize_level(&value).map_err(|_| ConfigError::Invalid {
                name: ENV_LOG_LEVEL,
                value,
                expected: "trace|debug|info|warn|error",
            })?,
            None => default_log_level(),
        };

        Ok(Self {
            profile,
            host,
            port,
            storage_dir,
            template_dir,
            log_dir,
            log_level,
        })
    }

    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration resolution errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid {
                name,
                value,
                expected,
            } => write!(f, "{name}=`{value}` is invalid; expected {expected}"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Profile, ServiceConfig, ENV_PORT};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn resolve(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::resolve(|name| vars.get(name).cloned())
    }

    #[test]
    fn development_defaults() {
        let config = resolve(&[]).expect("defaults");
        assert_eq!(config.profile, Profile::Development);
        assert_eq!(config.listen_addr(), "localhost:3000");
        assert_eq!(config.storage_dir, PathBuf::from("./storage"));
        assert_eq!(config.log_dir, PathBuf::from("./storage/logs"));
    }

    #[test]
    fn production_defaults_and_overrides() {
        let config = resolve(&[("THINGSYS_ENV", "production")]).expect("production");
        assert_eq!(config.listen_addr(), "0.0.0.0:3000");
        assert_eq!(
            config.storage_dir,
            PathBuf::from("/var/thing-system/storage")
        );

        let config = resolve(&[
            ("THINGSYS_ENV", "production"),
            ("THINGSYS_PORT", "8080"),
            ("THINGSYS_STORAGE_DIR", "/srv/things"),
            ("THINGSYS_LOG_LEVEL", "WARNING"),
        ])
        .expect("overrides");
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage_dir, PathBuf::from("/srv/things"));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn rejects_invalid_values() {
        let err = resolve(&[("THINGSYS_PORT", "http")]).expect_err("bad port");
        assert!(matches!(err, ConfigError::Invalid { name: ENV_PORT, .. }));
        assert!(resolve(&[("THINGSYS_ENV", "staging")]).is_err());
        assert!(resolve(&[("THINGSYS_LOG_LEVEL", "loud")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = resolve(&[("THINGSYS_HOST", "  ")]).expect("blank host");
        assert_eq!(config.host, "localhost");
    }
}
