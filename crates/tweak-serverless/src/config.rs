//! Process-wide configuration.
//!
//! Every setting resolves in the same order: explicit override, then the
//! environment variable, then a literal default.
//!
//! # Environment Variables
//!
//! | Variable | Effect | Default |
//! |---|---|---|
//! | `NODE_ENV` | environment name | `unknown` |
//! | `LOG_LEVEL` | minimum log severity | `verbose` |
//! | `LOGGLY` | enable the Loggly sink | `false` |
//! | `LOGGLY_TOKEN`, `LOGGLY_SUBDOMAIN` | Loggly credentials | required when enabled |
//! | `LOGGLY_TAGS` | extra comma-separated tags | empty |
//! | `AIRBRAKE` | enable Airbrake notifications | `false` |
//! | `AIRBRAKE_PROJECT_ID`, `AIRBRAKE_PROJECT_KEY` | Airbrake credentials | required when enabled |
//! | `AIRBRAKE_HOST` | Airbrake API host | `https://api.airbrake.io` |
//! | `ON_LOCAL` | colored human-readable console output | `false` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::env::{EnvReader, EnvSource};
use crate::logging::LogLevel;

/// Tag added to every Loggly entry shipped by this crate.
pub const LIBRARY_TAG: &str = "tweak-serverless";

/// Default Airbrake API host.
pub const DEFAULT_AIRBRAKE_HOST: &str = "https://api.airbrake.io";

/// Errors raised while resolving configuration. These are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable required by an enabled sink is unset or empty.
    #[error("required environment variable {name} is not set")]
    MissingVariable { name: String },

    /// A boolean variable could not be parsed.
    #[error("environment variable {name} must be a boolean, got {value:?}")]
    InvalidBool { name: String, value: String },

    /// `LOG_LEVEL` names an unknown level.
    #[error("unknown log level {value:?}")]
    InvalidLogLevel { value: String },
}

/// Name and version of the package hosting the handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

impl PackageInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Build a [`PackageInfo`] from the calling crate's Cargo metadata.
#[macro_export]
macro_rules! package_info {
    () => {
        $crate::PackageInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    };
}

/// Caller-supplied values that take precedence over the environment.
///
/// Keys are camelCase when deserialized. Keys this crate does not know are
/// kept in [`ConfigOverrides::extensions`] and copied into
/// [`Config::extensions`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub log_level: Option<LogLevel>,
    pub loggly: Option<bool>,
    pub loggly_token: Option<String>,
    pub loggly_subdomain: Option<String>,
    /// Comma-separated tags.
    pub loggly_tags: Option<String>,
    pub airbrake: Option<bool>,
    pub airbrake_project_id: Option<String>,
    pub airbrake_project_key: Option<String>,
    pub airbrake_host: Option<String>,
    pub on_local: Option<bool>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// Loggly sink settings, present only when the sink is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogglyConfig {
    pub token: String,
    pub subdomain: String,
    pub tags: Vec<String>,
}

/// Airbrake settings, present only when notifications are enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirbrakeConfig {
    pub project_id: String,
    pub project_key: String,
    pub host: String,
}

/// Resolved configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub environment: String,
    pub log_level: LogLevel,
    pub loggly: Option<LogglyConfig>,
    pub airbrake: Option<AirbrakeConfig>,
    pub on_local: bool,
    pub extensions: Map<String, Value>,
}

impl Config {
    /// Resolve configuration for `package`.
    pub fn resolve(
        package: &PackageInfo,
        overrides: ConfigOverrides,
        env: &dyn EnvSource,
    ) -> Result<Self, ConfigError> {
        let reader = EnvReader::new(env);

        let environment = reader.get_string("NODE_ENV", "unknown");

        let log_level = match overrides.log_level {
            Some(level) => level,
            None => {
                let raw = reader.get_string("LOG_LEVEL", "verbose");
                raw.parse::<LogLevel>()
                    .map_err(|_| ConfigError::InvalidLogLevel { value: raw })?
            }
        };

        let loggly_enabled = match overrides.loggly {
            Some(enabled) => enabled,
            None => reader.get_bool("LOGGLY", false)?,
        };
        let loggly = if loggly_enabled {
            let token = or_required(overrides.loggly_token, &reader, "LOGGLY_TOKEN")?;
            let subdomain = or_required(overrides.loggly_subdomain, &reader, "LOGGLY_SUBDOMAIN")?;
            let raw_tags = overrides
                .loggly_tags
                .unwrap_or_else(|| reader.get_string("LOGGLY_TAGS", ""));
            Some(LogglyConfig {
                token,
                subdomain,
                tags: loggly_tags(&raw_tags, &environment, package),
            })
        } else {
            None
        };

        let airbrake_enabled = match overrides.airbrake {
            Some(enabled) => enabled,
            None => reader.get_bool("AIRBRAKE", false)?,
        };
        let airbrake = if airbrake_enabled {
            Some(AirbrakeConfig {
                project_id: or_required(
                    overrides.airbrake_project_id,
                    &reader,
                    "AIRBRAKE_PROJECT_ID",
                )?,
                project_key: or_required(
                    overrides.airbrake_project_key,
                    &reader,
                    "AIRBRAKE_PROJECT_KEY",
                )?,
                host: overrides
                    .airbrake_host
                    .unwrap_or_else(|| reader.get_string("AIRBRAKE_HOST", DEFAULT_AIRBRAKE_HOST)),
            })
        } else {
            None
        };

        let on_local = match overrides.on_local {
            Some(on_local) => on_local,
            None => reader.get_bool("ON_LOCAL", false)?,
        };

        Ok(Self {
            environment,
            log_level,
            loggly,
            airbrake,
            on_local,
            extensions: overrides.extensions,
        })
    }

    /// Look up a pass-through override by key.
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }
}

fn or_required(
    explicit: Option<String>,
    reader: &EnvReader<'_>,
    name: &str,
) -> Result<String, ConfigError> {
    match explicit {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => reader.get_required_string(name),
    }
}

/// Split comma-separated tags, append the mandatory ones and dedupe in
/// first-occurrence order.
fn loggly_tags(raw: &str, environment: &str, package: &PackageInfo) -> Vec<String> {
    let mandatory = [
        environment,
        LIBRARY_TAG,
        package.name.as_str(),
        package.version.as_str(),
    ];

    let mut tags: Vec<String> = Vec::new();
    for tag in raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .chain(mandatory)
    {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}
