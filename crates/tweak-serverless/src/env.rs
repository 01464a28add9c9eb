//! Environment variable access.
//!
//! Configuration never reads `std::env` directly; it goes through an
//! [`EnvSource`] so tests can supply a fixed map instead of mutating the
//! process environment.

use std::collections::HashMap;

use crate::config::ConfigError;

/// A source of environment variables.
pub trait EnvSource: Send + Sync {
    /// Look up a variable, returning `None` when it is unset.
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads variables from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables, used by tests and embedded callers.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, replacing any previous value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Typed accessors over an [`EnvSource`].
pub struct EnvReader<'a> {
    source: &'a dyn EnvSource,
}

impl<'a> EnvReader<'a> {
    pub fn new(source: &'a dyn EnvSource) -> Self {
        Self { source }
    }

    /// Read a string, falling back to `default` when unset.
    pub fn get_string(&self, name: &str, default: &str) -> String {
        self.source
            .get(name)
            .unwrap_or_else(|| default.to_string())
    }

    /// Read a boolean. Accepts `true`/`false` (any case) and `1`/`0`.
    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.source.get(name) {
            None => Ok(default),
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::InvalidBool {
                name: name.to_string(),
                value: raw,
            }),
        }
    }

    /// Read a variable that must be set and non-empty.
    pub fn get_required_string(&self, name: &str) -> Result<String, ConfigError> {
        match self.source.get(name) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigError::MissingVariable {
                name: name.to_string(),
            }),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
