//! Engine configuration.
//!
//! Configuration is read from the environment through an [`EnvSource`], so
//! tests can supply variables without touching the process environment:
//!
//! ```rust
//! use tessera_query::config::{EngineConfig, MapEnvSource};
//!
//! let env = MapEnvSource::new().set("TESSERA_INLINE_NUMERIC_IDS", "false");
//! let config = EngineConfig::from_source(&env).unwrap();
//! assert!(!config.inline_numeric_page_ids);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get an environment variable value.
    fn get(&self, name: &str) -> Option<String>;
}

/// Environment source using `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment source backed by a HashMap.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create a new map-based environment source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Tunables of the query engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quote identifiers through the dialect's escaping function.
    pub escape_identifiers: bool,
    /// Inline the primary keys of a computed page as integer literals when
    /// every key is a verified integer.
    pub inline_numeric_page_ids: bool,
    /// Page sizes above this many ids are logged when inlined.
    pub max_inline_ids: usize,
    /// Issue relation side-loads concurrently.
    pub concurrent_side_loads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escape_identifiers: true,
            inline_numeric_page_ids: true,
            max_inline_ids: 10_000,
            concurrent_side_loads: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> QueryResult<Self> {
        Self::from_source(&StdEnvSource)
    }

    /// Read the configuration from an environment source.
    ///
    /// Unset variables keep their defaults; unparsable values are rejected.
    pub fn from_source<S: EnvSource>(source: &S) -> QueryResult<Self> {
        let mut config = Self::default();
        if let Some(v) = source.get("TESSERA_ESCAPE_IDENTIFIERS") {
            config.escape_identifiers = parse_bool("TESSERA_ESCAPE_IDENTIFIERS", &v)?;
        }
        if let Some(v) = source.get("TESSERA_INLINE_NUMERIC_IDS") {
            config.inline_numeric_page_ids = parse_bool("TESSERA_INLINE_NUMERIC_IDS", &v)?;
        }
        if let Some(v) = source.get("TESSERA_MAX_INLINE_IDS") {
            config.max_inline_ids = v.trim().parse().map_err(|_| {
                QueryError::invalid_configuration(format!(
                    "TESSERA_MAX_INLINE_IDS must be a positive integer, got \"{}\"",
                    v
                ))
            })?;
        }
        if let Some(v) = source.get("TESSERA_CONCURRENT_SIDE_LOADS") {
            config.concurrent_side_loads = parse_bool("TESSERA_CONCURRENT_SIDE_LOADS", &v)?;
        }
        Ok(config)
    }

    /// Set identifier escaping.
    pub fn escape_identifiers(mut self, enabled: bool) -> Self {
        self.escape_identifiers = enabled;
        self
    }

    /// Set numeric page id inlining.
    pub fn inline_numeric_page_ids(mut self, enabled: bool) -> Self {
        self.inline_numeric_page_ids = enabled;
        self
    }

    /// Set concurrent side-loading.
    pub fn concurrent_side_loads(mut self, enabled: bool) -> Self {
        self.concurrent_side_loads = enabled;
        self
    }
}

fn parse_bool(name: &str, value: &str) -> QueryResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(QueryError::invalid_configuration(format!(
            "{} must be a boolean, got \"{}\"",
            name, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_source(&MapEnvSource::new()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.escape_identifiers);
        assert!(config.inline_numeric_page_ids);
    }

    #[test]
    fn test_env_overrides() {
        let env = MapEnvSource::new()
            .set("TESSERA_ESCAPE_IDENTIFIERS", "off")
            .set("TESSERA_MAX_INLINE_IDS", "50")
            .set("TESSERA_CONCURRENT_SIDE_LOADS", "0");
        let config = EngineConfig::from_source(&env).unwrap();
        assert!(!config.escape_identifiers);
        assert_eq!(config.max_inline_ids, 50);
        assert!(!config.concurrent_side_loads);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let env = MapEnvSource::new().set("TESSERA_INLINE_NUMERIC_IDS", "maybe");
        let err = EngineConfig::from_source(&env).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);

        let env = MapEnvSource::new().set("TESSERA_MAX_INLINE_IDS", "-3");
        assert!(EngineConfig::from_source(&env).is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"inline_numeric_page_ids": false}"#).unwrap();
        assert!(!config.inline_numeric_page_ids);
        assert!(config.escape_identifiers);
    }
}
