//! Environment variable overrides.
//!
//! Keys map to upper-snake variables under a prefix: `max_iterations` is
//! read from `FLEET_AGENT_MAX_ITERATIONS`, dots become underscores. Environment variables
//! are only read, never set, so lookups are thread-safe.

use std::str::FromStr;

use super::{ConfigError, ConfigResult};

pub const DEFAULT_ENV_PREFIX: &str = "FLEET_AGENT_";

#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: Option<String>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn env_key(&self, key: &str) -> String {
        let key = key.to_uppercase().replace('.', "_");
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key,
        }
    }

    pub fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }

    pub fn get_parsed<T>(&self, key: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: self.env_key(key),
                message: e.to_string(),
            })
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::prefixed(DEFAULT_ENV_PREFIX)
    }
}
