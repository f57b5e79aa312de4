//! Fleet configuration: machine targets, loop settings and model settings.
//!
//! ```rust,no_run
//! use fleet_agent::config::FleetConfig;
//!
//! # async fn example() -> Result<(), fleet_agent::config::ConfigError> {
//! let config = FleetConfig::load("fleet.json").await?;
//! for machine in &config.machines {
//!     println!("{} ({})", machine.name, machine.kind);
//! }
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod file;
pub mod target;

pub use env::{DEFAULT_ENV_PREFIX, EnvConfigProvider};
pub use target::{AuthConfig, MachineTarget, TargetKind};

use std::collections::HashSet;
use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::observability::TracingConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Agent loop settings as they appear in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub max_context_tokens: usize,
    pub shell_timeout_secs: u64,
    pub truncate_keep_last: usize,
    pub run_timeout_secs: Option<u64>,
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_context_tokens: 8000,
            shell_timeout_secs: 60,
            truncate_keep_last: 5,
            run_timeout_secs: None,
            system_prompt: None,
        }
    }
}

/// Decision provider settings for the OpenAI-compatible client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    pub model: String,
    #[serde(deserialize_with = "target::deserialize_optional_secret")]
    pub api_key: Option<SecretString>,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.7,
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub machines: Vec<MachineTarget>,
    pub agent: AgentSettings,
    pub model: ModelSettings,
    pub tracing: TracingConfig,
}

impl FleetConfig {
    /// Reads a JSON file, applies `FLEET_AGENT_*` overrides, and validates.
    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut config = file::read_json(path.as_ref()).await?;
        config.apply_env(&EnvConfigProvider::default())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_machine(mut self, machine: MachineTarget) -> Self {
        self.machines.push(machine);
        self
    }

    pub fn apply_env(&mut self, env: &EnvConfigProvider) -> ConfigResult<()> {
        if let Some(v) = env.get_parsed("max_iterations")? {
            self.agent.max_iterations = v;
        }
        if let Some(v) = env.get_parsed("max_context_tokens")? {
            self.agent.max_context_tokens = v;
        }
        if let Some(v) = env.get_parsed("shell_timeout")? {
            self.agent.shell_timeout_secs = v;
        }
        if let Some(v) = env.get("model")? {
            self.model.model = v;
        }
        if let Some(v) = env.get("base_url")? {
            self.model.base_url = v;
        }
        if let Some(v) = env.get("api_key")? {
            self.model.api_key = Some(SecretString::from(v));
        }
        Ok(())
    }

    /// Collects every problem instead of stopping at the first.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for machine in &self.machines {
            let key = format!("machines.{}", machine.name);
            if machine.name.trim().is_empty() {
                errors.push(ConfigError::InvalidValue {
                    key: "machines.name".into(),
                    message: "machine name must not be empty".into(),
                });
            }
            if !seen.insert(machine.name.as_str()) {
                errors.push(ConfigError::InvalidValue {
                    key: key.clone(),
                    message: "duplicate machine name".into(),
                });
            }
            if machine.kind != TargetKind::Local {
                if machine.host.as_deref().is_none_or(|h| h.trim().is_empty()) {
                    errors.push(ConfigError::InvalidValue {
                        key: format!("{}.host", key),
                        message: format!("{} targets require a host", machine.kind),
                    });
                }
                if machine.username.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    errors.push(ConfigError::InvalidValue {
                        key: format!("{}.username", key),
                        message: format!("{} targets require a username", machine.kind),
                    });
                }
            }
            if !machine.kind.is_available() {
                errors.push(ConfigError::InvalidValue {
                    key: format!("{}.kind", key),
                    message: format!(
                        "{} backend is not compiled in (enable the `{}` feature)",
                        machine.kind, machine.kind
                    ),
                });
            }
        }

        if self.machines.iter().filter(|m| m.default).count() > 1 {
            errors.push(ConfigError::InvalidValue {
                key: "machines.default".into(),
                message: "at most one machine may be marked default".into(),
            });
        }
        if self.agent.max_iterations == 0 {
            errors.push(ConfigError::InvalidValue {
                key: "agent.max_iterations".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.agent.max_context_tokens == 0 {
            errors.push(ConfigError::InvalidValue {
                key: "agent.max_context_tokens".into(),
                message: "must be greater than 0".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationErrors(ValidationErrors(errors)))
        }
    }
}
