//! Tracing helpers.
//!
//! The crate only emits `tracing` events and spans. Hosts install their own
//! subscriber, or enable the `tracing-init` feature and call [`init_tracing`].

mod spans;

pub use spans::{decision_span, tool_dispatch_span};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl TracingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub level: TracingLevel,
    /// Extra `EnvFilter` directives, e.g. `fleet_agent::executor=trace`.
    pub directives: Option<String>,
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: TracingLevel::Info,
            directives: None,
            with_target: true,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: TracingLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    /// `RUST_LOG` wins when set; otherwise the level plus any directives.
    pub fn filter_string(&self) -> String {
        match &self.directives {
            Some(extra) if !extra.trim().is_empty() => format!("{},{}", self.level.as_str(), extra),
            _ => self.level.as_str().to_string(),
        }
    }
}

#[cfg(feature = "tracing-init")]
#[derive(Debug, thiserror::Error)]
pub enum TracingInitError {
    #[error("invalid filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs a global fmt subscriber. Returns `Ok(false)` when disabled.
#[cfg(feature = "tracing-init")]
pub fn init_tracing(config: &TracingConfig) -> Result<bool, TracingInitError> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    if !config.enabled {
        return Ok(false);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.filter_string())?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(config.with_target))
        .try_init()?;
    Ok(true)
}
