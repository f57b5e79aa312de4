//! # fleet-agent
//!
//! A model-directed operations agent. A decision provider reads the
//! conversation and either answers or asks for tool calls; the agent runs
//! those calls against local, SSH or WinRM machines through one executor
//! contract, with every path and command vetted by the security policy first.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fleet_agent::config::{FleetConfig, MachineTarget};
//! use fleet_agent::model::OpenAiClient;
//! use fleet_agent::AgentBuilder;
//!
//! #[tokio::main]
//! async fn main() -> fleet_agent::Result<()> {
//!     let config = FleetConfig::default().with_machine(
//!         MachineTarget::local("local").with_allowed_roots(["/srv/app"]),
//!     );
//!     let provider = OpenAiClient::new("https://api.openai.com/v1", "gpt-4o-mini")?
//!         .with_api_key(std::env::var("OPENAI_API_KEY").unwrap_or_default());
//!
//!     let agent = AgentBuilder::from_config(config)
//!         .provider(Arc::new(provider))
//!         .build()?;
//!     let result = agent.run("List the files in /srv/app").await?;
//!     println!("{}", result.text);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod agent;
pub mod config;
pub mod executor;
pub mod memory;
pub mod model;
pub mod observability;
pub mod prelude;
pub mod security;
pub mod tools;
pub mod types;

pub use agent::{
    AgentBuilder, AgentLoop, AgentMetrics, AgentResult, AgentState, ExecutionConfig,
    ExponentialBackoff, RetryPolicy, ToolStats,
};
pub use config::{AuthConfig, ConfigError, FleetConfig, MachineTarget, TargetKind};
pub use executor::{ConnectionManager, Executor, ExecutorError, LocalExecutor};
pub use memory::{ConversationMemory, MemoryStats, TokenEstimator};
pub use model::{Decision, DecisionProvider, DecisionRequest, ModelError, OpenAiClient};
pub use security::{PathPolicy, SecurityError, is_dangerous_command, is_safe_path};
pub use tools::{ExecutorResolver, SchemaTool, Tool, ToolRegistry, dispatch_batch};
pub use types::{
    Message, Role, ToolCallRequest, ToolDefinition, ToolError, ToolExecutionResult, ToolOutput,
};

use std::time::Duration;

/// Which budget a run exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLimit {
    Iterations(usize),
    TokenBudget { current: usize, max: usize },
}

impl std::fmt::Display for LoopLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iterations(n) => write!(f, "no answer after {} iterations", n),
            Self::TokenBudget { current, max } => {
                write!(f, "history needs {} tokens, budget is {}", current, max)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Decision provider still failing after every retry.
    #[error("Decision provider unavailable after {attempts} attempts: {message}")]
    ModelUnavailable { attempts: u32, message: String },

    /// Decision provider failed in a way retrying cannot fix.
    #[error("Decision provider error: {0}")]
    Model(#[from] model::ModelError),

    #[error("Loop limit exceeded: {0}")]
    LoopExceeded(LoopLimit),

    #[error("Authentication failed for {target}: {message}")]
    AuthenticationFailed { target: String, message: String },

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Connection to {target} failed: {message}")]
    ConnectionFailed { target: String, message: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Tool '{tool}' declares an invalid input schema: {message}")]
    InvalidToolSchema { tool: String, message: String },

    #[error("Security policy: {0}")]
    Security(#[from] SecurityError),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credentials rejected, or an operation refused by policy
    Authorization,
    /// Configuration or assembly problems
    Configuration,
    /// May succeed if tried again
    Transient,
    /// Iteration or token budget exhausted
    ResourceLimit,
    /// Cancelled by the caller or stopped by the run deadline
    Interrupted,
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::AuthenticationFailed { .. } | Error::Security(_) => ErrorCategory::Authorization,
            Error::Model(e) if e.is_unauthorized() => ErrorCategory::Authorization,

            Error::Config(_)
            | Error::DuplicateTool(_)
            | Error::InvalidToolSchema { .. }
            | Error::UnknownTarget(_) => ErrorCategory::Configuration,

            Error::ModelUnavailable { .. } | Error::ConnectionFailed { .. } => {
                ErrorCategory::Transient
            }
            Error::Model(e) if e.is_retryable() => ErrorCategory::Transient,

            Error::LoopExceeded(_) => ErrorCategory::ResourceLimit,

            Error::Cancelled | Error::Timeout(_) => ErrorCategory::Interrupted,

            Error::Model(_) | Error::Executor(_) | Error::Io(_) | Error::Json(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Ends a run in the error state. Interruptions are not fatal.
    pub fn is_fatal(&self) -> bool {
        self.category() != ErrorCategory::Interrupted
    }

    pub fn is_authorization_error(&self) -> bool {
        self.category() == ErrorCategory::Authorization
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<ExecutorError> for Error {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::PolicyDenied(e) => Error::Security(e),
            ExecutorError::UnknownTarget(name) => Error::UnknownTarget(name),
            ExecutorError::ConnectionFailed { target, message } => {
                Error::ConnectionFailed { target, message }
            }
            ExecutorError::AuthenticationFailed { target, message } => {
                Error::AuthenticationFailed { target, message }
            }
            ExecutorError::Timeout(limit) => Error::Timeout(limit),
            ExecutorError::Io(e) => Error::Io(e),
            other => Error::Executor(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
