//! Tool error types.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::security::SecurityError;

/// Recoverable failure of a single tool call, fed back to the decision provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("policy denied: {message}")]
    PolicyDenied { message: String },

    #[error("execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("connection to {target} failed: {message}")]
    ConnectionFailed { target: String, message: String },

    #[error("unknown target: {name}")]
    UnknownTarget { name: String },

    #[error("authentication to {target} failed: {message}")]
    AuthenticationFailed { target: String, message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("no target given and no default target configured")]
    NoDefaultTarget,
}

impl ToolError {
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool { name: name.into() }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn policy_denied(message: impl Into<String>) -> Self {
        Self::PolicyDenied {
            message: message.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Stable snake_case name used in tool-result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::UnknownTarget { .. } => "unknown_target",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::Timeout { .. } => "timeout",
            Self::NoDefaultTarget => "no_default_target",
        }
    }

    /// Errors the run cannot recover from by asking the model again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::NoDefaultTarget
        )
    }
}

impl From<SecurityError> for ToolError {
    fn from(err: SecurityError) -> Self {
        Self::policy_denied(err.to_string())
    }
}

impl From<ExecutorError> for ToolError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::PolicyDenied(e) => e.into(),
            ExecutorError::UnknownTarget(name) => Self::UnknownTarget { name },
            ExecutorError::ConnectionFailed { target, message } => {
                Self::ConnectionFailed { target, message }
            }
            ExecutorError::AuthenticationFailed { target, message } => {
                Self::AuthenticationFailed { target, message }
            }
            ExecutorError::Timeout(d) => Self::timeout(d.as_millis() as u64),
            other => Self::execution_failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(ToolError::unknown_tool("x").kind(), "unknown_tool");
        assert_eq!(ToolError::policy_denied("x").kind(), "policy_denied");
        assert_eq!(ToolError::timeout(5).to_string(), "timeout after 5ms");
    }

    #[test]
    fn test_from_executor_error() {
        let err: ToolError = ExecutorError::PolicyDenied(SecurityError::DangerousCommand("mkfs".into())).into();
        assert_eq!(err.kind(), "policy_denied");

        let err: ToolError = ExecutorError::AuthenticationFailed {
            target: "web".into(),
            message: "bad key".into(),
        }
        .into();
        assert!(err.is_fatal());

        let err: ToolError = ExecutorError::UnknownTarget("nope".into()).into();
        assert_eq!(err.kind(), "unknown_target");
        assert!(!err.is_fatal());

        assert!(ToolError::NoDefaultTarget.is_fatal());
    }
}
