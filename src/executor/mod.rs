//! Uniform file and command capability against one machine.
//!
//! [`LocalExecutor`] acts on the host. [`RemoteExecutor`] wraps a
//! [`RemoteTransport`] (SSH behind the `ssh` feature, WinRM behind `winrm`).
//! Both run every path and command through the target's
//! [`PathPolicy`](crate::security::PathPolicy) before touching anything.
//! [`ConnectionManager`] owns one executor per configured machine.

mod connection;
mod factory;
mod local;
mod remote;
#[cfg(feature = "ssh")]
mod ssh;
#[cfg(feature = "winrm")]
pub mod winrm;

pub use connection::{
    ConnectionManager, ConnectionStat, ConnectionTest, ExecutorStats, MachineInfo, ShutdownReport,
};
pub use factory::{BackendFactory, ExecutorFactory};
pub use local::LocalExecutor;
pub use remote::{RemoteExecutor, RemoteTransport};
#[cfg(feature = "ssh")]
pub use ssh::SshTransport;
#[cfg(feature = "winrm")]
pub use winrm::WinRmTransport;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::TargetKind;
use crate::security::{PathPolicy, SecurityError};

/// Largest file `read_file` will return.
pub const MAX_READ_BYTES: u64 = 2 * 1024 * 1024;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    PolicyDenied(#[from] SecurityError),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("connection to {target} failed: {message}")]
    ConnectionFailed { target: String, message: String },

    #[error("authentication to {target} failed: {message}")]
    AuthenticationFailed { target: String, message: String },

    #[error("{0} backend is not available in this build")]
    BackendUnavailable(TargetKind),

    #[error("operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("file too large: {path} is {size} bytes (limit {limit})")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("remote protocol error: {0}")]
    Protocol(String),

    #[error("executor {0} is closed")]
    Closed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    pub fn connection_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn authentication_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Whether a caller may retry the same operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }
}

impl std::fmt::Display for DirEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = if self.is_dir { "dir" } else { "file" };
        write!(f, "{}: {}", label, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileWrite {
    pub path: String,
    pub bytes: usize,
}

/// Capability contract shared by every backend.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> TargetKind;
    fn policy(&self) -> &PathPolicy;

    async fn read_file(&self, path: &str) -> Result<String, ExecutorError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<FileWrite, ExecutorError>;
    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError>;
    async fn list_files(&self, path: &str) -> Result<Vec<DirEntry>, ExecutorError>;
    async fn close(&self) -> Result<(), ExecutorError>;

    async fn test_connection(&self) -> Result<(), ExecutorError> {
        let output = self.execute_command("echo test", CONNECT_TIMEOUT).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ExecutorError::connection_failed(
                self.name(),
                format!("health check exited with code {}", output.exit_code),
            ))
        }
    }
}
