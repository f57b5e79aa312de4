//! Executor for the host the agent runs on.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, DirEntry, Executor, ExecutorError, FileWrite, MAX_READ_BYTES};
use crate::config::{MachineTarget, TargetKind};
use crate::security::{PathPolicy, SecurityPolicy};

pub struct LocalExecutor {
    name: String,
    policy: PathPolicy,
    working_dir: Option<PathBuf>,
    closed: AtomicBool,
}

impl LocalExecutor {
    pub fn new(name: impl Into<String>, policy: PathPolicy) -> Self {
        let working_dir = policy
            .allowed_roots()
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_dir());
        Self {
            name: name.into(),
            policy,
            working_dir,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_target(target: &MachineTarget) -> Self {
        Self::new(target.name.clone(), target.path_policy())
    }

    /// Directory commands start in: the first allowed root that exists.
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    fn ensure_open(&self) -> Result<(), ExecutorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutorError::Closed(self.name.clone()));
        }
        Ok(())
    }

    fn shell_command(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

fn map_io(err: std::io::Error, path: &str) -> ExecutorError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ExecutorError::NotFound(path.to_string())
    } else {
        ExecutorError::Io(err)
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Local
    }

    fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    async fn read_file(&self, path: &str) -> Result<String, ExecutorError> {
        self.ensure_open()?;
        let resolved = self.policy.check(path)?;

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| map_io(e, &resolved))?;
        if metadata.is_dir() {
            return Err(ExecutorError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is a directory", resolved),
            )));
        }
        if metadata.len() > MAX_READ_BYTES {
            return Err(ExecutorError::FileTooLarge {
                path: resolved,
                size: metadata.len(),
                limit: MAX_READ_BYTES,
            });
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| map_io(e, &resolved))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<FileWrite, ExecutorError> {
        self.ensure_open()?;
        let resolved = self.policy.check(path)?;

        if let Some(parent) = Path::new(&resolved).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content.as_bytes()).await?;

        tracing::debug!(target_name = %self.name, path = %resolved, bytes = content.len(), "Wrote file");
        Ok(FileWrite {
            path: resolved,
            bytes: content.len(),
        })
    }

    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        self.ensure_open()?;
        SecurityPolicy::check_command(command)?;

        let mut cmd = Self::shell_command(command);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(ExecutorError::Timeout(timeout)),
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn list_files(&self, path: &str) -> Result<Vec<DirEntry>, ExecutorError> {
        self.ensure_open()?;
        let resolved = self.policy.check(path)?;

        let mut reader = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| map_io(e, &resolved))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
