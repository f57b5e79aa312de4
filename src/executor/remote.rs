//! Executor for machines reached over a network transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandOutput, DirEntry, Executor, ExecutorError, FileWrite, MAX_READ_BYTES};
use crate::config::TargetKind;
use crate::security::{PathPolicy, SecurityPolicy};

/// Raw wire operations for one remote session.
///
/// Paths handed to a transport have already passed the target's policy and
/// are absolute in the target's own style.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    fn protocol(&self) -> &'static str;

    /// Resolves symlinks on the remote host. `None` means the transport cannot
    /// tell, and the lexical verdict stands.
    async fn canonicalize(&self, _path: &str) -> Result<Option<String>, ExecutorError> {
        Ok(None)
    }

    async fn read_file(&self, path: &str, max_bytes: u64) -> Result<String, ExecutorError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<(), ExecutorError>;
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecutorError>;
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, ExecutorError>;
    async fn disconnect(&self) -> Result<(), ExecutorError>;
}

pub struct RemoteExecutor {
    name: String,
    kind: TargetKind,
    policy: PathPolicy,
    transport: Box<dyn RemoteTransport>,
    closed: AtomicBool,
}

impl RemoteExecutor {
    pub fn new(
        name: impl Into<String>,
        kind: TargetKind,
        policy: PathPolicy,
        transport: Box<dyn RemoteTransport>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            policy,
            transport,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), ExecutorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutorError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Lexical policy check, then a second check of the remote host's own
    /// resolution so a link under an allowed root cannot lead outside it.
    async fn checked_path(&self, path: &str) -> Result<String, ExecutorError> {
        let resolved = self.policy.check(path)?;
        match self.transport.canonicalize(&resolved).await? {
            Some(real) if real != resolved => {
                tracing::debug!(target_name = %self.name, path = %resolved, real = %real, "Remote path resolves through a link");
                Ok(self.policy.check(&real)?)
            }
            _ => Ok(resolved),
        }
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TargetKind {
        self.kind
    }

    fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    async fn read_file(&self, path: &str) -> Result<String, ExecutorError> {
        self.ensure_open()?;
        let resolved = self.checked_path(path).await?;
        self.transport.read_file(&resolved, MAX_READ_BYTES).await
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<FileWrite, ExecutorError> {
        self.ensure_open()?;
        let resolved = self.checked_path(path).await?;
        self.transport.write_file(&resolved, content).await?;
        tracing::debug!(
            target_name = %self.name,
            protocol = self.transport.protocol(),
            path = %resolved,
            bytes = content.len(),
            "Wrote remote file"
        );
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
        match tokio::time::timeout(timeout, self.transport.run(command, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout(timeout)),
        }
    }

    async fn list_files(&self, path: &str) -> Result<Vec<DirEntry>, ExecutorError> {
        self.ensure_open()?;
        let resolved = self.checked_path(path).await?;
        let mut entries = self.transport.list_dir(&resolved).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(target_name = %self.name, protocol = self.transport.protocol(), "Closing remote session");
        self.transport.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<String>>,
        links: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl RemoteTransport for RecordingTransport {
        fn protocol(&self) -> &'static str {
            "test"
        }

        async fn canonicalize(&self, path: &str) -> Result<Option<String>, ExecutorError> {
            Ok(self
                .links
                .iter()
                .find_map(|(link, dest)| path.strip_prefix(link).map(|rest| format!("{}{}", dest, rest))))
        }

        async fn read_file(&self, path: &str, _max: u64) -> Result<String, ExecutorError> {
            self.calls.lock().unwrap().push(format!("read {}", path));
            Ok("data".into())
        }

        async fn write_file(&self, path: &str, _content: &str) -> Result<(), ExecutorError> {
            self.calls.lock().unwrap().push(format!("write {}", path));
            Ok(())
        }

        async fn run(&self, command: &str, _t: Duration) -> Result<CommandOutput, ExecutorError> {
            self.calls.lock().unwrap().push(format!("run {}", command));
            Ok(CommandOutput {
                exit_code: 0,
                stdout: "ok".into(),
                stderr: String::new(),
            })
        }

        async fn list_dir(&self, _path: &str) -> Result<Vec<DirEntry>, ExecutorError> {
            Ok(vec![DirEntry::file("b"), DirEntry::dir("a")])
        }

        async fn disconnect(&self) -> Result<(), ExecutorError> {
            self.calls.lock().unwrap().push("disconnect".into());
            Ok(())
        }
    }

    fn posix_executor() -> RemoteExecutor {
        posix_executor_with(RecordingTransport::default())
    }

    fn posix_executor_with(transport: RecordingTransport) -> RemoteExecutor {
        let policy = PathPolicy::new(
            crate::security::PathStyle::Posix,
            &["/home/ops".to_string()],
            &["*/.ssh/*".to_string()],
        );
        RemoteExecutor::new("web", TargetKind::Ssh, policy, Box::new(transport))
    }

    #[tokio::test]
    async fn test_remote_link_out_of_root_denied() {
        let exec = posix_executor_with(RecordingTransport {
            links: vec![("/home/ops/etc", "/etc"), ("/home/ops/current", "/home/ops/releases/42")],
            ..Default::default()
        });

        let err = exec.read_file("etc/shadow").await.unwrap_err();
        assert!(matches!(err, ExecutorError::PolicyDenied(_)));
        assert!(exec.write_file("/home/ops/etc/cron.d/job", "x").await.is_err());
        assert!(exec.list_files("etc").await.is_err());

        let written = exec.write_file("current/app.env", "PORT=80").await.unwrap();
        assert_eq!(written.path, "/home/ops/releases/42/app.env");
    }

    #[tokio::test]
    async fn test_relative_path_anchored() {
        let exec = posix_executor();
        assert_eq!(exec.read_file("notes.txt").await.unwrap(), "data");
        let written = exec.write_file("logs/../out.txt", "abc").await.unwrap();
        assert_eq!(written.path, "/home/ops/out.txt");
        assert_eq!(written.bytes, 3);
    }

    #[tokio::test]
    async fn test_denials_never_reach_transport() {
        let exec = posix_executor();
        assert!(exec.read_file("/etc/shadow").await.is_err());
        assert!(exec.read_file("/home/ops/.ssh/id_rsa").await.is_err());
        assert!(exec.execute_command("mkfs.ext4 /dev/sda", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_list_sorted_and_close_idempotent() {
        let exec = posix_executor();
        let entries = exec.list_files(".").await.unwrap();
        assert_eq!(entries[0].name, "a");

        exec.close().await.unwrap();
        exec.close().await.unwrap();
        assert!(matches!(exec.list_files(".").await, Err(ExecutorError::Closed(_))));
    }
}
