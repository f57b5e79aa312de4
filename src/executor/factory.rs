//! Builds live executors from target configuration.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Executor, ExecutorError, LocalExecutor};
use crate::config::{MachineTarget, TargetKind};

/// Opens a connection for one target. Swapped out in tests.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn create(&self, target: &MachineTarget) -> Result<Arc<dyn Executor>, ExecutorError>;
}

/// Dispatches on [`TargetKind`] to the backends compiled into this build.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendFactory;

#[async_trait]
impl ExecutorFactory for BackendFactory {
    async fn create(&self, target: &MachineTarget) -> Result<Arc<dyn Executor>, ExecutorError> {
        match target.kind {
            TargetKind::Local => Ok(Arc::new(LocalExecutor::from_target(target))),
            TargetKind::Ssh => connect_ssh(target).await,
            TargetKind::Winrm => connect_winrm(target).await,
        }
    }
}

#[cfg(feature = "ssh")]
async fn connect_ssh(target: &MachineTarget) -> Result<Arc<dyn Executor>, ExecutorError> {
    let transport = super::SshTransport::connect(target).await?;
    Ok(Arc::new(super::RemoteExecutor::new(
        target.name.clone(),
        TargetKind::Ssh,
        target.path_policy(),
        Box::new(transport),
    )))
}

#[cfg(not(feature = "ssh"))]
async fn connect_ssh(_target: &MachineTarget) -> Result<Arc<dyn Executor>, ExecutorError> {
    Err(ExecutorError::BackendUnavailable(TargetKind::Ssh))
}

#[cfg(feature = "winrm")]
async fn connect_winrm(target: &MachineTarget) -> Result<Arc<dyn Executor>, ExecutorError> {
    let transport = super::WinRmTransport::connect(target).await?;
    Ok(Arc::new(super::RemoteExecutor::new(
        target.name.clone(),
        TargetKind::Winrm,
        target.path_policy(),
        Box::new(transport),
    )))
}

#[cfg(not(feature = "winrm"))]
async fn connect_winrm(_target: &MachineTarget) -> Result<Arc<dyn Executor>, ExecutorError> {
    Err(ExecutorError::BackendUnavailable(TargetKind::Winrm))
}
