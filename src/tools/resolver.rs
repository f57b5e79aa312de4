//! Target lookup seam between tool dispatch and connection management.

use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::{Executor, ExecutorError};
use crate::security::PathPolicy;

/// Resolves target names to executors.
///
/// `policy` answers from configuration alone, so paths are vetted before any
/// connection is opened.
#[async_trait]
pub trait ExecutorResolver: Send + Sync {
    /// Configured target names, in configuration order.
    fn target_names(&self) -> Vec<String>;

    fn default_target(&self) -> Option<String>;

    fn policy(&self, target: &str) -> Option<Arc<PathPolicy>>;

    async fn resolve(&self, target: &str) -> Result<Arc<dyn Executor>, ExecutorError>;

    /// Targets that currently hold a live executor.
    fn active_targets(&self) -> Vec<String>;

    /// Closes and evicts the executor for `target`, if any.
    async fn release(&self, target: &str) -> Result<(), ExecutorError>;

    fn contains(&self, target: &str) -> bool {
        self.target_names().iter().any(|n| n == target)
    }
}
