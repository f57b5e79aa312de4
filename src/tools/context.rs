//! Per-call execution context handed to tools.

use std::sync::Arc;
use std::time::Duration;

use crate::executor::Executor;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ToolContext {
    executor: Arc<dyn Executor>,
    command_timeout: Duration,
}

impl ToolContext {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    /// Name of the target this call runs against.
    pub fn target(&self) -> &str {
        self.executor.name()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("target", &self.target())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}
