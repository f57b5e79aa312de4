//! Assembles an [`AgentLoop`] from configuration and collaborators.

use std::sync::Arc;

use super::{AgentLoop, ExecutionConfig};
use crate::config::FleetConfig;
use crate::executor::ConnectionManager;
use crate::model::{DecisionProvider, OpenAiClient};
use crate::tools::{ExecutorResolver, Tool, ToolRegistry};
use crate::Result;

/// Anything not supplied explicitly is derived from the [`FleetConfig`]:
/// a [`ConnectionManager`] over its machines and an [`OpenAiClient`] from its
/// model settings.
#[derive(Default)]
pub struct AgentBuilder {
    config: FleetConfig,
    execution: Option<ExecutionConfig>,
    provider: Option<Arc<dyn DecisionProvider>>,
    resolver: Option<Arc<dyn ExecutorResolver>>,
    tools: Vec<Arc<dyn Tool>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: FleetConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn DecisionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Overrides the connection manager built from configuration.
    pub fn resolver(mut self, resolver: Arc<dyn ExecutorResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn build(self) -> Result<AgentLoop> {
        self.config.validate()?;

        let execution = self
            .execution
            .unwrap_or_else(|| ExecutionConfig::from_settings(&self.config.agent, &self.config.model));

        let resolver: Arc<dyn ExecutorResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(ConnectionManager::from_config(&self.config)?),
        };

        let provider: Arc<dyn DecisionProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(OpenAiClient::from_settings(&self.config.model)?),
        };

        let mut registry =
            ToolRegistry::with_builtin_tools(resolver).with_command_timeout(execution.tool_timeout);
        for tool in self.tools {
            registry.register(tool)?;
        }

        tracing::debug!(
            tools = registry.len(),
            targets = registry.resolver().target_names().len(),
            max_iterations = execution.max_iterations,
            "Agent assembled"
        );

        Ok(AgentLoop::new(provider, Arc::new(registry), execution))
    }
}
