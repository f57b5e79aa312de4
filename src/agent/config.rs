//! Loop execution settings.

use std::time::Duration;

use super::retry::{ExponentialBackoff, RetryPolicy};
use crate::config::{AgentSettings, ModelSettings};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Decision rounds before the run fails.
    pub max_iterations: usize,
    pub max_context_tokens: usize,
    /// Messages kept when history is truncated.
    pub truncate_keep_last: usize,
    /// Command timeout handed to the tool registry.
    pub tool_timeout: Duration,
    pub decision_timeout: Duration,
    /// Whole-run limit.
    pub timeout: Option<Duration>,
    /// How long in-flight tool calls may finish after cancellation.
    pub cancel_grace: Duration,
    pub retry: RetryPolicy,
    pub system_prompt: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_context_tokens: 8000,
            truncate_keep_last: 5,
            tool_timeout: Duration::from_secs(60),
            decision_timeout: Duration::from_secs(120),
            timeout: None,
            cancel_grace: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            system_prompt: None,
        }
    }
}

impl ExecutionConfig {
    pub fn from_settings(agent: &AgentSettings, model: &ModelSettings) -> Self {
        Self {
            max_iterations: agent.max_iterations,
            max_context_tokens: agent.max_context_tokens,
            truncate_keep_last: agent.truncate_keep_last,
            tool_timeout: Duration::from_secs(agent.shell_timeout_secs),
            decision_timeout: Duration::from_secs(model.timeout_secs),
            timeout: agent.run_timeout_secs.map(Duration::from_secs),
            retry: RetryPolicy::new(model.max_retries),
            system_prompt: agent.system_prompt.clone(),
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_truncate_keep_last(mut self, count: usize) -> Self {
        self.truncate_keep_last = count;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Same retry count, no waiting between attempts.
    pub fn with_immediate_retry(mut self) -> Self {
        self.retry.backoff = ExponentialBackoff::immediate();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.max_context_tokens, 8000);
        assert_eq!(config.truncate_keep_last, 5);
        assert_eq!(config.tool_timeout, Duration::from_secs(60));
        assert_eq!(config.cancel_grace, Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_from_settings() {
        let agent = AgentSettings {
            max_iterations: 3,
            shell_timeout_secs: 15,
            run_timeout_secs: Some(300),
            ..Default::default()
        };
        let model = ModelSettings {
            max_retries: 1,
            ..Default::default()
        };
        let config = ExecutionConfig::from_settings(&agent, &model);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.tool_timeout, Duration::from_secs(15));
        assert_eq!(config.timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.decision_timeout, Duration::from_secs(120));
    }
}
