//! The agent loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use super::{AgentMetrics, AgentState, ExecutionConfig};
use crate::memory::ConversationMemory;
use crate::model::{Decision, DecisionProvider, DecisionRequest, ModelError};
use crate::observability::decision_span;
use crate::tools::{ToolRegistry, dispatch_batch};
use crate::types::{Message, ToolCallRequest, ToolError, ToolExecutionResult};
use crate::{Error, LoopLimit, Result};

#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub text: String,
    pub state: AgentState,
    pub metrics: AgentMetrics,
    pub messages: Vec<Message>,
}

impl AgentResult {
    pub fn iterations(&self) -> usize {
        self.metrics.iterations
    }

    pub fn tool_calls(&self) -> usize {
        self.metrics.tool_calls
    }
}

/// Why a run stopped before finishing.
#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

impl Interrupt {
    fn into_error(self) -> Error {
        match self {
            Self::Cancelled => Error::Cancelled,
            Self::TimedOut(limit) => Error::Timeout(limit),
        }
    }
}

/// Resolves when the caller cancels or the run deadline passes.
struct Interrupter {
    token: CancellationToken,
    deadline: Option<(tokio::time::Instant, Duration)>,
}

impl Interrupter {
    fn new(token: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            token,
            deadline: timeout.map(|t| (tokio::time::Instant::now() + t, t)),
        }
    }

    async fn wait(&self) -> Interrupt {
        match self.deadline {
            Some((at, limit)) => tokio::select! {
                _ = self.token.cancelled() => Interrupt::Cancelled,
                _ = tokio::time::sleep_until(at) => Interrupt::TimedOut(limit),
            },
            None => {
                self.token.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }
}

/// Alternates decision calls and tool dispatch until the provider answers.
///
/// One run at a time: concurrent callers queue on an internal lock. History
/// persists across runs until [`AgentLoop::reset`].
pub struct AgentLoop {
    provider: Arc<dyn DecisionProvider>,
    registry: Arc<ToolRegistry>,
    memory: Arc<RwLock<ConversationMemory>>,
    config: ExecutionConfig,
    state: RwLock<AgentState>,
    run_lock: Mutex<()>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn DecisionProvider>,
        registry: Arc<ToolRegistry>,
        config: ExecutionConfig,
    ) -> Self {
        let mut memory = ConversationMemory::new(config.max_context_tokens);
        if let Some(prompt) = &config.system_prompt {
            memory.set_system_prompt(prompt.clone());
        }
        Self {
            provider,
            registry,
            memory: Arc::new(RwLock::new(memory)),
            config,
            state: RwLock::new(AgentState::Idle),
            run_lock: Mutex::new(()),
        }
    }

    pub fn builder() -> super::AgentBuilder {
        super::AgentBuilder::new()
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<RwLock<ConversationMemory>> {
        &self.memory
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    pub async fn history(&self) -> Vec<Message> {
        self.memory.read().await.history()
    }

    /// Clears history, keeping the system prompt.
    pub async fn reset(&self) {
        let _guard = self.run_lock.lock().await;
        self.memory.write().await.clear();
        *self.state.write().await = AgentState::Idle;
    }

    /// Releases every live executor. Returns how many were released.
    pub async fn shutdown(&self) -> usize {
        let _guard = self.run_lock.lock().await;
        let resolver = self.registry.resolver();
        let mut released = 0;
        for target in resolver.active_targets() {
            match resolver.release(&target).await {
                Ok(()) => released += 1,
                Err(e) => warn!(target_name = %target, error = %e, "Failed to release executor"),
            }
        }
        released
    }

    pub async fn run(&self, input: &str) -> Result<AgentResult> {
        self.run_with_cancellation(input, CancellationToken::new())
            .await
    }

    #[instrument(name = "agent.run", skip_all, fields(input_chars = input.chars().count()))]
    pub async fn run_with_cancellation(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<AgentResult> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let resolver = self.registry.resolver();
        let active_before: HashSet<String> = resolver.active_targets().into_iter().collect();
        let interrupter = Interrupter::new(cancel, self.config.timeout);
        let mut metrics = AgentMetrics::default();

        let outcome = self.drive(input, &interrupter, &mut metrics).await;
        metrics.execution_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(text) => {
                info!(
                    iterations = metrics.iterations,
                    tool_calls = metrics.tool_calls,
                    elapsed_ms = metrics.execution_time_ms,
                    "Agent run completed"
                );
                Ok(AgentResult {
                    text,
                    state: AgentState::Done,
                    metrics,
                    messages: self.history().await,
                })
            }
            Err(e) if e.is_fatal() => {
                self.set_state(AgentState::Error).await;
                error!(
                    category = ?e.category(),
                    iterations = metrics.iterations,
                    error = %e,
                    "Agent run failed"
                );
                Err(e)
            }
            Err(e) => {
                self.set_state(AgentState::Cancelled).await;
                warn!(error = %e, "Agent run interrupted");
                self.release_new_executors(&active_before).await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        input: &str,
        interrupter: &Interrupter,
        metrics: &mut AgentMetrics,
    ) -> Result<String> {
        if self.registry.resolver().target_names().is_empty() {
            return Err(Error::Config("no machine targets configured".into()));
        }

        self.set_state(AgentState::AwaitingDecision).await;
        let removed = self.memory.write().await.add_user(input);
        metrics.record_truncation(removed);
        let tools = self.registry.definitions();
        let mut seen_call_ids = HashSet::new();

        for iteration in 1..=self.config.max_iterations {
            metrics.iterations = iteration;
            let history = self.prepare_history(metrics).await?;
            self.set_state(AgentState::AwaitingDecision).await;

            let request = DecisionRequest::new(history, tools.clone());
            match self.decide(&request, interrupter, metrics).await? {
                Decision::Answer(text) => {
                    let removed = self.memory.write().await.add_assistant(text.clone());
                    metrics.record_truncation(removed);
                    self.set_state(AgentState::Done).await;
                    return Ok(text);
                }
                Decision::ToolCalls { content, mut calls } => {
                    debug!(iteration, calls = calls.len(), "Decision requested tool calls");
                    assign_unique_ids(&mut calls, &mut seen_call_ids);
                    let removed = self
                        .memory
                        .write()
                        .await
                        .add_assistant_tool_calls(content, calls.clone());
                    metrics.record_truncation(removed);

                    self.set_state(AgentState::ExecutingTools).await;
                    let (results, interrupted) = self.execute_tools(&calls, interrupter).await;
                    self.record_results(&results, metrics).await;

                    if let Some(reason) = interrupted {
                        return Err(reason.into_error());
                    }
                    if let Some(fatal) = results
                        .iter()
                        .filter_map(|r| r.error())
                        .find(|e| e.is_fatal())
                    {
                        return Err(fatal_tool_error(fatal));
                    }
                }
            }
        }

        Err(Error::LoopExceeded(LoopLimit::Iterations(
            self.config.max_iterations,
        )))
    }

    /// Truncates when over budget and snapshots the history.
    async fn prepare_history(&self, metrics: &mut AgentMetrics) -> Result<Vec<Message>> {
        let mut memory = self.memory.write().await;
        if !memory.is_within_limit() {
            let removed = memory.truncate_oldest(self.config.truncate_keep_last);
            metrics.record_truncation(removed);
            if !memory.is_within_limit() {
                return Err(Error::LoopExceeded(LoopLimit::TokenBudget {
                    current: memory.token_count(),
                    max: memory.max_tokens(),
                }));
            }
        }
        Ok(memory.history())
    }

    async fn decide(
        &self,
        request: &DecisionRequest,
        interrupter: &Interrupter,
        metrics: &mut AgentMetrics,
    ) -> Result<Decision> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            metrics.record_decision_call();

            let call = tokio::time::timeout(self.config.decision_timeout, self.provider.decide(request))
                .instrument(decision_span(self.provider.name(), attempt));
            let outcome = tokio::select! {
                biased;
                reason = interrupter.wait() => return Err(reason.into_error()),
                result = call => result
                    .unwrap_or_else(|_| Err(ModelError::Timeout(self.config.decision_timeout))),
            };

            let err = match outcome {
                Ok(decision) => return Ok(decision),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err.into());
            }
            if attempt >= retry.max_attempts() {
                return Err(Error::ModelUnavailable {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            metrics.record_retry();
            let delay = retry.delay_for(attempt, &err);
            warn!(
                provider = self.provider.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Decision call failed, retrying"
            );
            tokio::select! {
                biased;
                reason = interrupter.wait() => return Err(reason.into_error()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// On interruption, in-flight calls get the grace period; whatever has
    /// not finished by then is dropped and reported as cancelled so every
    /// call still gets a result.
    async fn execute_tools(
        &self,
        calls: &[ToolCallRequest],
        interrupter: &Interrupter,
    ) -> (Vec<ToolExecutionResult>, Option<Interrupt>) {
        let batch = dispatch_batch(&self.registry, calls);
        tokio::pin!(batch);

        let reason = tokio::select! {
            results = &mut batch => return (results, None),
            reason = interrupter.wait() => reason,
        };

        warn!(
            grace_ms = self.config.cancel_grace.as_millis() as u64,
            "Interrupted during tool execution, waiting for in-flight calls"
        );
        match tokio::time::timeout(self.config.cancel_grace, &mut batch).await {
            Ok(results) => (results, Some(reason)),
            Err(_) => {
                warn!(calls = calls.len(), "Abandoned in-flight tool calls after grace period");
                let results = calls
                    .iter()
                    .map(|call| {
                        ToolExecutionResult::new(
                            call.id.clone(),
                            call.tool_name.clone(),
                            ToolError::execution_failed("cancelled before completion").into(),
                        )
                    })
                    .collect();
                (results, Some(reason))
            }
        }
    }

    async fn record_results(&self, results: &[ToolExecutionResult], metrics: &mut AgentMetrics) {
        let mut memory = self.memory.write().await;
        for result in results {
            metrics.record_tool(
                &result.tool_name,
                result.elapsed.as_millis() as u64,
                !result.is_ok(),
            );
            let removed = memory.add_tool_result(result.call_id.clone(), &result.to_content());
            metrics.record_truncation(removed);
        }
    }

    async fn release_new_executors(&self, before: &HashSet<String>) {
        let resolver = self.registry.resolver();
        for target in resolver.active_targets() {
            if before.contains(&target) {
                continue;
            }
            match resolver.release(&target).await {
                Ok(()) => debug!(target_name = %target, "Released executor acquired by interrupted run"),
                Err(e) => warn!(target_name = %target, error = %e, "Failed to release executor"),
            }
        }
    }

    async fn set_state(&self, next: AgentState) {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) && *state != next {
            debug!(from = ?*state, to = ?next, "Unexpected state transition");
        }
        *state = next;
    }
}

/// Replaces empty or already-used call ids so every result answers exactly
/// one call in the run.
fn assign_unique_ids(calls: &mut [ToolCallRequest], seen: &mut HashSet<String>) {
    for call in calls.iter_mut() {
        if call.id.is_empty() || seen.contains(&call.id) {
            let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
            debug!(original = %call.id, replacement = %fresh, tool = %call.tool_name, "Reassigned tool call id");
            call.id = fresh;
        }
        seen.insert(call.id.clone());
    }
}

fn fatal_tool_error(err: &ToolError) -> Error {
    match err {
        ToolError::AuthenticationFailed { target, message } => Error::AuthenticationFailed {
            target: target.clone(),
            message: message.clone(),
        },
        ToolError::NoDefaultTarget => {
            Error::UnknownTarget("no target given and no default machine configured".into())
        }
        other => Error::Config(other.to_string()),
    }
}
