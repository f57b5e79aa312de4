//! Loop state and run metrics.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    AwaitingDecision,
    ExecutingTools,
    Done,
    Error,
    Cancelled,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::AwaitingDecision | Self::ExecutingTools)
    }

    /// `Error` and `Cancelled` are reachable from anywhere; a terminal state
    /// only leads to a fresh run.
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (_, Error | Cancelled) => true,
            (Idle | Done | Error | Cancelled, AwaitingDecision) => true,
            (AwaitingDecision, ExecutingTools | Done) => true,
            (ExecutingTools, AwaitingDecision) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub calls: usize,
    pub errors: usize,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub iterations: usize,
    pub decision_calls: usize,
    pub decision_retries: usize,
    pub tool_calls: usize,
    pub errors: usize,
    pub truncations: usize,
    pub execution_time_ms: u64,
    pub tool_stats: HashMap<String, ToolStats>,
}

impl AgentMetrics {
    pub fn record_tool(&mut self, name: &str, duration_ms: u64, is_error: bool) {
        self.tool_calls += 1;
        let stats = self.tool_stats.entry(name.to_string()).or_default();
        stats.calls += 1;
        stats.total_time_ms += duration_ms;
        if is_error {
            stats.errors += 1;
            self.errors += 1;
        }
    }

    pub fn record_decision_call(&mut self) {
        self.decision_calls += 1;
    }

    pub fn record_retry(&mut self) {
        self.decision_retries += 1;
    }

    pub fn record_truncation(&mut self, removed: usize) {
        if removed > 0 {
            self.truncations += 1;
        }
    }

    pub fn avg_tool_time_ms(&self) -> f64 {
        if self.tool_calls == 0 {
            return 0.0;
        }
        let total: u64 = self.tool_stats.values().map(|s| s.total_time_ms).sum();
        total as f64 / self.tool_calls as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_state() {
        assert!(AgentState::Done.is_terminal());
        assert!(AgentState::Cancelled.is_terminal());
        assert!(!AgentState::ExecutingTools.is_terminal());
        assert!(AgentState::AwaitingDecision.is_busy());

        assert!(AgentState::Idle.can_transition_to(AgentState::AwaitingDecision));
        assert!(AgentState::ExecutingTools.can_transition_to(AgentState::AwaitingDecision));
        assert!(AgentState::ExecutingTools.can_transition_to(AgentState::Error));
        assert!(!AgentState::Idle.can_transition_to(AgentState::ExecutingTools));
        assert!(!AgentState::ExecutingTools.can_transition_to(AgentState::Done));
    }

    #[test]
    fn test_tool_recording() {
        let mut metrics = AgentMetrics::default();
        metrics.record_tool("read_file", 50, false);
        metrics.record_tool("read_file", 30, false);
        metrics.record_tool("exec_shell", 100, true);

        assert_eq!(metrics.tool_calls, 3);
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.tool_stats["read_file"].calls, 2);
        assert_eq!(metrics.tool_stats["read_file"].total_time_ms, 80);
        assert_eq!(metrics.tool_stats["exec_shell"].errors, 1);
        assert!((metrics.avg_tool_time_ms() - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_truncation_counter() {
        let mut metrics = AgentMetrics::default();
        metrics.record_truncation(0);
        metrics.record_truncation(3);
        assert_eq!(metrics.truncations, 1);
    }
}
