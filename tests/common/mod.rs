//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use fleet_agent::agent::{AgentLoop, ExecutionConfig};
use fleet_agent::config::{MachineTarget, TargetKind};
use fleet_agent::executor::{
    CommandOutput, ConnectionManager, DirEntry, Executor, ExecutorError, ExecutorFactory,
    FileWrite,
};
use fleet_agent::model::{Decision, DecisionProvider, DecisionRequest, ModelError};
use fleet_agent::security::PathPolicy;
use fleet_agent::tools::ToolRegistry;
use fleet_agent::types::ToolCallRequest;

// ============================================================================
// Decision provider
// ============================================================================

pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Decision, ModelError>>>,
    fallback: Option<Decision>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Decision, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns `decision` forever once the script runs out.
    pub fn repeating(decision: Decision) -> Self {
        Self {
            fallback: Some(decision),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ModelError::InvalidResponse("script exhausted".into())),
        }
    }
}

pub fn answer(text: &str) -> Decision {
    Decision::Answer(text.to_string())
}

pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Decision {
    Decision::from_parts("", calls)
}

pub fn call(id: &str, tool: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, tool, arguments)
}

pub fn transient() -> ModelError {
    ModelError::Api {
        status: 503,
        message: "overloaded".into(),
    }
}

// ============================================================================
// Executors
// ============================================================================

#[derive(Debug, Clone)]
pub struct Event {
    pub target: String,
    pub op: String,
    pub started: Instant,
    pub finished: Instant,
}

impl Event {
    pub fn overlaps(&self, other: &Event) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub struct FakeExecutor {
    name: String,
    kind: TargetKind,
    policy: PathPolicy,
    command_delay: Duration,
    fail_close: bool,
    events: EventLog,
    closed: AtomicBool,
}

impl FakeExecutor {
    fn record(&self, op: String, started: Instant) {
        self.events.lock().unwrap().push(Event {
            target: self.name.clone(),
            op,
            started,
            finished: Instant::now(),
        });
    }
}

#[async_trait]
impl Executor for FakeExecutor {
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
        self.record(format!("read {}", path), Instant::now());
        Ok(format!("contents of {}", path))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<FileWrite, ExecutorError> {
        self.record(format!("write {}", path), Instant::now());
        Ok(FileWrite {
            path: path.to_string(),
            bytes: content.len(),
        })
    }

    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        let started = Instant::now();
        if self.command_delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(ExecutorError::Timeout(timeout));
        }
        tokio::time::sleep(self.command_delay).await;
        self.record(format!("exec {}", command), started);
        Ok(CommandOutput {
            exit_code: 0,
            stdout: format!("ran: {}", command),
            stderr: String::new(),
        })
    }

    async fn list_files(&self, path: &str) -> Result<Vec<DirEntry>, ExecutorError> {
        self.record(format!("list {}", path), Instant::now());
        Ok(vec![DirEntry::dir("logs"), DirEntry::file("app.conf")])
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            Err(ExecutorError::Protocol("close failed".into()))
        } else {
            Ok(())
        }
    }
}

/// Counts connections and hands out [`FakeExecutor`]s.
pub struct CountingFactory {
    created: AtomicUsize,
    pub events: EventLog,
    connect_delay: Duration,
    command_delay: Duration,
    auth_failures: HashSet<String>,
    failing_close: HashSet<String>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            events: Arc::new(Mutex::new(Vec::new())),
            connect_delay: Duration::from_millis(20),
            command_delay: Duration::ZERO,
            auth_failures: HashSet::new(),
            failing_close: HashSet::new(),
        }
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn with_auth_failure(mut self, target: &str) -> Self {
        self.auth_failures.insert(target.to_string());
        self
    }

    pub fn with_failing_close(mut self, target: &str) -> Self {
        self.failing_close.insert(target.to_string());
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, target: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.target == target)
            .collect()
    }
}

#[async_trait]
impl ExecutorFactory for CountingFactory {
    async fn create(&self, target: &MachineTarget) -> Result<Arc<dyn Executor>, ExecutorError> {
        tokio::time::sleep(self.connect_delay).await;
        if self.auth_failures.contains(&target.name) {
            return Err(ExecutorError::authentication_failed(
                &target.name,
                "bad credentials",
            ));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeExecutor {
            name: target.name.clone(),
            kind: target.kind,
            policy: target.path_policy(),
            command_delay: self.command_delay,
            fail_close: self.failing_close.contains(&target.name),
            events: self.events.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// `local` (default), `web` over SSH and `dc` over WinRM.
pub fn fleet() -> Vec<MachineTarget> {
    vec![
        MachineTarget::local("local")
            .with_allowed_roots(["/home/ops"])
            .as_default(),
        MachineTarget::ssh("web", "10.0.0.5", "ops").with_allowed_roots(["/srv", "/var/log"]),
        MachineTarget::winrm("dc", "10.0.0.9", "admin"),
    ]
}

pub fn manager(factory: &Arc<CountingFactory>) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::with_factory(fleet(), factory.clone()).unwrap())
}

pub fn registry(factory: &Arc<CountingFactory>) -> ToolRegistry {
    ToolRegistry::with_builtin_tools(manager(factory))
}

pub fn agent(
    provider: &Arc<ScriptedProvider>,
    factory: &Arc<CountingFactory>,
    config: ExecutionConfig,
) -> AgentLoop {
    let registry =
        ToolRegistry::with_builtin_tools(manager(factory)).with_command_timeout(config.tool_timeout);
    AgentLoop::new(provider.clone(), Arc::new(registry), config)
}

/// Loop settings without waiting between retries.
pub fn fast_config() -> ExecutionConfig {
    ExecutionConfig::default()
        .with_immediate_retry()
        .with_cancel_grace(Duration::from_millis(100))
}
