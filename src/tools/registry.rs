//! Tool registry: lookup, validation, policy gate and dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::Instrument;

use super::context::{DEFAULT_COMMAND_TIMEOUT, ToolContext};
use super::resolver::ExecutorResolver;
use super::traits::Tool;
use super::validate::InputValidator;
use super::{ExecShellTool, ListFilesTool, ReadFileTool, WriteFileTool};
use crate::observability::tool_dispatch_span;
use crate::security::SecurityGuard;
use crate::types::{ToolCallRequest, ToolDefinition, ToolError, ToolExecutionResult, ToolOutput};
use crate::{Error, Result};

/// Slack between the command timeout and the outer per-call timeout, so the
/// executor reports its own timeout first.
const TOOL_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub tool_count: usize,
    pub tool_names: Vec<String>,
    pub target_count: usize,
    pub active_targets: Vec<String>,
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: InputValidator,
}

/// Named tools plus the resolver that turns target names into executors.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    resolver: Arc<dyn ExecutorResolver>,
    command_timeout: Duration,
    tool_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(resolver: Arc<dyn ExecutorResolver>) -> Self {
        Self {
            tools: HashMap::new(),
            resolver,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            tool_timeout: DEFAULT_COMMAND_TIMEOUT + TOOL_TIMEOUT_MARGIN,
        }
    }

    /// Registry holding `read_file`, `write_file`, `exec_shell` and `list_files`.
    pub fn with_builtin_tools(resolver: Arc<dyn ExecutorResolver>) -> Self {
        let mut registry = Self::new(resolver);
        let builtins: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ReadFileTool),
            Arc::new(WriteFileTool),
            Arc::new(ExecShellTool),
            Arc::new(ListFilesTool),
        ];
        for tool in builtins {
            if let Err(e) = registry.register(tool) {
                tracing::error!(error = %e, "Builtin tool rejected");
            }
        }
        registry
    }

    /// Sets the command timeout; the outer per-call limit follows it.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self.tool_timeout = timeout + TOOL_TIMEOUT_MARGIN;
        self
    }

    pub fn resolver(&self) -> &Arc<dyn ExecutorResolver> {
        &self.resolver
    }

    /// Compiles the tool's input schema and adds it. Fails with
    /// [`Error::DuplicateTool`] if the name is taken or
    /// [`Error::InvalidToolSchema`] if the schema does not compile; either
    /// way the registry is left untouched.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        let validator = InputValidator::compile(&tool.input_schema()).map_err(|message| {
            Error::InvalidToolSchema {
                tool: name.clone(),
                message,
            }
        })?;
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register(Arc::new(tool))
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name).map(|entry| entry.tool)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| &entry.tool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions sorted by name, each offering an optional `target`
    /// constrained to the configured machines.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let targets = self.resolver.target_names();
        let default = self.resolver.default_target();

        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|entry| {
                let mut definition = entry.tool.definition();
                if !targets.is_empty() {
                    inject_target(&mut definition.parameters, &targets, default.as_deref());
                }
                definition
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            tool_count: self.tools.len(),
            tool_names: self.names().into_iter().map(String::from).collect(),
            target_count: self.resolver.target_names().len(),
            active_targets: self.resolver.active_targets(),
        }
    }

    /// The target a call would run against, without connecting.
    pub fn target_for(&self, request: &ToolCallRequest) -> Option<String> {
        request
            .target()
            .map(String::from)
            .or_else(|| self.resolver.default_target())
    }

    /// Runs one call to completion. Never fails: every fault becomes an
    /// error result.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolExecutionResult {
        let target = self.target_for(request);
        let span = tool_dispatch_span(request, target.as_deref());
        async move {
            let started = Instant::now();
            let output: ToolOutput = self.run(request, target.as_deref()).await.into();
            let elapsed = started.elapsed();

            match &output {
                ToolOutput::Success(_) => tracing::debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Tool call succeeded"
                ),
                ToolOutput::Error(e) => tracing::warn!(
                    kind = e.kind(),
                    error = %e,
                    "Tool call failed"
                ),
            }

            ToolExecutionResult::new(request.id.clone(), request.tool_name.clone(), output)
                .with_target(target)
                .with_elapsed(elapsed)
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &ToolCallRequest,
        target: Option<&str>,
    ) -> std::result::Result<Value, ToolError> {
        let RegisteredTool { tool, validator } = self
            .tools
            .get(&request.tool_name)
            .ok_or_else(|| ToolError::unknown_tool(&request.tool_name))?;

        let args = &request.arguments;
        validator.validate(args)?;
        if args.get("target").is_some_and(|t| !t.is_string() && !t.is_null()) {
            return Err(ToolError::invalid_arguments("field 'target' must be string"));
        }

        let paths = tool.path_schema();
        SecurityGuard::validate_command(&paths, args)?;

        let target = target.ok_or(ToolError::NoDefaultTarget)?;
        let policy = self
            .resolver
            .policy(target)
            .ok_or_else(|| ToolError::UnknownTarget {
                name: target.to_string(),
            })?;
        SecurityGuard::validate_paths(&policy, &paths, args)?;

        let executor = self.resolver.resolve(target).await?;
        let context = ToolContext::new(executor).with_command_timeout(self.command_timeout);

        let execution = AssertUnwindSafe(tool.execute(args.clone(), &context)).catch_unwind();
        match tokio::time::timeout(self.tool_timeout, execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ToolError::execution_failed(format!(
                "tool panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(ToolError::timeout(self.tool_timeout.as_millis() as u64)),
        }
    }
}

fn inject_target(parameters: &mut Value, targets: &[String], default: Option<&str>) {
    let Some(obj) = parameters.as_object_mut() else {
        return;
    };
    let description = match default {
        Some(d) => format!("Machine to run on. Defaults to '{}'.", d),
        None => "Machine to run on.".to_string(),
    };
    let properties = obj
        .entry("properties")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(props) = properties.as_object_mut() {
        props.insert(
            "target".into(),
            json!({
                "type": "string",
                "description": description,
                "enum": targets,
            }),
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
