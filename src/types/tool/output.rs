//! Tool execution results.

use std::time::Duration;

use serde_json::{Value, json};

use super::error::ToolError;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Success(Value),
    Error(ToolError),
}

impl ToolOutput {
    pub fn success(value: impl Into<Value>) -> Self {
        Self::Success(value.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn as_error(&self) -> Option<&ToolError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Result<Value, ToolError>> for ToolOutput {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Error(e),
        }
    }
}

impl From<ToolError> for ToolOutput {
    fn from(error: ToolError) -> Self {
        Self::Error(error)
    }
}

/// Outcome of one dispatched tool call.
#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub call_id: String,
    pub tool_name: String,
    pub output: ToolOutput,
    pub elapsed: Duration,
    pub target: Option<String>,
}

impl ToolExecutionResult {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: ToolOutput,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output,
            elapsed: Duration::ZERO,
            target: None,
        }
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.output.is_ok()
    }

    pub fn error(&self) -> Option<&ToolError> {
        self.output.as_error()
    }

    /// JSON payload recorded as the tool-result message content.
    pub fn to_content(&self) -> String {
        let mut body = match &self.output {
            ToolOutput::Success(value) => json!({ "ok": true, "result": value }),
            ToolOutput::Error(e) => json!({ "ok": false, "error": e.to_string(), "kind": e.kind() }),
        };
        if let (Some(target), Some(obj)) = (&self.target, body.as_object_mut()) {
            obj.insert("target".into(), Value::String(target.clone()));
        }
        body.to_string()
    }
}
