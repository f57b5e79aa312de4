//! exec_shell tool.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{SchemaTool, ToolContext};
use crate::security::ToolPathSchema;
use crate::types::{ToolError, truncate_chars};

const MAX_STDOUT_CHARS: usize = 5000;
const MAX_STDERR_CHARS: usize = 2000;
const MAX_COMMAND_ECHO_CHARS: usize = 200;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecShellInput {
    /// Shell command line. Runs under sh on Unix and cmd on Windows.
    pub command: String,
    /// Timeout in seconds, capped at the configured shell timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub struct ExecShellTool;

#[async_trait]
impl SchemaTool for ExecShellTool {
    type Input = ExecShellInput;

    const NAME: &'static str = "exec_shell";
    const DESCRIPTION: &'static str = "Run a shell command on a machine and return its exit code, \
        stdout and stderr. Destructive commands are refused.";
    const PATHS: ToolPathSchema = ToolPathSchema::command("command");

    async fn handle(&self, input: ExecShellInput, context: &ToolContext) -> Result<Value, ToolError> {
        let limit = context.command_timeout();
        let timeout = input
            .timeout_secs
            .map(Duration::from_secs)
            .map_or(limit, |t| t.min(limit));

        let output = context
            .executor()
            .execute_command(&input.command, timeout)
            .await?;

        Ok(json!({
            "command": truncate_chars(&input.command, MAX_COMMAND_ECHO_CHARS),
            "exit_code": output.exit_code,
            "stdout": truncate_chars(&output.stdout, MAX_STDOUT_CHARS),
            "stderr": truncate_chars(&output.stderr, MAX_STDERR_CHARS),
        }))
    }
}
