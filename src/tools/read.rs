//! read_file tool.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{SchemaTool, ToolContext};
use crate::security::ToolPathSchema;
use crate::types::ToolError;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileInput {
    /// Path of the file to read; relative paths resolve against the target's first allowed root.
    pub path: String,
}

pub struct ReadFileTool;

#[async_trait]
impl SchemaTool for ReadFileTool {
    type Input = ReadFileInput;

    const NAME: &'static str = "read_file";
    const DESCRIPTION: &'static str =
        "Read a text file on a machine. Files larger than 2 MiB are rejected.";
    const PATHS: ToolPathSchema = ToolPathSchema::paths(&["path"]);

    async fn handle(&self, input: ReadFileInput, context: &ToolContext) -> Result<Value, ToolError> {
        let content = context.executor().read_file(&input.path).await?;
        Ok(Value::String(content))
    }
}
