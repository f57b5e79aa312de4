//! write_file tool.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{SchemaTool, ToolContext};
use crate::security::ToolPathSchema;
use crate::types::ToolError;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileInput {
    /// Destination path. Missing parent directories are created.
    pub path: String,
    /// Full file content; an existing file is overwritten.
    pub content: String,
}

pub struct WriteFileTool;

#[async_trait]
impl SchemaTool for WriteFileTool {
    type Input = WriteFileInput;

    const NAME: &'static str = "write_file";
    const DESCRIPTION: &'static str =
        "Write text to a file on a machine, creating parent directories and overwriting any existing file.";
    const PATHS: ToolPathSchema = ToolPathSchema::paths(&["path"]);

    async fn handle(&self, input: WriteFileInput, context: &ToolContext) -> Result<Value, ToolError> {
        let written = context
            .executor()
            .write_file(&input.path, &input.content)
            .await?;
        Ok(json!({ "path": written.path, "bytes": written.bytes }))
    }
}
