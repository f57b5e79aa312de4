//! list_files tool.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{SchemaTool, ToolContext};
use crate::security::ToolPathSchema;
use crate::types::ToolError;

fn current_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesInput {
    /// Directory to list. Defaults to the target's first allowed root.
    #[serde(default = "current_dir")]
    pub path: String,
}

pub struct ListFilesTool;

#[async_trait]
impl SchemaTool for ListFilesTool {
    type Input = ListFilesInput;

    const NAME: &'static str = "list_files";
    const DESCRIPTION: &'static str =
        "List a directory on a machine. Each entry is rendered as 'dir: name' or 'file: name'.";
    const PATHS: ToolPathSchema = ToolPathSchema::paths(&["path"]);

    async fn handle(&self, input: ListFilesInput, context: &ToolContext) -> Result<Value, ToolError> {
        let entries = context.executor().list_files(&input.path).await?;
        Ok(Value::Array(
            entries
                .iter()
                .map(|e| Value::String(e.to_string()))
                .collect(),
        ))
    }
}
