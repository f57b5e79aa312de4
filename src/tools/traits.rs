//! Tool trait definitions.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::context::ToolContext;
use crate::security::ToolPathSchema;
use crate::types::{ToolDefinition, ToolError};

/// A capability the decision provider may invoke against a target.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    /// Argument fields carrying paths or a command, vetted before execution.
    fn path_schema(&self) -> ToolPathSchema {
        ToolPathSchema::NONE
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.input_schema())
    }
}

/// Schema-based tool with typed input and a schema derived via schemars.
#[async_trait]
pub trait SchemaTool: Send + Sync {
    type Input: JsonSchema + DeserializeOwned + Send;
    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    const PATHS: ToolPathSchema = ToolPathSchema::NONE;

    async fn handle(&self, input: Self::Input, context: &ToolContext) -> Result<Value, ToolError>;

    fn input_schema() -> Value {
        let schema = schemars::schema_for!(Self::Input);
        let mut value = serde_json::to_value(schema)
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));

        if let Some(obj) = value.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
            obj.entry("properties")
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
        value
    }
}

#[async_trait]
impl<T: SchemaTool + 'static> Tool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        T::DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        T::input_schema()
    }

    fn path_schema(&self) -> ToolPathSchema {
        T::PATHS
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let typed = serde_json::from_value::<T::Input>(input)
            .map_err(|e| ToolError::invalid_arguments(e.to_string()))?;
        SchemaTool::handle(self, typed, context).await
    }
}
