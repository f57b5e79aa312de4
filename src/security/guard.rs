//! SecurityGuard: pre-execution argument validation for tools.

use serde_json::Value;

use super::{PathPolicy, SecurityError, SecurityPolicy};

/// Which argument fields of a tool carry paths or commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolPathSchema {
    pub path_fields: &'static [&'static str],
    pub command_field: Option<&'static str>,
}

impl ToolPathSchema {
    pub const NONE: Self = Self {
        path_fields: &[],
        command_field: None,
    };

    pub const fn paths(fields: &'static [&'static str]) -> Self {
        Self {
            path_fields: fields,
            command_field: None,
        }
    }

    pub const fn command(field: &'static str) -> Self {
        Self {
            path_fields: &[],
            command_field: Some(field),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.path_fields.is_empty() && self.command_field.is_none()
    }
}

pub struct SecurityGuard;

impl SecurityGuard {
    /// Checks command fields against the deny-list. Needs no target.
    pub fn validate_command(schema: &ToolPathSchema, input: &Value) -> Result<(), SecurityError> {
        if let Some(field) = schema.command_field
            && let Some(command) = input.get(field).and_then(|v| v.as_str())
        {
            SecurityPolicy::check_command(command)?;
        }
        Ok(())
    }

    /// Checks every path field against the target's path policy.
    pub fn validate_paths(
        policy: &PathPolicy,
        schema: &ToolPathSchema,
        input: &Value,
    ) -> Result<(), SecurityError> {
        for field in schema.path_fields {
            if let Some(path) = input.get(*field).and_then(|v| v.as_str()) {
                policy.check(path)?;
            }
        }
        Ok(())
    }

    pub fn validate(
        policy: &PathPolicy,
        schema: &ToolPathSchema,
        input: &Value,
    ) -> Result<(), SecurityError> {
        Self::validate_command(schema, input)?;
        Self::validate_paths(policy, schema, input)
    }
}
