//! Argument validation against a tool's declared JSON schema.

use serde_json::Value;

use crate::types::ToolError;

/// A tool's input schema, compiled once at registration.
pub struct InputValidator {
    validator: jsonschema::Validator,
}

impl InputValidator {
    /// Fails with the compiler's message when the schema itself is invalid.
    pub fn compile(schema: &Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .build(schema)
            .map_err(|e| e.to_string())?;
        Ok(Self { validator })
    }

    /// Reports the first violation, naming the offending field.
    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        self.validator.validate(args).map_err(|error| {
            let path = error.instance_path.to_string();
            let field = path.trim_start_matches('/');
            if field.is_empty() {
                ToolError::invalid_arguments(error.to_string())
            } else {
                ToolError::invalid_arguments(format!("field '{}': {}", field, error))
            }
        })
    }
}

impl std::fmt::Debug for InputValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> InputValidator {
        InputValidator::compile(&json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": ["integer", "null"], "format": "uint64", "minimum": 0},
                "target": {"type": "string", "enum": ["local", "web"]}
            },
            "required": ["path"]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid() {
        let v = validator();
        assert!(v.validate(&json!({"path": "a.txt"})).is_ok());
        assert!(v.validate(&json!({"path": "a", "limit": null, "extra": 1})).is_ok());
        assert!(v.validate(&json!({"path": "a", "target": "web"})).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let v = validator();
        let err = v.validate(&json!({})).unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
        assert!(err.to_string().contains("path"));
        assert!(v.validate(&json!({"path": null})).is_err());
    }

    #[test]
    fn test_wrong_type_names_field() {
        let v = validator();
        let err = v.validate(&json!({"path": 5})).unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
        assert!(err.to_string().contains("field 'path'"));
        assert!(v.validate(&json!({"path": "a", "limit": 1.5})).is_err());
    }

    #[test]
    fn test_minimum_enforced() {
        let err = validator()
            .validate(&json!({"path": "a", "limit": -5}))
            .unwrap_err();
        assert!(err.to_string().contains("field 'limit'"));
    }

    #[test]
    fn test_enum() {
        assert!(validator().validate(&json!({"path": "a", "target": "db"})).is_err());
    }

    #[test]
    fn test_non_object() {
        let v = validator();
        assert!(v.validate(&json!("read a.txt")).is_err());
        assert!(v.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_invalid_schema_rejected() {
        assert!(InputValidator::compile(&json!({"type": 12})).is_err());
    }
}
