//! Schema-first input validation
//!
//! A small object-schema dialect: `type`, `required`, `properties`, `enum`,
//! `minimum`/`maximum`. Validation fails before any device is contacted and
//! carries the dotted path of the offending field.

use domain::command::ErrorCode;
use domain::tool::ToolError;
use serde_json::Value;

fn invalid(field: &str, msg: impl Into<String>) -> ToolError {
    ToolError {
        code: ErrorCode::InvalidArgs.as_str().to_string(),
        msg: msg.into(),
        field: Some(field.to_string()),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn validate_node(path: &str, value: &Value, schema: &Value) -> Result<(), ToolError> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(invalid(path, format!("expected {expected}")));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(invalid(path, "value not in enum"));
        }
    }

    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if let Some(n) = value.as_f64() {
            if n < min {
                return Err(invalid(path, format!("below minimum {min}")));
            }
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if let Some(n) = value.as_f64() {
            if n > max {
                return Err(invalid(path, format!("above maximum {max}")));
            }
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if value.get(name).is_none() {
                return Err(invalid(&format!("{path}.{name}"), "required field missing"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        if let Some(object) = value.as_object() {
            for (name, prop_schema) in properties {
                if let Some(child) = object.get(name) {
                    validate_node(&format!("{path}.{name}"), child, prop_schema)?;
                }
            }
        }
    }

    // Unknown keys are ignored by design (forward compatibility)
    Ok(())
}

/// Validate tool arguments against the tool's input schema
pub fn validate_args(args: &Value, schema: &Value) -> Result<(), ToolError> {
    validate_node("args", args, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ping_schema() -> Value {
        json!({
            "type": "object",
            "required": ["device", "target"],
            "properties": {
                "device": { "type": "string" },
                "target": { "type": "string" },
                "count": { "type": "integer", "minimum": 1, "maximum": 100 }
            }
        })
    }

    #[test]
    fn test_valid_args_pass() {
        let args = json!({"device": "aabbccddeeff", "target": "8.8.8.8", "count": 3});
        assert!(validate_args(&args, &ping_schema()).is_ok());
    }

    #[test]
    fn test_missing_required_field_path() {
        let args = json!({"device": "aabbccddeeff"});
        let err = validate_args(&args, &ping_schema()).unwrap_err();
        assert_eq!(err.code, "E_INVALID_ARGS");
        assert_eq!(err.field.as_deref(), Some("args.target"));
    }

    #[test]
    fn test_wrong_type() {
        let args = json!({"device": "aabbccddeeff", "target": 42});
        let err = validate_args(&args, &ping_schema()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("args.target"));
    }

    #[test]
    fn test_range_bounds() {
        let args = json!({"device": "aabbccddeeff", "target": "8.8.8.8", "count": 0});
        let err = validate_args(&args, &ping_schema()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("args.count"));
    }

    #[test]
    fn test_enum_membership() {
        let schema = json!({
            "type": "object",
            "required": ["scope"],
            "properties": { "scope": { "type": "string", "enum": ["router", "client"] } }
        });
        assert!(validate_args(&json!({"scope": "router"}), &schema).is_ok());
        let err = validate_args(&json!({"scope": "moon"}), &schema).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("args.scope"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let args = json!({"device": "a", "target": "b", "mystery": {"x": 1}});
        assert!(validate_args(&args, &ping_schema()).is_ok());
    }

    #[test]
    fn test_nested_object_path() {
        let schema = json!({
            "type": "object",
            "required": ["options"],
            "properties": {
                "options": {
                    "type": "object",
                    "required": ["width"],
                    "properties": { "width": { "type": "string" } }
                }
            }
        });
        let err = validate_args(&json!({"options": {}}), &schema).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("args.options.width"));
    }
}
