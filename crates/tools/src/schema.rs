//! Minimal JSON-Schema validation for tool inputs.
//!
//! Covers the subset tool manifests actually use: `type`, `required`,
//! `properties`, `items`, and `enum`. Anything else passes through.

use serde_json::Value;

use crate::ValidationIssue;

/// Validate `input` against `schema`, collecting issues per path.
pub fn validate_input(schema: &Value, input: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    validate_node(schema, input, "$", &mut issues);
    issues
}

fn validate_node(schema: &Value, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let Some(obj) = schema.as_object() else {
        return;
    };

    if let Some(expected) = obj.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            issues.push(ValidationIssue {
                path: path.to_owned(),
                message: format!("expected {expected}, got {}", type_name(value)),
                code: Some("invalid_type".into()),
            });
            return;
        }
    }

    if let Some(allowed) = obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            issues.push(ValidationIssue {
                path: path.to_owned(),
                message: format!("value not in enum: {value}"),
                code: Some("invalid_enum".into()),
            });
            return;
        }
    }

    if let Some(map) = value.as_object() {
        if let Some(required) = obj.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    issues.push(ValidationIssue {
                        path: format!("{path}.{key}"),
                        message: "missing required property".into(),
                        code: Some("required".into()),
                    });
                }
            }
        }
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            for (key, sub_schema) in props {
                if let Some(sub_value) = map.get(key) {
                    validate_node(sub_schema, sub_value, &format!("{path}.{key}"), issues);
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (obj.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            validate_node(items, item, &format!("{path}[{i}]"), issues);
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether a manifest's `parameters` value is schema-shaped: a JSON
/// object (conventionally with `type: "object"`).
pub fn is_schema_shaped(parameters: &Value) -> bool {
    parameters.is_object()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": "integer" },
                "mode": { "type": "string", "enum": ["fast", "slow"] }
            }
        })
    }

    #[test]
    fn valid_input_passes() {
        let issues = validate_input(&schema(), &json!({"path": "a.txt", "limit": 3}));
        assert!(issues.is_empty());
    }

    #[test]
    fn missing_required_flagged_with_path() {
        let issues = validate_input(&schema(), &json!({"limit": 3}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$.path");
        assert_eq!(issues[0].code.as_deref(), Some("required"));
    }

    #[test]
    fn wrong_type_flagged() {
        let issues = validate_input(&schema(), &json!({"path": 42}));
        assert!(issues.iter().any(|i| i.path == "$.path"));
    }

    #[test]
    fn enum_violation_flagged() {
        let issues = validate_input(&schema(), &json!({"path": "x", "mode": "warp"}));
        assert!(issues.iter().any(|i| i.code.as_deref() == Some("invalid_enum")));
    }

    #[test]
    fn array_items_validated() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        let issues = validate_input(&schema, &json!(["ok", 5]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$[1]");
    }
}
