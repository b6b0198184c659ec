//! Input validation against JSON schemas

use crate::organ::OrganError;
use serde_json::Value;

pub type Result<T> = std::result::Result<T, OrganError>;

/// Validate input against a JSON schema. Nested object properties are
/// checked against their own `required` and `properties`.
pub fn validate_input(input: &Value, schema: &Value) -> Result<()> {
    validate_object(input, schema, "")
}

fn validate_object(input: &Value, schema: &Value, prefix: &str) -> Result<()> {
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required {
            let field_str = field_name.as_str().ok_or_else(|| {
                OrganError::InvalidInput("Invalid schema: required field not a string".to_string())
            })?;

            if input.get(field_str).is_none() {
                return Err(OrganError::InvalidInput(format!(
                    "Missing required field: {}{}",
                    prefix, field_str
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        if let Some(input_obj) = input.as_object() {
            for (key, value) in input_obj {
                if let Some(prop_schema) = properties.get(key) {
                    let path = format!("{}{}", prefix, key);
                    validate_type(value, prop_schema, &path)?;
                    if value.is_object() {
                        validate_object(value, prop_schema, &format!("{}.", path))?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Validate that a value matches the expected type
fn validate_type(value: &Value, schema: &Value, path: &str) -> Result<()> {
    if let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) {
        let valid = match expected_type {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true, // Unknown types pass validation
        };

        if !valid {
            return Err(OrganError::InvalidInput(format!(
                "Type mismatch for {}: expected {}, got {}",
                path, expected_type, value
            )));
        }
    }

    if let (Some(items), Some(values)) = (schema.get("items"), value.as_array()) {
        for (i, item) in values.iter().enumerate() {
            validate_type(item, items, &format!("{}[{}]", path, i))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_required_fields() {
        let schema = json!({
            "type": "object",
            "required": ["id", "source"]
        });

        assert!(validate_input(&json!({"id": "1", "source": "/tmp/a.jpg"}), &schema).is_ok());
        assert!(validate_input(&json!({"id": "1"}), &schema).is_err());
    }

    #[test]
    fn test_validate_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "width": { "type": "integer" },
                "mirror": { "type": "boolean" }
            }
        });

        assert!(validate_input(&json!({"width": 20, "mirror": true}), &schema).is_ok());
        assert!(validate_input(&json!({"width": "twenty", "mirror": true}), &schema).is_err());
        assert!(validate_input(&json!({"width": 20.5}), &schema).is_err());
    }

    #[test]
    fn test_validate_nested_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "object",
                    "properties": { "angle": { "type": "integer" } },
                    "required": ["type"]
                }
            }
        });

        assert!(validate_input(&json!({"format": {"type": "image", "angle": -90}}), &schema).is_ok());

        let err = validate_input(&json!({"format": {"angle": 90}}), &schema).unwrap_err();
        assert!(err.to_string().contains("format.type"));
    }

    #[test]
    fn test_validate_array_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "ids": { "type": "array", "items": { "type": "string" } }
            }
        });

        assert!(validate_input(&json!({"ids": ["1", "2"]}), &schema).is_ok());
        assert!(validate_input(&json!({"ids": ["1", 2]}), &schema).is_err());
    }
}
