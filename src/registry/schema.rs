//! Structural checks of tool arguments against a JSON-Schema-shaped contract.
//!
//! Only the generic shape is checked: object-ness, `required` keys, each
//! declared property's primitive `type`, and `enum` membership. Anything
//! beyond that belongs to the tool itself.

use serde_json::{Map, Value};

use crate::protocol::RpcError;

/// Check `arguments` against `schema`.
///
/// A schema that is not an object, or declares no constraints, accepts
/// anything.
///
/// # Errors
///
/// Returns an `InvalidParams` error describing the first violation.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), RpcError> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        if !type_matches(expected, arguments) {
            return Err(RpcError::invalid_params(format!(
                "arguments must be of type {}",
                describe_type(expected)
            )));
        }
    }

    let Some(arguments) = arguments.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(name) {
                return Err(RpcError::invalid_params(format!(
                    "missing required argument: {name}"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        check_properties(properties, arguments)?;
    }

    Ok(())
}

fn check_properties(
    properties: &Map<String, Value>,
    arguments: &Map<String, Value>,
) -> Result<(), RpcError> {
    for (name, property) in properties {
        let Some(value) = arguments.get(name) else {
            continue;
        };
        if let Some(expected) = property.get("type") {
            if !type_matches(expected, value) {
                return Err(RpcError::invalid_params(format!(
                    "argument {name} must be of type {}",
                    describe_type(expected)
                )));
            }
        }
        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(RpcError::invalid_params(format!(
                    "argument {name} must be one of {}",
                    Value::Array(allowed.clone())
                )));
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => primitive_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| primitive_matches(name, value)),
        _ => true,
    }
}

fn primitive_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}
