//! Unit tests for tool argument validation.

use serde_json::json;

use mcp_capability_server::registry::validate_arguments;

fn schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string" },
            "count": { "type": "integer" },
            "mode": { "type": "string", "enum": ["fast", "slow"] },
            "maybe": { "type": ["string", "null"] },
        },
        "required": ["message"],
    })
}

#[test]
fn conforming_arguments_pass() {
    let args = json!({ "message": "hi", "count": 3, "mode": "fast", "maybe": null });
    assert!(validate_arguments(&schema(), &args).is_ok());
}

#[test]
fn missing_required_argument_is_invalid_params() {
    let err = validate_arguments(&schema(), &json!({ "count": 1 })).expect_err("missing");
    assert_eq!(err.code, -32602);
    assert!(err.message.contains("missing required argument: message"));
}

#[test]
fn wrong_property_type_is_rejected() {
    let err = validate_arguments(&schema(), &json!({ "message": "hi", "count": 1.5 }))
        .expect_err("float is not an integer");
    assert!(err.message.contains("count"));
}

#[test]
fn value_outside_enum_is_rejected() {
    let err = validate_arguments(&schema(), &json!({ "message": "hi", "mode": "warp" }))
        .expect_err("not in enum");
    assert!(err.message.contains("mode"));
}

#[test]
fn non_object_arguments_fail_object_schema() {
    let err = validate_arguments(&schema(), &json!([1, 2])).expect_err("array");
    assert_eq!(err.code, -32602);
}

#[test]
fn undeclared_properties_are_allowed() {
    let args = json!({ "message": "hi", "extra": { "nested": true } });
    assert!(validate_arguments(&schema(), &args).is_ok());
}

#[test]
fn absent_schema_accepts_anything() {
    assert!(validate_arguments(&json!(null), &json!("whatever")).is_ok());
    assert!(validate_arguments(&json!({}), &json!({ "a": 1 })).is_ok());
}
