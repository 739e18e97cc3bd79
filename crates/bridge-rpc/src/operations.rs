//! Built-in operations served by `secure-bridge serve`.

use secure_bridge::{
    FieldKind, FieldSpec, HandlerError, HandlerResult, MessageSchema, SecureBridgeBuilder,
};
use serde_json::{json, Value};

/// Add two integers: `{"a": 2, "b": 3}` -> `{"result": 5}`.
pub fn sum(data: Value) -> HandlerResult {
    let operand = |name: &str| {
        data.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| HandlerError::new(format!("'{}' must be an integer", name)))
    };
    let a = operand("a")?;
    let b = operand("b")?;
    let result = a
        .checked_add(b)
        .ok_or_else(|| HandlerError::new("integer overflow"))?;
    Ok(json!({ "result": result }))
}

/// Return the payload unchanged.
pub fn echo(data: Value) -> HandlerResult {
    Ok(data)
}

/// Schema for `sum` requests and replies in the `protobuf:sum` format.
pub fn sum_schema() -> MessageSchema {
    MessageSchema::new("sum")
        .field(FieldSpec::new("a", 1, FieldKind::Int64))
        .field(FieldSpec::new("b", 2, FieldKind::Int64))
        .field(FieldSpec::new("result", 3, FieldKind::Int64))
}

/// Register the built-in operations and their schemas.
pub fn register(builder: SecureBridgeBuilder) -> SecureBridgeBuilder {
    builder
        .handler("sum", sum)
        .handler("echo", echo)
        .schema(sum_schema())
}

/// Static description served at `/operations`.
pub fn describe() -> Value {
    json!({
        "transport": "zeromq+curve",
        "auth": "Bearer JWT (HS256) in the request envelope's 'token' field",
        "formats": ["json", "msgpack", "protobuf:sum"],
        "operations": [
            {
                "name": "echo",
                "description": "Return the payload unchanged",
                "request": "any",
                "response": "any"
            },
            {
                "name": "sum",
                "description": "Add two integers",
                "request": { "a": "integer", "b": "integer" },
                "response": { "result": "integer" }
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum() {
        assert_eq!(sum(json!({"a": 2, "b": 3})).unwrap(), json!({"result": 5}));
        assert_eq!(
            sum(json!({"a": 2})).unwrap_err().message,
            "'b' must be an integer"
        );
        assert!(sum(json!({"a": i64::MAX, "b": 1})).is_err());
    }

    #[test]
    fn test_echo() {
        assert_eq!(echo(json!([1, "two"])).unwrap(), json!([1, "two"]));
    }

    #[test]
    fn test_description_lists_registered_operations() {
        let bridge = register(secure_bridge::SecureBridge::builder()).build().unwrap();
        let description = describe();
        let described: Vec<&str> = description["operations"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|op| op["name"].as_str())
            .collect();
        assert_eq!(described, bridge.operations());
    }
}
