//! Runtime message schemas for the protobuf wire format.
//!
//! A [`MessageSchema`] maps JSON object keys to protobuf field tags and
//! kinds, which is enough to move `serde_json::Value` objects over protobuf
//! wire encoding without generated code. Encoding rules:
//!
//! | kind      | wire type        | JSON value                |
//! |-----------|------------------|---------------------------|
//! | `Int64`   | varint           | integer fitting `i64`     |
//! | `UInt64`  | varint           | non-negative integer      |
//! | `Bool`    | varint           | boolean                   |
//! | `Double`  | 64-bit           | floating-point number     |
//! | `String`  | length-delimited | string                    |
//! | `Json`    | length-delimited | anything (as JSON text)   |
//! | `Message` | length-delimited | object (nested schema)    |
//!
//! `null` members are skipped. Repeated fields take non-empty JSON arrays and
//! emit one record per element; an empty list has no wire form, so omit the
//! key instead. Integers are rejected for `Double` fields because they would
//! come back as floats.

use super::Codec;
use crate::error::{BridgeError, Result};
use bytes::{Buf, BufMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, WireType};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;

/// Largest tag protobuf allows.
const MAX_TAG: u32 = (1 << 29) - 1;

/// Nesting limit for `Message` fields.
const MAX_DEPTH: usize = 32;

/// Value kind of a schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Int64,
    UInt64,
    Double,
    Bool,
    /// Arbitrary JSON value stored as JSON text.
    Json,
    /// Nested object described by the named schema.
    Message(String),
}

impl FieldKind {
    fn wire_type(&self) -> WireType {
        match self {
            FieldKind::Int64 | FieldKind::UInt64 | FieldKind::Bool => WireType::Varint,
            FieldKind::Double => WireType::SixtyFourBit,
            FieldKind::String | FieldKind::Json | FieldKind::Message(_) => {
                WireType::LengthDelimited
            }
        }
    }
}

/// One field of a message schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub tag: u32,
    pub kind: FieldKind,
    pub repeated: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, tag: u32, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            tag,
            kind,
            repeated: false,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }
}

/// Named set of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_tag(&self, tag: u32) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// Check tag range and uniqueness of names and tags.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BridgeError::Config {
                message: "Schema name must not be empty".to_string(),
            });
        }
        let mut names = HashSet::new();
        let mut tags = HashSet::new();
        for field in &self.fields {
            if field.tag == 0 || field.tag > MAX_TAG {
                return Err(BridgeError::Config {
                    message: format!(
                        "Schema '{}': tag {} of '{}' is out of range",
                        self.name, field.tag, field.name
                    ),
                });
            }
            if !names.insert(field.name.as_str()) || !tags.insert(field.tag) {
                return Err(BridgeError::Config {
                    message: format!(
                        "Schema '{}': duplicate field name or tag at '{}'",
                        self.name, field.name
                    ),
                });
            }
        }
        Ok(())
    }
}

pub(super) fn encode(codec: &Codec, schema: &MessageSchema, value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_message(codec, schema, value, &mut buf, 0)?;
    Ok(buf)
}

pub(super) fn decode(codec: &Codec, schema: &MessageSchema, bytes: &[u8]) -> Result<Value> {
    let mut buf = bytes;
    decode_message(codec, schema, &mut buf, 0)
}

fn nested_schema<'a>(codec: &'a Codec, parent: &MessageSchema, name: &str) -> Result<&'a MessageSchema> {
    codec.schema(name).ok_or_else(|| {
        BridgeError::schema(
            &parent.name,
            format!("nested schema '{}' is not registered", name),
        )
    })
}

fn encode_message(
    codec: &Codec,
    schema: &MessageSchema,
    value: &Value,
    buf: &mut Vec<u8>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::schema(&schema.name, "message nesting too deep"));
    }
    let object = value
        .as_object()
        .ok_or_else(|| BridgeError::schema(&schema.name, "only JSON objects can be encoded"))?;

    for (key, member) in object {
        let field = schema.field_by_name(key).ok_or_else(|| {
            BridgeError::schema(&schema.name, format!("field '{}' is not in the schema", key))
        })?;
        if member.is_null() {
            continue;
        }
        if field.repeated {
            let items = member.as_array().ok_or_else(|| {
                BridgeError::schema(
                    &schema.name,
                    format!("repeated field '{}' expects an array", key),
                )
            })?;
            if items.is_empty() {
                return Err(BridgeError::schema(
                    &schema.name,
                    format!("repeated field '{}' is empty; omit it instead", key),
                ));
            }
            for item in items {
                encode_field(codec, schema, field, item, buf, depth)?;
            }
        } else {
            encode_field(codec, schema, field, member, buf, depth)?;
        }
    }
    Ok(())
}

fn encode_field(
    codec: &Codec,
    schema: &MessageSchema,
    field: &FieldSpec,
    value: &Value,
    buf: &mut Vec<u8>,
    depth: usize,
) -> Result<()> {
    let mismatch = || {
        BridgeError::schema(
            &schema.name,
            format!("field '{}' expects {:?}, got {}", field.name, field.kind, value),
        )
    };

    encode_key(field.tag, field.kind.wire_type(), buf);
    match &field.kind {
        FieldKind::Int64 => encode_varint(value.as_i64().ok_or_else(mismatch)? as u64, buf),
        FieldKind::UInt64 => encode_varint(value.as_u64().ok_or_else(mismatch)?, buf),
        FieldKind::Bool => encode_varint(u64::from(value.as_bool().ok_or_else(mismatch)?), buf),
        FieldKind::Double => {
            let number = match value {
                Value::Number(n) if n.is_f64() => n.as_f64(),
                _ => None,
            };
            buf.put_f64_le(number.ok_or_else(mismatch)?)
        }
        FieldKind::String => put_length_delimited(value.as_str().ok_or_else(mismatch)?.as_bytes(), buf),
        FieldKind::Json => put_length_delimited(&serde_json::to_vec(value)?, buf),
        FieldKind::Message(name) => {
            if !value.is_object() {
                return Err(mismatch());
            }
            let nested = nested_schema(codec, schema, name)?;
            let mut inner = Vec::new();
            encode_message(codec, nested, value, &mut inner, depth + 1)?;
            put_length_delimited(&inner, buf);
        }
    }
    Ok(())
}

fn put_length_delimited(bytes: &[u8], buf: &mut Vec<u8>) {
    encode_varint(bytes.len() as u64, buf);
    buf.put_slice(bytes);
}

fn decode_message(
    codec: &Codec,
    schema: &MessageSchema,
    buf: &mut &[u8],
    depth: usize,
) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::schema(&schema.name, "message nesting too deep"));
    }
    let invalid = |e: prost::DecodeError| BridgeError::schema(&schema.name, e.to_string());

    let mut object = Map::new();
    while buf.has_remaining() {
        let (tag, wire_type) = decode_key(buf).map_err(invalid)?;
        let field = schema.field_by_tag(tag).ok_or_else(|| {
            BridgeError::schema(&schema.name, format!("unknown field tag {}", tag))
        })?;
        if wire_type != field.kind.wire_type() {
            return Err(BridgeError::schema(
                &schema.name,
                format!(
                    "field '{}' arrived as {:?}, expected {:?}",
                    field.name,
                    wire_type,
                    field.kind.wire_type()
                ),
            ));
        }

        let value = match &field.kind {
            FieldKind::Int64 => Value::from(decode_varint(buf).map_err(invalid)? as i64),
            FieldKind::UInt64 => Value::from(decode_varint(buf).map_err(invalid)?),
            FieldKind::Bool => Value::Bool(decode_varint(buf).map_err(invalid)? != 0),
            FieldKind::Double => {
                if buf.remaining() < 8 {
                    return Err(BridgeError::schema(&schema.name, "truncated double"));
                }
                let raw = buf.get_f64_le();
                Number::from_f64(raw).map(Value::Number).ok_or_else(|| {
                    BridgeError::schema(&schema.name, "non-finite double")
                })?
            }
            FieldKind::String => {
                let bytes = take_length_delimited(schema, buf)?;
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    BridgeError::schema(
                        &schema.name,
                        format!("field '{}' is not valid UTF-8", field.name),
                    )
                })?;
                Value::String(text.to_string())
            }
            FieldKind::Json => {
                let bytes = take_length_delimited(schema, buf)?;
                serde_json::from_slice(bytes).map_err(|e| {
                    BridgeError::schema(
                        &schema.name,
                        format!("field '{}' holds invalid JSON: {}", field.name, e),
                    )
                })?
            }
            FieldKind::Message(name) => {
                let nested = nested_schema(codec, schema, name)?;
                let mut inner = take_length_delimited(schema, buf)?;
                decode_message(codec, nested, &mut inner, depth + 1)?
            }
        };

        if field.repeated {
            let slot = object
                .entry(field.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Some(items) = slot.as_array_mut() {
                items.push(value);
            }
        } else {
            // Last occurrence wins, as in protobuf.
            object.insert(field.name.clone(), value);
        }
    }
    Ok(Value::Object(object))
}

fn take_length_delimited<'a>(schema: &MessageSchema, buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = decode_varint(buf).map_err(|e| BridgeError::schema(&schema.name, e.to_string()))?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= buf.len())
        .ok_or_else(|| BridgeError::schema(&schema.name, "truncated length-delimited field"))?;
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireFormat;
    use serde_json::json;

    fn codec() -> Codec {
        Codec::new()
            .with_schema(
                MessageSchema::new("point")
                    .field(FieldSpec::new("x", 1, FieldKind::Double))
                    .field(FieldSpec::new("y", 2, FieldKind::Double)),
            )
            .unwrap()
            .with_schema(
                MessageSchema::new("shape")
                    .field(FieldSpec::new("name", 1, FieldKind::String))
                    .field(FieldSpec::new("sides", 2, FieldKind::UInt64))
                    .field(FieldSpec::new("filled", 3, FieldKind::Bool))
                    .field(FieldSpec::new("offset", 4, FieldKind::Int64))
                    .field(FieldSpec::new("origin", 5, FieldKind::Message("point".into())))
                    .field(FieldSpec::new("vertices", 6, FieldKind::Message("point".into())).repeated())
                    .field(FieldSpec::new("labels", 7, FieldKind::String).repeated())
                    .field(FieldSpec::new("extra", 8, FieldKind::Json)),
            )
            .unwrap()
    }

    #[test]
    fn test_nested_and_repeated_roundtrip() {
        let codec = codec();
        let format = WireFormat::protobuf("shape");
        let value = json!({
            "name": "triangle",
            "sides": 3,
            "filled": true,
            "offset": -12,
            "origin": {"x": 0.5, "y": -1.25},
            "vertices": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 0.0}, {"x": 0.5, "y": 1.0}],
            "labels": ["a", "b"],
            "extra": {"anything": [1, "two", null]}
        });

        let bytes = codec.encode(&value, &format).unwrap();
        assert_eq!(codec.decode(&bytes, &format).unwrap(), value);
    }

    #[test]
    fn test_known_wire_bytes() {
        // {a: 150} with a=1 as int64 is the canonical protobuf example 08 96 01.
        let codec = Codec::new()
            .with_schema(MessageSchema::new("m").field(FieldSpec::new("a", 1, FieldKind::Int64)))
            .unwrap();
        let bytes = codec.encode(&json!({"a": 150}), &WireFormat::protobuf("m")).unwrap();
        assert_eq!(bytes, vec![0x08, 0x96, 0x01]);
    }

    #[test]
    fn test_null_members_are_omitted() {
        let codec = codec();
        let format = WireFormat::protobuf("shape");
        let bytes = codec.encode(&json!({"name": "dot", "origin": null}), &format).unwrap();
        assert_eq!(codec.decode(&bytes, &format).unwrap(), json!({"name": "dot"}));
    }

    #[test]
    fn test_encode_mismatches() {
        let codec = codec();
        let format = WireFormat::protobuf("shape");
        let cases = [
            json!([1, 2, 3]),
            json!({"unknown": 1}),
            json!({"sides": -1}),
            json!({"sides": "three"}),
            json!({"filled": 1}),
            json!({"labels": "a"}),
            json!({"origin": [0.0, 1.0]}),
        ];
        for value in cases {
            let err = codec.encode(&value, &format).unwrap_err();
            assert!(
                matches!(err, BridgeError::SchemaMismatch { .. }),
                "{} should mismatch, got {:?}",
                value,
                err
            );
        }
    }

    #[test]
    fn test_unrepresentable_values_are_rejected() {
        let codec = codec();
        // Would decode as 2.0 and [] would vanish, so neither survives a round trip.
        let cases = [
            (WireFormat::protobuf("point"), json!({"x": 2})),
            (WireFormat::protobuf("shape"), json!({"labels": []})),
        ];
        for (format, value) in cases {
            let err = codec.encode(&value, &format).unwrap_err();
            assert!(matches!(err, BridgeError::SchemaMismatch { .. }), "{}", value);
        }

        let format = WireFormat::protobuf("point");
        let value = json!({"x": 2.0, "y": -0.5});
        let bytes = codec.encode(&value, &format).unwrap();
        assert_eq!(codec.decode(&bytes, &format).unwrap(), value);
    }

    #[test]
    fn test_decode_mismatches() {
        let codec = codec();
        let format = WireFormat::protobuf("point");
        // Unknown tag 9 (varint).
        assert!(matches!(
            codec.decode(&[0x48, 0x01], &format),
            Err(BridgeError::SchemaMismatch { .. })
        ));
        // Tag 1 sent as varint while the schema says double.
        assert!(matches!(
            codec.decode(&[0x08, 0x01], &format),
            Err(BridgeError::SchemaMismatch { .. })
        ));
        // Truncated double.
        assert!(matches!(
            codec.decode(&[0x09, 0x00, 0x00], &format),
            Err(BridgeError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_nested_schema() {
        let codec = Codec::new()
            .with_schema(
                MessageSchema::new("outer")
                    .field(FieldSpec::new("inner", 1, FieldKind::Message("ghost".into()))),
            )
            .unwrap();
        let err = codec
            .encode(&json!({"inner": {}}), &WireFormat::protobuf("outer"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_schema_validation() {
        let bad_tag = MessageSchema::new("m").field(FieldSpec::new("a", 0, FieldKind::Bool));
        assert!(bad_tag.validate().is_err());

        let duplicate = MessageSchema::new("m")
            .field(FieldSpec::new("a", 1, FieldKind::Bool))
            .field(FieldSpec::new("b", 1, FieldKind::Bool));
        assert!(duplicate.validate().is_err());

        assert!(MessageSchema::new("").validate().is_err());
    }
}
