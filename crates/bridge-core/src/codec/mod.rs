//! Payload serialization.
//!
//! Three wire formats are supported for the inner payload of a request:
//!
//! - `json`: UTF-8 JSON text
//! - `msgpack` (alias `binary-compact`): MessagePack with named fields
//! - `protobuf:<schema>` (alias `binary-schema:<schema>`): protobuf wire
//!   encoding driven by a [`MessageSchema`] registered with the codec
//!
//! The codec is immutable once built. Cloning it shares the schema table.

mod schema;

pub use schema::{FieldKind, FieldSpec, MessageSchema};

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Wire format of an encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum WireFormat {
    #[default]
    Json,
    /// Compact schemaless binary map encoding.
    MessagePack,
    /// Schema-typed binary encoding; carries the schema name.
    Protobuf(String),
}

impl WireFormat {
    /// Schema-typed format bound to `schema`.
    pub fn protobuf(schema: impl Into<String>) -> Self {
        WireFormat::Protobuf(schema.into())
    }

    pub fn is_json(&self) -> bool {
        matches!(self, WireFormat::Json)
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => write!(f, "json"),
            WireFormat::MessagePack => write!(f, "msgpack"),
            WireFormat::Protobuf(schema) if schema.is_empty() => write!(f, "protobuf"),
            WireFormat::Protobuf(schema) => write!(f, "protobuf:{}", schema),
        }
    }
}

impl FromStr for WireFormat {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, schema) = match s.split_once(':') {
            Some((name, schema)) => (name, Some(schema)),
            None => (s, None),
        };
        match (name.to_ascii_lowercase().as_str(), schema) {
            ("json", None) => Ok(WireFormat::Json),
            ("msgpack" | "binary-compact", None) => Ok(WireFormat::MessagePack),
            ("protobuf" | "binary-schema", schema) => {
                Ok(WireFormat::Protobuf(schema.unwrap_or_default().to_string()))
            }
            _ => Err(BridgeError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Serialize for WireFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WireFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Stateless encoder/decoder for payload values.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    schemas: Arc<HashMap<String, MessageSchema>>,
}

impl Codec {
    /// A codec with no schemas; `json` and `msgpack` work, `protobuf` does not.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message schema. Intended for startup, before the codec is
    /// shared.
    pub fn with_schema(mut self, schema: MessageSchema) -> Result<Self> {
        schema.validate()?;
        let schemas = Arc::make_mut(&mut self.schemas);
        if schemas.contains_key(&schema.name) {
            return Err(BridgeError::Config {
                message: format!("Schema '{}' registered twice", schema.name),
            });
        }
        schemas.insert(schema.name.clone(), schema);
        Ok(self)
    }

    pub fn schema(&self, name: &str) -> Option<&MessageSchema> {
        self.schemas.get(name)
    }

    /// Encode `value` in `format`.
    pub fn encode(&self, value: &Value, format: &WireFormat) -> Result<Vec<u8>> {
        match format {
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
            WireFormat::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| BridgeError::MalformedMessage(
                    format!("MessagePack encoding failed: {}", e),
                ))
            }
            WireFormat::Protobuf(name) => {
                let schema = self.require_schema(name)?;
                schema::encode(self, schema, value)
            }
        }
    }

    /// Decode `bytes` that were encoded in `format`.
    pub fn decode(&self, bytes: &[u8], format: &WireFormat) -> Result<Value> {
        match format {
            WireFormat::Json => serde_json::from_slice(bytes).map_err(|e| {
                BridgeError::MalformedMessage(format!("Invalid JSON payload: {}", e))
            }),
            WireFormat::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| {
                BridgeError::MalformedMessage(format!("Invalid MessagePack payload: {}", e))
            }),
            WireFormat::Protobuf(name) => {
                let schema = self.require_schema(name)?;
                schema::decode(self, schema, bytes)
            }
        }
    }

    /// Encode by textual format name; unknown names fail with
    /// `UnsupportedFormat`.
    pub fn encode_as(&self, value: &Value, format: &str) -> Result<Vec<u8>> {
        self.encode(value, &format.parse()?)
    }

    /// Decode by textual format name; unknown names fail with
    /// `UnsupportedFormat`.
    pub fn decode_as(&self, bytes: &[u8], format: &str) -> Result<Value> {
        self.decode(bytes, &format.parse()?)
    }

    fn require_schema(&self, name: &str) -> Result<&MessageSchema> {
        self.schemas
            .get(name)
            .ok_or_else(|| BridgeError::schema(name, "no schema registered under this name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sum_schema() -> MessageSchema {
        MessageSchema::new("sum")
            .field(FieldSpec::new("a", 1, FieldKind::Int64))
            .field(FieldSpec::new("b", 2, FieldKind::Int64))
            .field(FieldSpec::new("result", 3, FieldKind::Int64))
    }

    #[test]
    fn test_format_names() {
        assert_eq!("json".parse::<WireFormat>().unwrap(), WireFormat::Json);
        assert_eq!("msgpack".parse::<WireFormat>().unwrap(), WireFormat::MessagePack);
        assert_eq!(
            "binary-compact".parse::<WireFormat>().unwrap(),
            WireFormat::MessagePack
        );
        assert_eq!(
            "protobuf:sum".parse::<WireFormat>().unwrap(),
            WireFormat::protobuf("sum")
        );
        assert_eq!(
            "binary-schema:sum".parse::<WireFormat>().unwrap(),
            WireFormat::protobuf("sum")
        );
        assert_eq!(WireFormat::protobuf("sum").to_string(), "protobuf:sum");
        assert_eq!(WireFormat::default(), WireFormat::Json);
    }

    #[test]
    fn test_unsupported_format_names() {
        for name in ["xml", "yaml", "", "json:sum", "msgpack:x", "cbor"] {
            match name.parse::<WireFormat>() {
                Err(BridgeError::UnsupportedFormat(got)) => assert_eq!(got, name),
                other => panic!("expected UnsupportedFormat for {:?}, got {:?}", name, other),
            }
        }

        let codec = Codec::new();
        assert!(matches!(
            codec.encode_as(&json!({}), "xml"),
            Err(BridgeError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            codec.decode_as(b"{}", "avro"),
            Err(BridgeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = Codec::new();
        let value = json!({"a": 2, "b": [1, 2.5, "x", null], "nested": {"ok": true}});
        let bytes = codec.encode(&value, &WireFormat::Json).unwrap();
        assert_eq!(codec.decode(&bytes, &WireFormat::Json).unwrap(), value);
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let codec = Codec::new();
        let value = json!({"a": -7, "b": u64::MAX, "c": 0.25, "tags": ["x", "y"], "none": null});
        let bytes = codec.encode(&value, &WireFormat::MessagePack).unwrap();
        assert_ne!(bytes, serde_json::to_vec(&value).unwrap());
        assert_eq!(codec.decode(&bytes, &WireFormat::MessagePack).unwrap(), value);
    }

    #[test]
    fn test_protobuf_roundtrip() {
        let codec = Codec::new().with_schema(sum_schema()).unwrap();
        let format = WireFormat::protobuf("sum");
        let value = json!({"a": 2, "b": -3});
        let bytes = codec.encode(&value, &format).unwrap();
        assert_eq!(codec.decode(&bytes, &format).unwrap(), value);
    }

    #[test]
    fn test_protobuf_without_schema_is_mismatch() {
        let codec = Codec::new();
        let err = codec
            .encode(&json!({"a": 1}), &WireFormat::protobuf("sum"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::SchemaMismatch { .. }));

        let err = codec.decode(&[0x08, 0x01], &WireFormat::protobuf("")).unwrap_err();
        assert!(matches!(err, BridgeError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_duplicate_schema_rejected() {
        let result = Codec::new()
            .with_schema(sum_schema())
            .and_then(|codec| codec.with_schema(sum_schema()));
        assert!(matches!(result, Err(BridgeError::Config { .. })));
    }

    #[test]
    fn test_invalid_payloads() {
        let codec = Codec::new();
        assert!(codec.decode(b"{not json", &WireFormat::Json).is_err());
        assert!(codec.decode(&[0xc1], &WireFormat::MessagePack).is_err());
    }

    #[test]
    fn test_format_serde_as_string() {
        let json = serde_json::to_string(&WireFormat::protobuf("sum")).unwrap();
        assert_eq!(json, "\"protobuf:sum\"");
        let parsed: WireFormat = serde_json::from_str("\"msgpack\"").unwrap();
        assert_eq!(parsed, WireFormat::MessagePack);
        assert!(serde_json::from_str::<WireFormat>("\"xml\"").is_err());
    }
}
