//! Wire envelopes shared by server and client.
//!
//! Every message is one ZeroMQ frame holding UTF-8 JSON:
//!
//! ```text
//! request:  {"operation": "sum", "token": "<jwt>", "data": {...}}
//! success:  {"status": "success", "data": {...}}
//! error:    {"status": "error", "message": "Invalid JWT"}
//! ```
//!
//! When the payload uses a binary format, `data` holds the base64 of the
//! encoded bytes and `encoding` names the format, e.g.
//! `{"operation": "sum", "token": "...", "data": "CAIQAw==", "encoding": "protobuf:sum"}`.

use crate::codec::{Codec, WireFormat};
use crate::error::{BridgeError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call to a named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub operation: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub data: Value,
    /// Format of `data` when it is not plain JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl RequestEnvelope {
    pub fn new(operation: impl Into<String>, token: impl Into<String>, data: Value) -> Self {
        Self {
            operation: operation.into(),
            token: token.into(),
            data,
            encoding: None,
        }
    }

    /// Copy of this request with its payload encoded in `format`.
    pub fn seal(&self, codec: &Codec, format: &WireFormat) -> Result<Self> {
        let (data, encoding) = seal_payload(codec, &self.data, format)?;
        Ok(Self {
            operation: self.operation.clone(),
            token: self.token.clone(),
            data,
            encoding,
        })
    }

    /// The decoded payload of a request received off the wire.
    pub fn open(self, codec: &Codec) -> Result<Value> {
        open_payload(codec, self.data, self.encoding.as_deref())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a request frame; any failure is a malformed request.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| BridgeError::MalformedMessage(format!("request is not UTF-8: {}", e)))?;
        serde_json::from_str(text)
            .map_err(|e| BridgeError::MalformedMessage(format!("invalid request JSON: {}", e)))
    }
}

/// Outcome of a request. Exactly one of `data` or `message` exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Success {
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ResponseEnvelope {
    pub fn success(data: Value) -> Self {
        ResponseEnvelope::Success {
            data,
            encoding: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ResponseEnvelope::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ResponseEnvelope::Success { data, .. } => Some(data),
            ResponseEnvelope::Error { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Success { .. } => None,
            ResponseEnvelope::Error { message } => Some(message),
        }
    }

    /// Encode a success payload in `format`; errors pass through unchanged.
    pub fn seal(self, codec: &Codec, format: &WireFormat) -> Result<Self> {
        match self {
            ResponseEnvelope::Success { data, .. } => {
                let (data, encoding) = seal_payload(codec, &data, format)?;
                Ok(ResponseEnvelope::Success { data, encoding })
            }
            error => Ok(error),
        }
    }

    /// Decode a success payload received off the wire.
    pub fn open(self, codec: &Codec) -> Result<Self> {
        match self {
            ResponseEnvelope::Success { data, encoding } => Ok(ResponseEnvelope::success(
                open_payload(codec, data, encoding.as_deref())?,
            )),
            error => Ok(error),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::MalformedMessage(format!("invalid reply JSON: {}", e)))
    }
}

impl From<&BridgeError> for ResponseEnvelope {
    fn from(err: &BridgeError) -> Self {
        ResponseEnvelope::error(err.to_string())
    }
}

/// Encode `value` for the `data` field. JSON stays inline; other formats
/// become base64 text plus the format name.
pub fn seal_payload(
    codec: &Codec,
    value: &Value,
    format: &WireFormat,
) -> Result<(Value, Option<String>)> {
    if format.is_json() {
        return Ok((value.clone(), None));
    }
    let bytes = codec.encode(value, format)?;
    Ok((Value::String(STANDARD.encode(bytes)), Some(format.to_string())))
}

/// Inverse of [`seal_payload`].
pub fn open_payload(codec: &Codec, data: Value, encoding: Option<&str>) -> Result<Value> {
    let format: WireFormat = match encoding {
        None => return Ok(data),
        Some(name) => name.parse()?,
    };
    if format.is_json() {
        return Ok(data);
    }

    let text = data.as_str().ok_or_else(|| {
        BridgeError::MalformedMessage(format!("{} payload must be a base64 string", format))
    })?;
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| BridgeError::MalformedMessage(format!("invalid base64 payload: {}", e)))?;
    codec.decode(&bytes, &format)
}
