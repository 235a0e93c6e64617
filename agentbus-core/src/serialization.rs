//! Payload serialization
//!
//! Agents exchange opaque bytes. A [`PayloadSerializer`] turns application
//! values into those bytes and renders them as text for span attributes.

use crate::error::{AgentBusError, Result, SerializationError};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub const JSON_DATA_CONTENT_TYPE: &str = "application/json";

/// Converts between structured values and payload bytes.
pub trait PayloadSerializer: Send + Sync {
    /// The content type of the serialized data (e.g., "application/json").
    fn content_type(&self) -> &str;

    fn serialize(&self, value: &Value) -> Result<Bytes>;

    fn deserialize(&self, payload: &[u8]) -> Result<Value>;

    /// Text form of a payload as recorded in span attributes. Never fails;
    /// undecodable bytes are replaced.
    fn render(&self, payload: &[u8]) -> String {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// Compact JSON payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadSerializer;

impl JsonPayloadSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn to_bytes<T: Serialize>(&self, message: &T) -> Result<Bytes> {
        serde_json::to_vec(message).map(Bytes::from).map_err(|e| {
            AgentBusError::Serialization(SerializationError::JsonSerialization {
                details: e.to_string(),
            })
        })
    }

    pub fn from_bytes<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        serde_json::from_slice(payload).map_err(|e| {
            AgentBusError::Serialization(SerializationError::JsonDeserialization {
                details: e.to_string(),
            })
        })
    }
}

impl PayloadSerializer for JsonPayloadSerializer {
    fn content_type(&self) -> &str {
        JSON_DATA_CONTENT_TYPE
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        self.to_bytes(value)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Value> {
        self.from_bytes(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Vulnerability {
        title: String,
        risk_rating: String,
    }

    #[test]
    fn test_json_serializer() {
        let serializer = JsonPayloadSerializer::new();
        let value = json!({"title": "t", "risk_rating": "MEDIUM"});

        let bytes = serializer.serialize(&value).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), value);
        assert_eq!(serializer.content_type(), "application/json");

        let typed: Vulnerability = serializer.from_bytes(&bytes).unwrap();
        assert_eq!(typed.title, "t");
    }

    #[test]
    fn test_deserialize_error_is_reported() {
        let err = JsonPayloadSerializer::new().deserialize(b"{not json").unwrap_err();
        assert!(matches!(
            err,
            AgentBusError::Serialization(SerializationError::JsonDeserialization { .. })
        ));
    }

    #[test]
    fn test_render_replaces_invalid_utf8() {
        let rendered = JsonPayloadSerializer::new().render(&[b'{', 0xff, b'}']);
        assert_eq!(rendered, "{\u{fffd}}");
    }
}
