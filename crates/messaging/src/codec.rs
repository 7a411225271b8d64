use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Wire codec.
///
/// Works on [`serde_json::Value`] so the trait stays object safe and can be
/// swapped at runtime; [`encode`] and [`decode`] bridge to concrete types.
pub trait Serializer: Send + Sync {
    /// MIME type advertised in the `content_type` header.
    fn content_type(&self) -> &'static str;

    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// Default JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serializes a typed value through a codec.
pub fn encode<T: Serialize + ?Sized>(serializer: &dyn Serializer, value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    serializer.serialize(&value)
}

/// Deserializes a typed value through a codec.
pub fn decode<T: DeserializeOwned>(serializer: &dyn Serializer, bytes: &[u8]) -> Result<T> {
    let value = serializer.deserialize(bytes)?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reserve {
        sku: String,
        quantity: u32,
    }

    #[test]
    fn test_typed_encode_decode() {
        let codec = JsonSerializer;
        let bytes = encode(&codec, &Reserve { sku: "SKU-1".into(), quantity: 3 }).unwrap();
        let decoded: Reserve = decode(&codec, &bytes).unwrap();
        assert_eq!(decoded.sku, "SKU-1");
        assert_eq!(decoded.quantity, 3);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = JsonSerializer;
        let result: Result<Reserve> = decode(&codec, b"not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(JsonSerializer.content_type(), "application/json");
    }
}
