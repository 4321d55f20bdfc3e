//! Self-describing values carried between locations.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChoreographyError, Result};

/// Values that may cross a transport.
///
/// Anything serializable, clonable and thread-safe qualifies.
pub trait Portable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> Portable for T {}

/// A value in transit, tagged with the Rust type it was encoded from.
///
/// On the wire this is `{"type": "<tag>", "value": <json>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    type_tag: String,
    value: Value,
}

impl Payload {
    /// Encode `value`, recording its type name as the tag.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| ChoreographyError::Serialization(e.to_string()))?;
        Ok(Self {
            type_tag: std::any::type_name::<T>().to_string(),
            value,
        })
    }

    /// Decode into `T`, failing if the tag names a different type or the
    /// value does not have the shape of `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let expected = std::any::type_name::<T>();
        if self.type_tag != expected {
            return Err(ChoreographyError::TypeMismatch {
                expected: expected.to_string(),
                found: self.type_tag.clone(),
            });
        }
        T::deserialize(&self.value).map_err(|e| ChoreographyError::Serialization(e.to_string()))
    }

    /// The recorded type tag.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The untyped JSON value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Build a payload from raw parts, e.g. when bridging a foreign producer.
    pub fn from_parts(type_tag: impl Into<String>, value: Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quote {
        price: u32,
    }

    #[test]
    fn decode_rejects_other_type_tag() {
        let payload = Payload::encode(&"TAPL".to_string()).unwrap();
        let err = payload.decode::<u32>().unwrap_err();
        match err {
            ChoreographyError::TypeMismatch { expected, found } => {
                assert_eq!(expected, "u32");
                assert_eq!(found, "alloc::string::String");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_rejects_wrong_shape_under_matching_tag() {
        let payload = Payload::from_parts(std::any::type_name::<Quote>(), serde_json::json!("80"));
        assert!(matches!(
            payload.decode::<Quote>(),
            Err(ChoreographyError::Serialization(_))
        ));
    }

    #[test]
    fn wire_form_carries_type_tag() {
        let payload = Payload::encode(&Quote { price: 80 }).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["value"]["price"], 80);
        assert!(json["type"].as_str().unwrap().ends_with("Quote"));

        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back.decode::<Quote>().unwrap(), Quote { price: 80 });
    }
}
