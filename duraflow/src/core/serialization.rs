use super::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a value to its persisted JSON text.
///
/// # Errors
/// Returns `CoreError::Serialization` if the value cannot be serialized.
pub fn serialize_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(CoreError::Serialization)
}

/// Deserializes persisted JSON text back into a value.
///
/// # Errors
/// Returns `CoreError::Deserialization` if the text does not decode as `T`.
pub fn deserialize_value<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|source| CoreError::Deserialization {
        type_name: std::any::type_name::<T>(),
        source,
    })
}

/// Returns the type tag recorded next to a serialized value.
///
/// The tag is diagnostic: it is compared on replay and a mismatch is logged,
/// but decoding is driven by the caller's type.
pub fn type_tag<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}
