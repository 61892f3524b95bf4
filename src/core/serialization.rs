use super::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Compute a stable hash of serialized bytes for change detection.
///
/// Uses SeaHash which provides:
/// - Stable hashing across Rust compiler versions
/// - Stable across process restarts and machines
/// - Fast hashing for serialized snapshots
///
/// This matters for persistence strategies that compare state snapshots:
/// the same state must produce the same fingerprint every time, regardless
/// of Rust version.
///
/// Note: This is NOT cryptographically secure, but that's not needed here.
pub fn hash_state(bytes: &[u8]) -> u64 {
    seahash::hash(bytes)
}

/// Serializes a value to bytes using JSON.
///
/// # Errors
/// Returns `CoreError::Serialization` if the value cannot be serialized.
pub fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(CoreError::Serialization)
}

/// Deserializes bytes to a value using JSON.
///
/// # Errors
/// Returns `CoreError::Deserialization` if the bytes cannot be deserialized.
pub fn deserialize_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(CoreError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_state() {
        let a = serialize_value(&("counter", 3)).unwrap();
        let b = serialize_value(&("counter", 4)).unwrap();

        assert_ne!(hash_state(&a), hash_state(&b));

        let a2 = serialize_value(&("counter", 3)).unwrap();
        assert_eq!(hash_state(&a), hash_state(&a2));
    }

    #[test]
    fn test_serialization_round_trip() {
        let value = vec!["hello".to_string(), "world".to_string()];
        let bytes = serialize_value(&value).unwrap();
        let back: Vec<String> = deserialize_value(&bytes).unwrap();
        assert_eq!(value, back);
    }
}
