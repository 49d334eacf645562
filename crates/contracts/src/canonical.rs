use hex::ToHex;
use serde::Serialize;
use sha2::Digest;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hasher.finalize().encode_hex::<String>()
}

/// Compares two byte strings without short-circuiting on the first mismatch.
///
/// Length is not secret: inputs of different length return `false` immediately.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Rebuilds `value` with every object's keys in ascending order.
pub fn canonicalize_json_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(values) => {
            serde_json::Value::Array(values.iter().map(canonicalize_json_value).collect())
        }
        serde_json::Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize_json_value(v));
            }
            serde_json::Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}

pub fn canonical_json_bytes(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize_json_value(value)).unwrap_or_else(|_| b"null".to_vec())
}

/// Stable content hash of any serializable value, independent of the field
/// order it was read or declared with.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_value(value)
        .map(|v| canonical_json_bytes(&v))
        .unwrap_or_else(|_| b"null".to_vec());
    sha256_hex(&bytes)
}
