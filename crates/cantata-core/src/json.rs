//! JSON operations.
//!
//! Decoding goes through sonic-rs. Encoding of served documents goes through
//! [`to_canonical_json`], which sorts object keys, pretty prints with four-space
//! indentation and leaves slashes and unicode unescaped. The output must be
//! byte-for-byte reproducible because clients verify it against advertised
//! sha256 hashes.

use crate::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

/// Deserialize JSON bytes.
///
/// # Errors
/// Returns error if JSON is invalid.
pub fn from_json_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    sonic_rs::from_slice(bytes).map_err(Error::from)
}

/// Recursively sort object keys.
///
/// Rebuilding the map in sorted order yields sorted output whether or not
/// `serde_json` is compiled with `preserve_order`.
#[must_use]
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Serialize a value to canonical bytes: sorted keys, pretty, slashes unescaped.
///
/// # Errors
/// Returns error if serialization fails.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = sort_keys(serde_json::to_value(value)?);
    let mut out = Vec::with_capacity(256);
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}
