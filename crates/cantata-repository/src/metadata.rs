//! Fetched or generated JSON documents with their content hash.

use crate::error::{RepositoryError, Result};
use crate::options::ProxyOptions;
use bytes::Bytes;
use cantata_core::{ContentHash, JsonValue, to_canonical_json};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};

/// An immutable JSON document.
///
/// The sha256 is computed once from the raw bytes; the parsed value is
/// produced on first access and shared between clones.
#[derive(Clone)]
pub struct JsonMetadata {
    raw: Bytes,
    hash: ContentHash,
    decoded: Arc<OnceLock<std::result::Result<JsonValue, String>>>,
    options: Option<Arc<ProxyOptions>>,
}

impl std::fmt::Debug for JsonMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonMetadata")
            .field("len", &self.raw.len())
            .field("hash", &self.hash)
            .field("mirror", &self.options.as_ref().map(|o| o.alias().to_string()))
            .finish()
    }
}

impl JsonMetadata {
    /// Wrap raw bytes.
    #[must_use]
    pub fn new(raw: Bytes, options: Option<Arc<ProxyOptions>>) -> Self {
        Self {
            hash: ContentHash::from_bytes(&raw),
            raw,
            decoded: Arc::new(OnceLock::new()),
            options,
        }
    }

    /// Encode a value canonically and wrap it.
    ///
    /// # Errors
    /// Returns error if the value cannot be serialized.
    pub fn from_value<T: Serialize>(value: &T, options: Option<Arc<ProxyOptions>>) -> Result<Self> {
        let raw = to_canonical_json(value)?;
        Ok(Self::new(Bytes::from(raw), options))
    }

    /// A new document with different content and the same options.
    #[must_use]
    pub fn with_content(&self, raw: Bytes) -> Self {
        Self::new(raw, self.options.clone())
    }

    /// Raw bytes as served.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// sha256 of the raw bytes.
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Mirror this document belongs to, if any.
    #[must_use]
    pub fn options(&self) -> Option<&Arc<ProxyOptions>> {
        self.options.as_ref()
    }

    /// Whether the document has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Parsed content.
    ///
    /// # Errors
    /// Returns a parse error if the bytes are not valid JSON.
    pub fn decoded(&self) -> Result<&JsonValue> {
        self.decoded
            .get_or_init(|| {
                cantata_core::from_json_slice::<JsonValue>(&self.raw).map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|message| RepositoryError::parse("document", message))
    }

    /// Decode into a typed value.
    ///
    /// # Errors
    /// Returns a parse error if the bytes do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        cantata_core::from_json_slice(&self.raw).map_err(|e| RepositoryError::parse("document", e))
    }
}
