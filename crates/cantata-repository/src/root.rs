//! Typed Composer repository root document (`packages.json`).

use crate::error::{RepositoryError, Result};
use cantata_core::{JsonMap, JsonValue};
use serde::{Deserialize, Deserializer, Serialize};

/// Root document with every field the proxy reads or rewrites.
///
/// Any field may be absent upstream. Unknown fields are kept in `extra` and
/// passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootDocument {
    /// Inline packages: `{name: {version: meta}}`.
    #[serde(
        default,
        deserialize_with = "map_or_empty_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub packages: Option<JsonMap>,

    /// v1 provider file template with `%package%` and optionally `%hash%`.
    #[serde(
        rename = "providers-url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub providers_url: Option<String>,

    /// Per-package v1 lookup template. A string or `true` means lazy.
    #[serde(
        rename = "providers-lazy-url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub providers_lazy_url: Option<JsonValue>,

    /// Provider listing shards: `{path template: {sha256}}`.
    #[serde(
        rename = "provider-includes",
        default,
        deserialize_with = "map_or_empty_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_includes: Option<JsonMap>,

    /// Inline provider listing: `{name: {sha256}}`.
    #[serde(
        default,
        deserialize_with = "map_or_empty_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub providers: Option<JsonMap>,

    /// v2 metadata template with `%package%`.
    #[serde(
        rename = "metadata-url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_url: Option<String>,

    /// v2 change feed.
    #[serde(
        rename = "metadata-changes-url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_changes_url: Option<String>,

    /// Static include shards: `{path: {sha1}}`.
    #[serde(
        default,
        deserialize_with = "map_or_empty_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub includes: Option<JsonMap>,

    /// Download notification endpoint.
    #[serde(
        rename = "notify-batch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub notify_batch: Option<String>,

    /// Search endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<JsonValue>,

    /// Package list endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<JsonValue>,

    /// Providers API endpoint.
    #[serde(
        rename = "providers-api",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub providers_api: Option<JsonValue>,

    /// Exhaustive list of served package names.
    #[serde(
        rename = "available-packages",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub available_packages: Option<Vec<String>>,

    /// Globs of served package names.
    #[serde(
        rename = "available-package-patterns",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub available_package_patterns: Option<Vec<String>>,

    /// Dist/source mirrors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrors: Option<Vec<JsonValue>>,

    /// Banner shown by clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,

    /// Everything else.
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// PHP encodes an empty object as `[]`; accept both.
fn map_or_empty_list<'de, D>(deserializer: D) -> std::result::Result<Option<JsonMap>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Object(map)) => Ok(Some(map)),
        Some(JsonValue::Array(items)) if items.is_empty() => Ok(Some(JsonMap::new())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected an object, found {other}"
        ))),
    }
}

impl RootDocument {
    /// Parse a root document.
    ///
    /// # Errors
    /// Returns a parse error naming `source` if the body is not a JSON object
    /// of the expected shape.
    pub fn from_slice(bytes: &[u8], source: &str) -> Result<Self> {
        let value: JsonValue =
            cantata_core::from_json_slice(bytes).map_err(|e| RepositoryError::parse(source, e))?;
        Self::from_value(value, source)
    }

    /// Convert a decoded value.
    ///
    /// # Errors
    /// Returns a parse error if the value does not have the expected shape.
    pub fn from_value(value: JsonValue, source: &str) -> Result<Self> {
        if !value.is_object() {
            return Err(RepositoryError::parse(source, "root document is not an object"));
        }
        serde_json::from_value(value).map_err(|e| RepositoryError::parse(source, e))
    }

    /// Whether the upstream asked clients to look providers up lazily.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        match &self.providers_lazy_url {
            Some(JsonValue::String(template)) => !template.is_empty(),
            Some(JsonValue::Bool(flag)) => *flag,
            _ => false,
        }
    }

    /// Provider-include shard matching a served file name.
    ///
    /// `file` is a path relative to the mirror root with the hash filled in
    /// (`p/provider-2024$abc.json`). Returns the upstream path to fetch and the
    /// advertised sha256.
    #[must_use]
    pub fn find_provider_include(&self, file: &str) -> Option<(String, String)> {
        let includes = self.provider_includes.as_ref()?;
        includes.iter().find_map(|(template, meta)| {
            let sha = meta.get("sha256")?.as_str()?;
            let path = template.trim_start_matches('/').replace("%hash%", sha);
            (path == file).then(|| (template.replace("%hash%", sha), sha.to_string()))
        })
    }
}
