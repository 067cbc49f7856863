//! Local package catalog served under the un-prefixed routes.
//!
//! Every document is rendered once at load time, so the advertised hashes
//! always match the served bytes.

use crate::error::{RepositoryError, Result};
use crate::fetch::is_dev_version;
use crate::metadata::JsonMetadata;
use crate::uid::UidSequence;
use crate::urls::LocalUrls;
use cantata_core::{JsonMap, JsonValue};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the provider listing shard, before the hash.
const LISTING_PREFIX: &str = "providers";

/// Precomputed documents for a local set of packages.
#[derive(Debug, Clone)]
pub struct LocalCatalog {
    root: JsonMetadata,
    listing: JsonMetadata,
    providers: BTreeMap<String, JsonMetadata>,
    stable: BTreeMap<String, JsonMetadata>,
    dev: BTreeMap<String, JsonMetadata>,
    versions: BTreeMap<String, Vec<JsonValue>>,
}

impl LocalCatalog {
    /// Load a dump file (`{"packages": {name: {version: meta}}}`).
    ///
    /// # Errors
    /// Returns error if the file cannot be read or has the wrong shape.
    pub fn load(path: &Path, urls: &LocalUrls, uids: &mut UidSequence) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| RepositoryError::io(path, e))?;
        let doc: JsonValue = cantata_core::from_json_slice(&bytes)
            .map_err(|e| RepositoryError::parse(path.display().to_string(), e))?;
        let packages = doc
            .get("packages")
            .and_then(JsonValue::as_object)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::parse(path.display().to_string(), "missing \"packages\" object")
            })?;
        let catalog = Self::from_packages(&packages, urls, uids)?;
        info!(path = %path.display(), packages = catalog.len(), "loaded local catalog");
        Ok(catalog)
    }

    /// Build from `{name: {version: meta}}` or `{name: [meta, ..]}`.
    ///
    /// # Errors
    /// Returns error if a document cannot be encoded.
    pub fn from_packages(packages: &JsonMap, urls: &LocalUrls, uids: &mut UidSequence) -> Result<Self> {
        let mut versions: BTreeMap<String, Vec<JsonValue>> = BTreeMap::new();
        for (name, entries) in packages {
            let list: Vec<JsonValue> = match entries {
                JsonValue::Object(map) => map.values().cloned().collect(),
                JsonValue::Array(list) => list.clone(),
                _ => continue,
            };
            let mut list: Vec<JsonValue> = list
                .into_iter()
                .filter(|meta| meta.get("version").and_then(JsonValue::as_str).is_some())
                .collect();
            for meta in &mut list {
                if let Some(version) = version_of(meta).map(String::from) {
                    uids.stamp_entry(name, &version, meta);
                }
            }
            versions.insert(name.to_lowercase(), list);
        }

        let mut providers = BTreeMap::new();
        let mut stable = BTreeMap::new();
        let mut dev = BTreeMap::new();
        let mut listing = JsonMap::new();

        for (name, list) in &versions {
            let keyed: JsonMap = list
                .iter()
                .filter_map(|meta| Some((version_of(meta)?.to_string(), meta.clone())))
                .collect();
            let provider = JsonMetadata::from_value(&json!({"packages": {name: keyed}}), None)?;
            listing.insert(
                name.clone(),
                json!({"sha256": provider.hash().to_hex()}),
            );
            providers.insert(name.clone(), provider);

            let (dev_list, stable_list): (Vec<&JsonValue>, Vec<&JsonValue>) = list
                .iter()
                .partition(|meta| version_of(meta).is_some_and(is_dev_version));
            stable.insert(
                name.clone(),
                JsonMetadata::from_value(&json!({"packages": {name: stable_list}}), None)?,
            );
            dev.insert(
                name.clone(),
                JsonMetadata::from_value(&json!({"packages": {name: dev_list}}), None)?,
            );
        }

        let listing = JsonMetadata::from_value(&json!({ "providers": listing }), None)?;
        let listing_file = format!("p/{LISTING_PREFIX}${}.json", listing.hash().to_hex());
        let mut root = json!({
            "packages": {},
            "metadata-url": urls.path("/p2/%package%.json"),
            "providers-url": urls.path("/p/%package%$%hash%.json"),
            "provider-includes": {
                listing_file: {"sha256": listing.hash().to_hex()}
            },
            "available-packages": versions.keys().collect::<Vec<_>>(),
        });
        let archivable = versions
            .values()
            .flatten()
            .any(|meta| local_source_path(meta).is_some());
        if archivable && let Some(obj) = root.as_object_mut() {
            obj.insert(
                "mirrors".into(),
                json!([{
                    "dist-url": urls.path("/zipball/%package%/%reference%.%type%"),
                    "preferred": true,
                }]),
            );
        }
        let root = JsonMetadata::from_value(&root, None)?;

        Ok(Self {
            root,
            listing,
            providers,
            stable,
            dev,
            versions,
        })
    }

    /// Number of packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Root document.
    #[must_use]
    pub fn root(&self) -> &JsonMetadata {
        &self.root
    }

    /// Provider listing shard; `hash` must be its current sha256.
    ///
    /// # Errors
    /// Returns not-found on a stale or unknown hash.
    pub fn provider_listing(&self, hash: &str) -> Result<&JsonMetadata> {
        if self.listing.hash().matches_hex(hash) {
            Ok(&self.listing)
        } else {
            Err(RepositoryError::not_found(format!("p/{LISTING_PREFIX}${hash}.json")))
        }
    }

    /// v1 provider file for a package; `hash` must be its current sha256.
    ///
    /// # Errors
    /// Returns not-found for an unknown package or a stale hash.
    pub fn provider(&self, name: &str, hash: &str) -> Result<&JsonMetadata> {
        self.providers
            .get(&name.to_lowercase())
            .filter(|doc| doc.hash().matches_hex(hash))
            .ok_or_else(|| RepositoryError::not_found(format!("p/{name}${hash}.json")))
    }

    /// v2 metadata file (`~dev` variant when `dev`).
    ///
    /// # Errors
    /// Returns not-found for an unknown package.
    pub fn package_metadata(&self, name: &str, dev: bool) -> Result<&JsonMetadata> {
        let docs = if dev { &self.dev } else { &self.stable };
        docs.get(&name.to_lowercase())
            .ok_or_else(|| RepositoryError::not_found(name))
    }

    /// The version of `name` whose source or dist reference is `reference`.
    #[must_use]
    pub fn find_by_reference(&self, name: &str, reference: &str) -> Option<&JsonValue> {
        self.versions.get(&name.to_lowercase())?.iter().find(|meta| {
            ["source", "dist"].iter().any(|key| {
                meta.get(*key)
                    .and_then(|s| s.get("reference"))
                    .and_then(JsonValue::as_str)
                    == Some(reference)
            })
        })
    }
}

/// Filesystem path of a version's source when it is a local checkout.
#[must_use]
pub fn local_source_path(meta: &JsonValue) -> Option<PathBuf> {
    let url = meta.get("source")?.get("url")?.as_str()?;
    if url.contains("://") || url.contains('@') {
        return None;
    }
    Some(PathBuf::from(url.strip_prefix("file:").unwrap_or(url)))
}

fn version_of(meta: &JsonValue) -> Option<&str> {
    meta.get("version").and_then(JsonValue::as_str)
}
