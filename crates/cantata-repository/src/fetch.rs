//! Upstream metadata fetching.

use crate::client::{HttpClient, HttpResponse};
use crate::error::{RepositoryError, Result};
use crate::options::ProxyOptions;
use cantata_core::{JsonMap, JsonValue};
use futures::{StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Upstream root document path.
pub const ROOT_FILE: &str = "packages.json";

/// Parallel upstream requests per batch.
const DEFAULT_CONCURRENCY: usize = 8;

/// Marker Composer 2 puts on minified v2 metadata.
const MINIFIED_MARKER: &str = "composer/2.0";

/// Value marking a key removed relative to the previous version.
const UNSET: &str = "__unset";

/// Fetches and decodes upstream JSON documents.
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    client: Arc<HttpClient>,
}

impl MetadataFetcher {
    /// Create a fetcher.
    #[must_use]
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    /// Underlying HTTP client.
    #[must_use]
    pub fn client(&self) -> &Arc<HttpClient> {
        &self.client
    }

    /// GET a path relative to the mirror root, returning the raw response.
    ///
    /// # Errors
    /// Returns error on any non-2xx status or network failure.
    pub async fn fetch_raw(&self, options: &ProxyOptions, path: &str) -> Result<HttpResponse> {
        let url = options.resolve(path)?;
        self.client.get(&url, options.credentials_for(&url)).await
    }

    /// GET and decode a JSON document.
    ///
    /// # Errors
    /// Returns error if the fetch fails or the body is not JSON.
    pub async fn fetch_file(&self, options: &ProxyOptions, path: &str) -> Result<JsonValue> {
        let response = self.fetch_raw(options, path).await?;
        cantata_core::from_json_slice(&response.body).map_err(|e| RepositoryError::parse(path, e))
    }

    /// Fetch version lists for several packages.
    ///
    /// Uses the upstream v2 `metadata-url` when available; otherwise reads v1
    /// provider files, filling `%hash%` from `known_providers` listings
    /// (`{name: {"sha256": ..}}`). Packages the upstream does not know are
    /// left out of the result.
    ///
    /// # Errors
    /// Returns the first fetch or parse error other than not-found.
    pub async fn fetch_package_metadata(
        &self,
        names: &[String],
        options: &ProxyOptions,
        include_dev: bool,
        known_providers: &[&JsonMap],
    ) -> Result<BTreeMap<String, Vec<JsonValue>>> {
        let names: BTreeSet<String> = names.iter().map(|n| n.to_lowercase()).collect();

        let results: Vec<(String, Option<Vec<JsonValue>>)> = futures::stream::iter(names)
            .map(|name| async move {
                let versions = self
                    .fetch_one(&name, options, include_dev, known_providers)
                    .await?;
                Ok::<_, RepositoryError>((name, versions))
            })
            .buffer_unordered(DEFAULT_CONCURRENCY)
            .try_collect()
            .await?;

        let found: BTreeMap<String, Vec<JsonValue>> = results
            .into_iter()
            .filter_map(|(name, versions)| versions.map(|v| (name, v)))
            .collect();
        debug!(mirror = options.alias(), packages = found.len(), "fetched package metadata");
        Ok(found)
    }

    async fn fetch_one(
        &self,
        name: &str,
        options: &ProxyOptions,
        include_dev: bool,
        known_providers: &[&JsonMap],
    ) -> Result<Option<Vec<JsonValue>>> {
        let templates = options.templates();
        if let Some(template) = templates.metadata_url.as_deref() {
            let Some(mut versions) = self.fetch_v2(options, template, name, false).await? else {
                return Ok(None);
            };
            if include_dev {
                if let Some(dev) = self.fetch_v2(options, template, name, true).await? {
                    versions.extend(dev);
                }
            }
            return Ok(Some(versions));
        }

        let Some(path) = v1_provider_path(options, name, known_providers) else {
            return Ok(None);
        };
        match self.fetch_file(options, &path).await {
            Ok(doc) => Ok(Some(v1_versions(&doc, name))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Raw v2 metadata document for one package (`~dev` variant when `dev`).
    ///
    /// # Errors
    /// Returns error if the fetch fails.
    pub async fn fetch_v2_raw(
        &self,
        options: &ProxyOptions,
        name: &str,
        dev: bool,
    ) -> Result<Option<HttpResponse>> {
        let Some(template) = options.templates().metadata_url.as_deref() else {
            return Ok(None);
        };
        let path = v2_path(template, name, dev);
        match self.fetch_raw(options, &path).await {
            Ok(response) => Ok(Some(response)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_v2(
        &self,
        options: &ProxyOptions,
        template: &str,
        name: &str,
        dev: bool,
    ) -> Result<Option<Vec<JsonValue>>> {
        let path = v2_path(template, name, dev);
        match self.fetch_file(options, &path).await {
            Ok(doc) => Ok(Some(v2_versions(&doc, name))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Whether a version string names a branch (served from the `~dev` file).
#[must_use]
pub fn is_dev_version(version: &str) -> bool {
    version.starts_with("dev-") || version.ends_with("-dev")
}

/// Fill a v2 metadata template.
#[must_use]
pub fn v2_path(template: &str, name: &str, dev: bool) -> String {
    let package = if dev {
        format!("{name}~dev")
    } else {
        name.to_string()
    };
    template.replace("%package%", &package)
}

/// Upstream path of the v1 provider file for `name`, if one can be addressed.
#[must_use]
pub fn v1_provider_path(
    options: &ProxyOptions,
    name: &str,
    known_providers: &[&JsonMap],
) -> Option<String> {
    let templates = options.templates();
    let root = options.root_providers();
    let hash = known_providers
        .iter()
        .copied()
        .chain(std::iter::once(root))
        .find_map(|listing| listing.get(name)?.get("sha256")?.as_str());

    match (templates.providers_url.as_deref(), hash) {
        (Some(template), Some(hash)) => Some(
            template
                .replace("%package%", name)
                .replace("%hash%", hash),
        ),
        (Some(template), None) if !template.contains("%hash%") => {
            Some(template.replace("%package%", name))
        }
        _ => templates
            .v1_lookup()
            .filter(|t| !t.contains("%hash%"))
            .map(|t| t.replace("%package%", name)),
    }
}

/// Versions of `name` in a v2 document (`{"packages": {name: [..]}}`),
/// expanded if the document is minified.
#[must_use]
pub fn v2_versions(doc: &JsonValue, name: &str) -> Vec<JsonValue> {
    let versions = doc
        .get("packages")
        .and_then(|p| p.get(name))
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();
    if doc.get("minified").and_then(JsonValue::as_str) == Some(MINIFIED_MARKER) {
        expand_minified(versions)
    } else {
        versions
    }
}

/// Versions of `name` in a v1 provider file (`{"packages": {name: {version: meta}}}`).
#[must_use]
pub fn v1_versions(doc: &JsonValue, name: &str) -> Vec<JsonValue> {
    doc.get("packages")
        .and_then(|p| p.get(name))
        .and_then(JsonValue::as_object)
        .map(|versions| versions.values().cloned().collect())
        .unwrap_or_default()
}

/// Undo Composer 2 metadata minification: each entry only lists the keys
/// that differ from the previous one, and `"__unset"` removes a key.
#[must_use]
pub fn expand_minified(versions: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut expanded = Vec::with_capacity(versions.len());
    let mut previous: Option<JsonMap> = None;

    for version in versions {
        let JsonValue::Object(delta) = version else {
            expanded.push(version);
            continue;
        };
        let mut current = previous.take().unwrap_or_default();
        for (key, value) in delta {
            if value.as_str() == Some(UNSET) {
                current.remove(&key);
            } else {
                current.insert(key, value);
            }
        }
        expanded.push(JsonValue::Object(current.clone()));
        previous = Some(current);
    }

    expanded
}
