//! Rewrites an upstream root document into this server's URL space.

use crate::error::Result;
use crate::metadata::JsonMetadata;
use crate::options::ProxyOptions;
use crate::root::RootDocument;
use crate::uid::UidSequence;
use crate::urls::LocalUrls;
use cantata_core::{JsonMap, JsonValue};
use serde_json::json;
use std::sync::Arc;

/// Composer metadata API generation requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    /// Composer 1: provider files.
    V1,
    /// Composer 2: metadata files.
    V2,
}

impl ApiVersion {
    /// Infer from a `User-Agent` header (`Composer/1.10.26 (...)`).
    /// Anything that is not Composer 1 is treated as v2.
    #[must_use]
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        match user_agent.and_then(|ua| ua.strip_prefix("Composer/")) {
            Some(rest) if rest.starts_with("1.") => Self::V1,
            _ => Self::V2,
        }
    }

    /// Short label used in cache keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

/// Stateless merger; the only state it touches is the uid sequence passed in.
#[derive(Debug, Clone, Default)]
pub struct RootMetadataMerger {
    urls: LocalUrls,
}

impl RootMetadataMerger {
    /// Create a merger writing the given local URLs.
    #[must_use]
    pub fn new(urls: LocalUrls) -> Self {
        Self { urls }
    }

    /// Merge and encode canonically.
    ///
    /// # Errors
    /// Returns error if the merged document cannot be serialized.
    pub fn merge(
        &self,
        root: &RootDocument,
        options: &Arc<ProxyOptions>,
        api: ApiVersion,
        uids: &mut UidSequence,
    ) -> Result<JsonMetadata> {
        let merged = self.merge_document(root, options, api, uids);
        JsonMetadata::from_value(&merged, Some(Arc::clone(options)))
    }

    /// Apply the rewrite steps in order. The order matters: the v1 switch
    /// runs before the empty-packages check, and lazy mode runs after the
    /// `providers-url` rewrite so it can replace it.
    ///
    /// Rewritten fields are written straight over the upstream copy, so they
    /// win on every key collision.
    #[must_use]
    pub fn merge_document(
        &self,
        root: &RootDocument,
        options: &ProxyOptions,
        api: ApiVersion,
        uids: &mut UidSequence,
    ) -> RootDocument {
        let alias = options.alias();
        let v1_enabled = !options.disable_v1_format();
        let mut api = api;
        let mut doc = root.clone();

        // Endpoints that would expose or bypass the upstream.
        doc.providers_api = None;
        doc.search = None;
        doc.list = None;
        doc.metadata_changes_url = None;

        if !options.parent_notify() {
            doc.notify_batch = None;
        }

        if let Some(info) = options.info() {
            doc.info = Some(info.to_string());
        }

        if options.disable_v2_format() {
            doc.metadata_url = None;
            api = ApiVersion::V1;
        } else {
            doc.metadata_url = Some(self.urls.metadata_url(alias));
        }

        if let Some(includes) = doc.provider_includes.take() {
            doc.provider_includes = Some(
                includes
                    .into_iter()
                    .map(|(path, meta)| (path.trim_start_matches('/').to_string(), meta))
                    .collect(),
            );
        }

        if let Some(upstream) = &doc.providers_url {
            let with_hash = upstream.contains("%hash%");
            doc.providers_url = Some(self.urls.providers_url(alias, with_hash));
        }

        if !options.available_packages().is_empty() {
            doc.available_packages = Some(options.available_packages().iter().cloned().collect());
            doc.available_package_patterns = None;
        } else if !options.available_patterns().is_empty() {
            doc.available_package_patterns = Some(options.available_patterns().patterns().to_vec());
        }

        if !v1_enabled {
            doc.packages = None;
            doc.providers = None;
            doc.provider_includes = None;
            doc.includes = None;
            doc.providers_url = None;
            doc.providers_lazy_url = None;
        }

        if doc.packages.as_ref().is_some_and(JsonMap::is_empty) {
            doc.packages = None;
        }

        if v1_enabled && (options.is_lazy() || root.is_lazy()) {
            doc.provider_includes = None;
            doc.providers_url = None;
            doc.providers_lazy_url = Some(JsonValue::String(self.urls.providers_lazy_url(alias)));
        } else {
            doc.providers_lazy_url = None;
        }

        if options.disable_v2_format() {
            api = ApiVersion::V1;
            doc.metadata_url = None;
        }

        if v1_enabled && api == ApiVersion::V1 {
            if let Some(include) = options.include() {
                let mut includes = JsonMap::new();
                includes.insert(include.path.clone(), json!({ "sha1": include.sha1 }));
                doc.includes = Some(includes);
                doc.providers_url = None;
                doc.providers_lazy_url = None;
                doc.provider_includes = None;
            }
        }

        if options.is_dist_mirror() {
            doc.mirrors = Some(vec![json!({
                "dist-url": self.urls.dist_url(alias),
                "preferred": true,
            })]);
        }

        if let Some(packages) = doc.packages.as_mut() {
            uids.stamp_packages(packages);
        }

        doc
    }
}
