//! Bulk import crawler: walks an upstream repository's whole package graph
//! and indexes every package by its source URL.

use crate::error::{RepositoryError, Result};
use crate::fetch::{MetadataFetcher, ROOT_FILE};
use crate::options::ProxyOptions;
use crate::root::RootDocument;
use cantata_core::{JsonMap, JsonValue, glob_to_regex};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Default cap on discovered packages.
pub const DEFAULT_LIMIT_SIZE: usize = 5000;

/// Keys that mark a document as a modern repository document rather than
/// the legacy flat shape.
const STRUCTURED_KEYS: &[&str] = &[
    "packages",
    "includes",
    "provider-includes",
    "providers",
    "providers-url",
    "providers-lazy-url",
    "metadata-url",
    "available-packages",
];

/// Crawl result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportIndex {
    /// Source URL to package name.
    pub packages: BTreeMap<String, String>,
    /// The crawl stopped at the package cap.
    pub truncated: bool,
}

#[derive(Debug)]
enum Job {
    /// Static include shard (`includes`).
    Include(String),
    /// Provider listing shard (`provider-includes`).
    ProviderListing(String),
    /// v1 provider file for one package.
    Provider { name: String, path: String },
}

#[derive(Debug, Default)]
struct Crawl {
    queue: VecDeque<Job>,
    visited: HashSet<String>,
    names: BTreeSet<String>,
    v2_names: Vec<String>,
    index: ImportIndex,
}

/// Crawls an upstream Composer repository for bulk import.
#[derive(Debug, Clone)]
pub struct ImportComposerRepository {
    fetcher: MetadataFetcher,
    options: ProxyOptions,
    filter: Option<Regex>,
    limit_size: usize,
}

impl ImportComposerRepository {
    /// Create a crawler for the repository described by `options`.
    #[must_use]
    pub fn new(fetcher: MetadataFetcher, options: ProxyOptions) -> Self {
        Self {
            fetcher,
            options,
            filter: None,
            limit_size: DEFAULT_LIMIT_SIZE,
        }
    }

    /// Only import names matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: Option<Regex>) -> Self {
        self.filter = filter;
        self
    }

    /// Only import names matching a glob such as `acme/*`.
    ///
    /// # Errors
    /// Returns error if the glob does not translate to a valid regex.
    pub fn with_glob_filter(self, glob: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(glob)).map_err(|e| RepositoryError::InvalidConfig {
            message: format!("invalid filter '{glob}': {e}"),
        })?;
        Ok(self.with_filter(Some(regex)))
    }

    /// Cap the number of packages discovered.
    #[must_use]
    pub fn with_limit(mut self, limit_size: usize) -> Self {
        self.limit_size = limit_size;
        self
    }

    fn accepts(&self, name: &str) -> bool {
        self.filter.as_ref().is_none_or(|re| re.is_match(name))
    }

    /// Crawl the repository.
    ///
    /// Handles inline `packages`, the legacy flat shape
    /// (`{name: {"versions": {..}}}`), `includes`, `provider-includes` with
    /// `providers-url`, and `available-packages` with `metadata-url`.
    /// Packages without a `source.url` are skipped.
    ///
    /// # Errors
    /// Returns error if the root document or a referenced file cannot be
    /// fetched or parsed.
    pub async fn get_packages(&self) -> Result<ImportIndex> {
        let root_value = self.fetcher.fetch_file(&self.options, ROOT_FILE).await?;
        let root = RootDocument::from_value(root_value.clone(), ROOT_FILE)?;
        let options = self.options.with_root(&root);
        let mut crawl = Crawl::default();

        self.load_document(&mut crawl, &root_value, &root);

        while let Some(job) = crawl.queue.pop_front() {
            match job {
                Job::Include(path) => {
                    let doc = self.fetcher.fetch_file(&options, &path).await?;
                    self.load_document(&mut crawl, &doc, &root);
                }
                Job::ProviderListing(path) => {
                    let doc = self.fetcher.fetch_file(&options, &path).await?;
                    if let Some(providers) = doc.get("providers").and_then(JsonValue::as_object) {
                        self.queue_providers(&mut crawl, providers, &root);
                    }
                }
                Job::Provider { name, path } => {
                    let doc = match self.fetcher.fetch_file(&options, &path).await {
                        Ok(doc) => doc,
                        Err(e) if e.is_not_found() => {
                            debug!(package = %name, "provider file missing upstream");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    if let Some(packages) = doc.get("packages").and_then(JsonValue::as_object) {
                        self.load_packages(&mut crawl, packages);
                    }
                }
            }
        }

        if !crawl.v2_names.is_empty() {
            let found = self
                .fetcher
                .fetch_package_metadata(&crawl.v2_names, &options, false, &[])
                .await?;
            for (name, versions) in &found {
                self.load_versions(&mut crawl.index, name, versions.iter());
            }
        }

        if crawl.index.truncated {
            warn!(
                url = %self.options.url(),
                limit = self.limit_size,
                "import truncated at package limit"
            );
        }
        info!(
            url = %self.options.url(),
            packages = crawl.index.packages.len(),
            truncated = crawl.index.truncated,
            "import crawl finished"
        );
        Ok(crawl.index)
    }

    /// Reserve a slot for a newly discovered name; false when filtered out or
    /// over the cap.
    fn admit(&self, crawl: &mut Crawl, name: &str) -> bool {
        if !self.accepts(name) {
            return false;
        }
        if crawl.names.contains(name) {
            return true;
        }
        if crawl.names.len() >= self.limit_size {
            crawl.index.truncated = true;
            return false;
        }
        crawl.names.insert(name.to_string());
        true
    }

    fn load_document(&self, crawl: &mut Crawl, doc: &JsonValue, root: &RootDocument) {
        let Some(obj) = doc.as_object() else {
            return;
        };

        let structured = STRUCTURED_KEYS.iter().any(|key| obj.contains_key(*key));
        if !structured {
            self.load_legacy(crawl, obj);
            return;
        }

        if let Some(packages) = obj.get("packages").and_then(JsonValue::as_object) {
            self.load_packages(crawl, packages);
        }

        if let Some(includes) = obj.get("includes").and_then(JsonValue::as_object) {
            for path in includes.keys() {
                if crawl.visited.insert(path.clone()) {
                    crawl.queue.push_back(Job::Include(path.clone()));
                }
            }
        }

        if let Some(listings) = obj.get("provider-includes").and_then(JsonValue::as_object) {
            for (template, meta) in listings {
                let hash = meta.get("sha256").and_then(JsonValue::as_str).unwrap_or_default();
                let path = template.replace("%hash%", hash);
                if crawl.visited.insert(path.clone()) {
                    crawl.queue.push_back(Job::ProviderListing(path));
                }
            }
        }

        if let Some(providers) = obj.get("providers").and_then(JsonValue::as_object) {
            self.queue_providers(crawl, providers, root);
        }

        if let (Some(available), Some(_)) = (
            obj.get("available-packages").and_then(JsonValue::as_array),
            root.metadata_url.as_ref(),
        ) {
            for name in available.iter().filter_map(JsonValue::as_str) {
                let name = name.to_lowercase();
                if self.admit(crawl, &name) {
                    crawl.v2_names.push(name);
                }
            }
        }
    }

    /// `{name: {"versions": {version: meta}}}`.
    fn load_legacy(&self, crawl: &mut Crawl, doc: &JsonMap) {
        for (name, entry) in doc {
            let Some(versions) = entry.get("versions").and_then(JsonValue::as_object) else {
                continue;
            };
            if self.admit(crawl, name) {
                self.load_versions(&mut crawl.index, name, versions.values());
            }
        }
    }

    /// `{name: {version: meta}}` or `{name: [meta, ..]}`.
    fn load_packages(&self, crawl: &mut Crawl, packages: &JsonMap) {
        for (name, versions) in packages {
            if !self.admit(crawl, name) {
                continue;
            }
            match versions {
                JsonValue::Object(map) => self.load_versions(&mut crawl.index, name, map.values()),
                JsonValue::Array(list) => self.load_versions(&mut crawl.index, name, list.iter()),
                _ => {}
            }
        }
    }

    fn queue_providers(&self, crawl: &mut Crawl, providers: &JsonMap, root: &RootDocument) {
        let Some(template) = root.providers_url.as_deref() else {
            warn!(url = %self.options.url(), "provider listing without providers-url, skipped");
            return;
        };
        for (name, meta) in providers {
            if !self.admit(crawl, name) {
                continue;
            }
            let hash = meta.get("sha256").and_then(JsonValue::as_str).unwrap_or_default();
            let path = template.replace("%package%", name).replace("%hash%", hash);
            if crawl.visited.insert(path.clone()) {
                crawl.queue.push_back(Job::Provider {
                    name: name.clone(),
                    path,
                });
            }
        }
    }

    fn load_versions<'a>(
        &self,
        index: &mut ImportIndex,
        name: &str,
        versions: impl Iterator<Item = &'a JsonValue>,
    ) {
        for meta in versions {
            let package = meta.get("name").and_then(JsonValue::as_str).unwrap_or(name);
            if !self.accepts(package) {
                continue;
            }
            let Some(url) = meta
                .get("source")
                .and_then(|s| s.get("url"))
                .and_then(JsonValue::as_str)
            else {
                continue;
            };
            index
                .packages
                .entry(url.to_string())
                .or_insert_with(|| package.to_string());
        }
    }
}
