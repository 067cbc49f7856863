//! One mirrored upstream repository.
//!
//! Every document served for a mirror goes through the [`MetadataCache`],
//! partitioned by request host. Upstream change signals (a new root document,
//! change feed entries, a rebuilt include shard) are recorded as timestamps
//! and passed to the cache as last-modified hints, so entries written before
//! the change are recomputed on their next request.

use crate::error::{RepositoryError, Result};
use crate::fetch::{
    MetadataFetcher, ROOT_FILE, is_dev_version, v1_provider_path, v1_versions, v2_versions,
};
use crate::merger::{ApiVersion, RootMetadataMerger};
use crate::metadata::JsonMetadata;
use crate::options::{IncludeFile, ProxyOptions};
use crate::root::RootDocument;
use crate::uid::UidSequence;
use bytes::Bytes;
use cantata_cache::{Freshness, MetadataCache};
use cantata_core::{ContentHash, JsonMap, JsonValue, sha1_hex, to_canonical_json};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Cache key of the raw upstream root document.
const UPSTREAM_ROOT_KEY: &str = "upstream/packages.json";

/// Change feed timestamps are in 1/10000 s.
const CHANGE_FEED_RESOLUTION: u64 = 10_000;

/// Default cap on packages pulled into an include shard.
pub const DEFAULT_MAX_PACKAGES: usize = 5000;

/// Sync bookkeeping for one mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Unix time of the last successful sync.
    pub last_sync: Option<u64>,
    /// Message of the last failure, cleared on success.
    pub last_error: Option<String>,
    /// Consecutive failures.
    pub failures: u32,
    /// Cursor into the upstream change feed.
    pub changes_since: Option<u64>,
}

/// Outcome of one successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Mirror alias.
    pub alias: String,
    /// Upstream root document differs from the previous one.
    pub root_changed: bool,
    /// Packages reported changed by the upstream change feed.
    pub updated_packages: usize,
    /// Packages in the rebuilt include shard.
    pub include_packages: usize,
    /// The include shard hit the package cap.
    pub truncated: bool,
}

#[derive(Debug)]
struct IncludeShard {
    file: IncludeFile,
    body: Bytes,
}

/// A configured mirror and its derived state.
#[derive(Debug)]
pub struct RemoteProxyRepository {
    base: ProxyOptions,
    options: RwLock<Arc<ProxyOptions>>,
    root: RwLock<Option<(ContentHash, Arc<RootDocument>)>>,
    fetcher: MetadataFetcher,
    cache: MetadataCache,
    merger: RootMetadataMerger,
    uids: Mutex<UidSequence>,
    uid_path: Option<PathBuf>,
    uid_writer: tokio::sync::Mutex<()>,
    status: RwLock<SyncStatus>,
    changed: DashMap<String, u64>,
    root_changed_at: AtomicU64,
    include: RwLock<Option<IncludeShard>>,
    max_packages: usize,
}

impl RemoteProxyRepository {
    /// Create a mirror with in-memory uid state.
    #[must_use]
    pub fn new(
        options: ProxyOptions,
        fetcher: MetadataFetcher,
        cache: MetadataCache,
        merger: RootMetadataMerger,
    ) -> Self {
        Self {
            options: RwLock::new(Arc::new(options.clone())),
            base: options,
            root: RwLock::new(None),
            fetcher,
            cache,
            merger,
            uids: Mutex::new(UidSequence::new()),
            uid_path: None,
            uid_writer: tokio::sync::Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
            changed: DashMap::new(),
            root_changed_at: AtomicU64::new(0),
            include: RwLock::new(None),
            max_packages: DEFAULT_MAX_PACKAGES,
        }
    }

    /// Persist uids under `state_dir/uids/<alias>.json`, loading any
    /// existing assignments.
    ///
    /// # Errors
    /// Returns error if an existing uid file cannot be read.
    pub fn with_state_dir(mut self, state_dir: &Path) -> Result<Self> {
        let path = state_dir
            .join("uids")
            .join(format!("{}.json", self.base.alias()));
        self.uids = Mutex::new(UidSequence::load(&path)?);
        self.uid_path = Some(path);
        Ok(self)
    }

    /// Cap the number of packages pulled into an include shard.
    #[must_use]
    pub fn with_max_packages(mut self, max_packages: usize) -> Self {
        self.max_packages = max_packages;
        self
    }

    /// Fetcher shared with the other mirrors.
    #[must_use]
    pub fn fetcher(&self) -> &MetadataFetcher {
        &self.fetcher
    }

    /// Mirror alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        self.base.alias()
    }

    /// Current options, including values derived from the upstream root.
    #[must_use]
    pub fn options(&self) -> Arc<ProxyOptions> {
        Arc::clone(&self.options.read())
    }

    /// Sync bookkeeping.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    /// Unix time of the last upstream change this mirror knows about.
    #[must_use]
    pub fn root_changed_at(&self) -> u64 {
        self.root_changed_at.load(Ordering::Relaxed)
    }

    /// Re-derive options from configuration and the last root document,
    /// dropping anything computed since.
    pub fn reset_options(&self) {
        let include = self.include.read().as_ref().map(|s| s.file.clone());
        let root = self.root.read().as_ref().map(|(_, root)| Arc::clone(root));
        let options = match root {
            Some(root) => self.base.with_root(&root),
            None => self.base.clone(),
        };
        *self.options.write() = Arc::new(options.with_include(include));
    }

    /// Whether the package is served by this mirror.
    #[must_use]
    pub fn serves(&self, name: &str) -> bool {
        self.options().is_package_allowed(name)
    }

    fn cache_key(&self, rest: &str) -> String {
        format!("{}/{rest}", self.alias())
    }

    fn mark_changed(&self) {
        self.root_changed_at
            .fetch_max(self.cache.now(), Ordering::Relaxed);
    }

    fn package_hint(&self, name: &str) -> u64 {
        let changed = self.changed.get(name).map_or(0, |t| *t);
        changed.max(self.root_changed_at())
    }

    /// Record a root document; returns whether it differs from the last one.
    fn apply_root(&self, hash: ContentHash, root: RootDocument) -> bool {
        let mut current = self.root.write();
        if current.as_ref().is_some_and(|(h, _)| *h == hash) {
            return false;
        }
        let include = self.include.read().as_ref().map(|s| s.file.clone());
        *self.options.write() = Arc::new(self.base.with_root(&root).with_include(include));
        let first = current.is_none();
        *current = Some((hash, Arc::new(root)));
        drop(current);
        if !first {
            self.mark_changed();
        }
        true
    }

    /// Upstream root document as seen from `host`, served from cache while
    /// fresh. When upstream is unreachable the last cached copy is used.
    ///
    /// # Errors
    /// Returns error if nothing usable is cached and the fetch fails.
    pub async fn upstream_root(&self, host: &str) -> Result<Arc<RootDocument>> {
        let key = self.cache_key(UPSTREAM_ROOT_KEY);
        let options = self.options();
        let fetched = self
            .cache
            .get(
                &key,
                host,
                Freshness::last_modified(self.root_changed_at()),
                || async {
                    let response = self.fetcher.fetch_raw(&options, ROOT_FILE).await?;
                    RootDocument::from_slice(&response.body, options.url().as_str())?;
                    Ok::<_, RepositoryError>(response.body)
                },
            )
            .await;

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => match self.cache.peek(&key, host) {
                Some(stale) if !e.is_not_found() => {
                    warn!(mirror = self.alias(), error = %e, "upstream root unavailable, serving stale copy");
                    stale.content
                }
                _ => return Err(e),
            },
        };

        let root = RootDocument::from_slice(&raw, options.url().as_str())?;
        self.apply_root(ContentHash::from_bytes(&raw), root);
        self.root
            .read()
            .as_ref()
            .map(|(_, root)| Arc::clone(root))
            .ok_or_else(|| RepositoryError::not_found(ROOT_FILE))
    }

    async fn ensure_root(&self, host: &str) -> Result<()> {
        if self.root.read().is_none() {
            self.upstream_root(host).await?;
        }
        Ok(())
    }

    /// The mirror's root document, rewritten into local URL space.
    ///
    /// # Errors
    /// Returns error if the upstream root cannot be obtained.
    pub async fn root_metadata(&self, host: &str, api: ApiVersion) -> Result<JsonMetadata> {
        let upstream = self.upstream_root(host).await?;
        let options = self.options();
        let key = self.cache_key(&format!("packages.json@{}", api.as_str()));

        let raw = self
            .cache
            .get(
                &key,
                host,
                Freshness::last_modified(self.root_changed_at()),
                || async {
                    let merged = {
                        let mut uids = self.uids.lock();
                        self.merger.merge(&upstream, &options, api, &mut uids)?
                    };
                    self.persist_uids().await;
                    Ok::<_, RepositoryError>(merged.raw().clone())
                },
            )
            .await?;

        Ok(JsonMetadata::new(raw, Some(options)))
    }

    /// Write pending uid assignments to disk on the blocking pool.
    ///
    /// Writes are serialized, and each one snapshots the sequence after
    /// taking the writer lock, so the newest state always lands last.
    async fn persist_uids(&self) {
        let Some(path) = self.uid_path.clone() else {
            return;
        };
        let _writer = self.uid_writer.lock().await;
        let Some(mut snapshot) = self.uids.lock().take_changes() else {
            return;
        };
        let target = path.clone();
        let saved = tokio::task::spawn_blocking(move || snapshot.save(&target))
            .await
            .map_err(|e| RepositoryError::io(&path, e))
            .and_then(|result| result);
        if let Err(e) = saved {
            self.uids.lock().mark_dirty();
            warn!(mirror = self.alias(), error = %e, "failed to persist uids");
        }
    }

    /// v2 metadata file for one package (`~dev` variant when `dev`).
    ///
    /// Upstream v2 files are passed through byte for byte; an upstream
    /// without v2 support gets one synthesized from its v1 provider files.
    ///
    /// # Errors
    /// Returns not-found if the package is not served or unknown upstream.
    pub async fn package_metadata(&self, host: &str, name: &str, dev: bool) -> Result<JsonMetadata> {
        let name = name.to_lowercase();
        let file = if dev {
            format!("p2/{name}~dev.json")
        } else {
            format!("p2/{name}.json")
        };
        if self.base.disable_v2_format() || !self.serves(&name) {
            return Err(RepositoryError::not_found(file));
        }
        self.ensure_root(host).await?;
        let options = self.options();

        let raw = self
            .cache
            .get(
                &self.cache_key(&file),
                host,
                Freshness::last_modified(self.package_hint(&name)),
                || async {
                    if options.templates().metadata_url.is_some() {
                        let response = self
                            .fetcher
                            .fetch_v2_raw(&options, &name, dev)
                            .await?
                            .ok_or_else(|| RepositoryError::not_found(file.clone()))?;
                        cantata_core::from_json_slice::<JsonValue>(&response.body)
                            .map_err(|e| RepositoryError::parse(&file, e))?;
                        return Ok(response.body);
                    }
                    self.synthesize_v2(&options, &name, dev).await
                },
            )
            .await?;

        Ok(JsonMetadata::new(raw, Some(options)))
    }

    async fn synthesize_v2(&self, options: &ProxyOptions, name: &str, dev: bool) -> Result<Bytes> {
        let mut found = self
            .fetcher
            .fetch_package_metadata(&[name.to_string()], options, true, &[])
            .await?;
        let versions: Vec<JsonValue> = found
            .remove(name)
            .unwrap_or_default()
            .into_iter()
            .filter(|v| {
                let version = v.get("version").and_then(JsonValue::as_str).unwrap_or("");
                is_dev_version(version) == dev
            })
            .collect();
        if versions.is_empty() {
            return Err(RepositoryError::not_found(name));
        }
        debug!(mirror = self.alias(), package = name, "synthesized v2 metadata from v1");
        Ok(Bytes::from(to_canonical_json(&json!({
            "packages": { name: versions }
        }))?))
    }

    /// v1 provider file for one package.
    ///
    /// With `hash`, the file is content addressed: the body served must hash
    /// to it, or the request fails.
    ///
    /// # Errors
    /// Returns not-found if the package is not served, unknown upstream, or
    /// the hash does not match.
    pub async fn provider(&self, host: &str, name: &str, hash: Option<&str>) -> Result<JsonMetadata> {
        let name = name.to_lowercase();
        let file = match hash {
            Some(hash) => format!("p/{name}${hash}.json"),
            None => format!("p/{name}.json"),
        };
        if self.base.disable_v1_format() || !self.serves(&name) {
            return Err(RepositoryError::not_found(file));
        }
        self.ensure_root(host).await?;
        let options = self.options();
        let freshness = match hash {
            Some(_) => Freshness::default(),
            None => Freshness::last_modified(self.package_hint(&name)),
        };

        let raw = self
            .cache
            .get(&self.cache_key(&file), host, freshness, || async {
                match self.upstream_provider_path(&options, &name, hash) {
                    Some(path) => self.fetch_verified(&options, &path, hash, &file).await,
                    None => {
                        let body = self.synthesize_v1(&options, &name).await?;
                        match hash {
                            Some(expected) if !ContentHash::from_bytes(&body).matches_hex(expected) => {
                                Err(RepositoryError::not_found(file.clone()))
                            }
                            _ => Ok(body),
                        }
                    }
                }
            })
            .await?;

        Ok(JsonMetadata::new(raw, Some(options)))
    }

    fn upstream_provider_path(
        &self,
        options: &ProxyOptions,
        name: &str,
        hash: Option<&str>,
    ) -> Option<String> {
        let templates = options.templates();
        if let (Some(template), Some(hash)) = (templates.providers_url.as_deref(), hash) {
            if template.contains("%hash%") {
                return Some(template.replace("%package%", name).replace("%hash%", hash));
            }
        }
        v1_provider_path(options, name, &[])
    }

    /// Fetch a raw file, checking its sha256 against `expected` when given.
    /// A mismatch is retried once before failing.
    async fn fetch_verified(
        &self,
        options: &ProxyOptions,
        path: &str,
        expected: Option<&str>,
        name: &str,
    ) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            let body = self.fetcher.fetch_raw(options, path).await?.body;
            let Some(expected) = expected else {
                cantata_core::from_json_slice::<JsonValue>(&body)
                    .map_err(|e| RepositoryError::parse(path, e))?;
                return Ok(body);
            };
            let actual = ContentHash::from_bytes(&body);
            if actual.matches_hex(expected) {
                return Ok(body);
            }
            attempt += 1;
            warn!(mirror = self.alias(), file = name, expected, actual = %actual.to_hex(), attempt, "upstream hash mismatch");
            if attempt >= 2 {
                return Err(RepositoryError::HashMismatch {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_hex(),
                });
            }
        }
    }

    async fn synthesize_v1(&self, options: &ProxyOptions, name: &str) -> Result<Bytes> {
        let mut found = self
            .fetcher
            .fetch_package_metadata(&[name.to_string()], options, true, &[])
            .await?;
        let versions = found.remove(name).unwrap_or_default();
        if versions.is_empty() {
            return Err(RepositoryError::not_found(name));
        }
        let packages = self.v1_package_map(name, versions);
        self.persist_uids().await;
        Ok(Bytes::from(to_canonical_json(&json!({
            "packages": { name: packages }
        }))?))
    }

    /// Key versions by version string and stamp uids.
    fn v1_package_map(&self, name: &str, versions: Vec<JsonValue>) -> JsonMap {
        let mut uids = self.uids.lock();
        let mut map = JsonMap::new();
        for mut meta in versions {
            let Some(version) = meta.get("version").and_then(JsonValue::as_str).map(String::from)
            else {
                continue;
            };
            uids.stamp_entry(name, &version, &mut meta);
            map.insert(version, meta);
        }
        map
    }

    /// A shard file addressed by path relative to the mirror root:
    /// upstream `provider-includes` (sha256), upstream `includes` (sha1) or
    /// the include shard built by sync.
    ///
    /// # Errors
    /// Returns not-found if no shard matches the file name.
    pub async fn shard(&self, host: &str, file: &str) -> Result<JsonMetadata> {
        if let Some(shard) = self.include.read().as_ref() {
            if shard.file.path == file {
                return Ok(JsonMetadata::new(shard.body.clone(), Some(self.options())));
            }
        }

        let root = self.upstream_root(host).await?;
        let options = self.options();

        if let Some((path, sha256)) = root.find_provider_include(file) {
            if self.base.disable_v1_format() {
                return Err(RepositoryError::not_found(file));
            }
            let raw = self
                .cache
                .get(&self.cache_key(file), host, Freshness::default(), || {
                    self.fetch_verified(&options, &path, Some(&sha256), file)
                })
                .await?;
            return Ok(JsonMetadata::new(raw, Some(options)));
        }

        let sha1 = root
            .includes
            .as_ref()
            .and_then(|includes| includes.get(file))
            .and_then(|meta| meta.get("sha1"))
            .and_then(JsonValue::as_str)
            .map(String::from)
            .ok_or_else(|| RepositoryError::not_found(file))?;

        let raw = self
            .cache
            .get(&self.cache_key(file), host, Freshness::default(), || async {
                let body = self.fetcher.fetch_raw(&options, file).await?.body;
                let actual = sha1_hex(&body);
                if actual == sha1 {
                    Ok(body)
                } else {
                    Err(RepositoryError::HashMismatch {
                        name: file.to_string(),
                        expected: sha1.clone(),
                        actual,
                    })
                }
            })
            .await?;
        Ok(JsonMetadata::new(raw, Some(options)))
    }

    /// Versions of a package as a flat list, from the v2 file when served or
    /// the v1 provider file otherwise.
    ///
    /// # Errors
    /// Returns not-found if the package is unknown.
    pub async fn versions(&self, host: &str, name: &str) -> Result<Vec<JsonValue>> {
        let name = name.to_lowercase();
        let name = name.as_str();
        if !self.base.disable_v2_format() {
            let mut versions = Vec::new();
            for dev in [false, true] {
                match self.package_metadata(host, name, dev).await {
                    Ok(doc) => versions.extend(v2_versions(doc.decoded()?, name)),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            if versions.is_empty() {
                return Err(RepositoryError::not_found(name));
            }
            return Ok(versions);
        }
        let doc = self.provider(host, name, None).await?;
        Ok(v1_versions(doc.decoded()?, name))
    }

    /// Forget cached root documents for `host` and mark everything stale.
    pub fn invalidate(&self, host: &str) {
        self.cache.delete(&self.cache_key(UPSTREAM_ROOT_KEY), host);
        for api in [ApiVersion::V1, ApiVersion::V2] {
            self.cache
                .delete(&self.cache_key(&format!("packages.json@{}", api.as_str())), host);
        }
        self.mark_changed();
        info!(mirror = self.alias(), host, "cache invalidated");
    }

    /// Refresh from upstream, bypassing the cache.
    ///
    /// # Errors
    /// Returns error if the root document or the change feed cannot be
    /// fetched; the failure is also recorded in [`Self::status`].
    pub async fn sync(&self) -> Result<SyncReport> {
        match self.run_sync().await {
            Ok(report) => {
                let mut status = self.status.write();
                status.last_sync = Some(self.cache.now());
                status.last_error = None;
                status.failures = 0;
                Ok(report)
            }
            Err(e) => {
                let mut status = self.status.write();
                status.last_error = Some(e.to_string());
                status.failures += 1;
                Err(e)
            }
        }
    }

    async fn run_sync(&self) -> Result<SyncReport> {
        let response = self.fetcher.fetch_raw(&self.base, ROOT_FILE).await?;
        let root = RootDocument::from_slice(&response.body, self.base.url().as_str())?;
        let root_changed = self.apply_root(ContentHash::from_bytes(&response.body), root);
        let options = self.options();

        let mut report = SyncReport {
            alias: self.alias().to_string(),
            root_changed,
            ..SyncReport::default()
        };

        if options.v2_sync_api() {
            report.updated_packages = self.sync_changes(&options).await?;
        }

        if !options.is_lazy() && !options.disable_v1_format() {
            let (count, truncated) = self.rebuild_include(&options).await?;
            report.include_packages = count;
            report.truncated = truncated;
        }

        info!(
            mirror = self.alias(),
            root_changed = report.root_changed,
            updated = report.updated_packages,
            include = report.include_packages,
            "mirror synced"
        );
        Ok(report)
    }

    /// Walk the upstream change feed from the stored cursor.
    async fn sync_changes(&self, options: &ProxyOptions) -> Result<usize> {
        let Some(template) = options.templates().metadata_changes_url.clone() else {
            return Ok(0);
        };
        let now = self.cache.now();
        let cursor = self.status.read().changes_since;
        let Some(since) = cursor else {
            self.status.write().changes_since = Some(now * CHANGE_FEED_RESOLUTION);
            return Ok(0);
        };

        let separator = if template.contains('?') { '&' } else { '?' };
        let doc = self
            .fetcher
            .fetch_file(options, &format!("{template}{separator}since={since}"))
            .await?;

        let mut updated = 0;
        for action in doc
            .get("actions")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            match action.get("type").and_then(JsonValue::as_str) {
                Some("update" | "delete") => {
                    if let Some(package) = action.get("package").and_then(JsonValue::as_str) {
                        let name = package.trim_end_matches("~dev").to_lowercase();
                        self.changed.insert(name, now);
                        updated += 1;
                    }
                }
                Some("resync") => {
                    info!(mirror = self.alias(), "upstream requested full resync");
                    self.changed.clear();
                    self.mark_changed();
                }
                _ => {}
            }
        }

        if let Some(timestamp) = doc.get("timestamp").and_then(JsonValue::as_u64) {
            self.status.write().changes_since = Some(timestamp);
        }
        Ok(updated)
    }

    /// Build the static include shard for eager v1 clients.
    async fn rebuild_include(&self, options: &ProxyOptions) -> Result<(usize, bool)> {
        let mut listings: Vec<JsonMap> = Vec::new();
        let mut names: Vec<String> = options.available_packages().iter().cloned().collect();

        if names.is_empty() {
            names.extend(options.root_providers().keys().cloned());
            let root = self.root.read().as_ref().map(|(_, root)| Arc::clone(root));
            if let Some(root) = root {
                for (path, sha256) in provider_include_paths(&root) {
                    if names.len() >= self.max_packages {
                        break;
                    }
                    let body = self
                        .fetch_verified(options, &path, Some(&sha256), &path)
                        .await?;
                    let doc: JsonValue = cantata_core::from_json_slice(&body)
                        .map_err(|e| RepositoryError::parse(&path, e))?;
                    if let Some(JsonValue::Object(providers)) = doc.get("providers") {
                        names.extend(providers.keys().cloned());
                        listings.push(providers.clone());
                    }
                }
                if let Some(packages) = &root.packages {
                    names.extend(packages.keys().cloned());
                }
            }
        }

        names.retain(|name| options.is_package_allowed(name));
        names.sort();
        names.dedup();
        let truncated = names.len() > self.max_packages;
        if truncated {
            warn!(
                mirror = self.alias(),
                total = names.len(),
                limit = self.max_packages,
                "include shard truncated"
            );
            names.truncate(self.max_packages);
        }

        let listing_refs: Vec<&JsonMap> = listings.iter().collect();
        let found = self
            .fetcher
            .fetch_package_metadata(&names, options, true, &listing_refs)
            .await?;

        let mut packages = BTreeMap::new();
        for (name, versions) in found {
            let map = self.v1_package_map(&name, versions);
            if !map.is_empty() {
                packages.insert(name, JsonValue::Object(map));
            }
        }
        self.persist_uids().await;
        let count = packages.len();
        let body = Bytes::from(to_canonical_json(&json!({ "packages": packages }))?);
        let sha1 = sha1_hex(&body);

        let unchanged = self
            .include
            .read()
            .as_ref()
            .is_some_and(|shard| shard.file.sha1 == sha1);
        if !unchanged {
            let file = IncludeFile {
                path: format!("include/all${sha1}.json"),
                sha1,
            };
            *self.options.write() = Arc::new(options.with_include(Some(file.clone())));
            *self.include.write() = Some(IncludeShard { file, body });
            self.mark_changed();
        }
        Ok((count, truncated))
    }
}

/// Upstream paths and hashes of every provider-include shard.
fn provider_include_paths(root: &RootDocument) -> Vec<(String, String)> {
    root.provider_includes
        .iter()
        .flatten()
        .filter_map(|(template, meta)| {
            let sha = meta.get("sha256")?.as_str()?;
            Some((template.replace("%hash%", sha), sha.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HttpClient, HttpClientConfig};
    use crate::urls::LocalUrls;
    use cantata_cache::{Clock, MemoryStore};
    use cantata_config::MirrorConfig;
    use cantata_core::NetworkSwitch;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn repository(
        url: &str,
        configure: impl FnOnce(&mut MirrorConfig),
    ) -> (RemoteProxyRepository, Arc<ManualClock>) {
        let mut config = MirrorConfig {
            url: url.to_string(),
            ..MirrorConfig::default()
        };
        configure(&mut config);
        let options = ProxyOptions::from_config("up", &config).unwrap();
        let clock = Arc::new(ManualClock(AtomicU64::new(1_000_000)));
        let cache = MetadataCache::with_clock(
            Arc::new(MemoryStore::new(1024 * 1024)),
            clock.clone(),
            1800,
        );
        let client = HttpClient::new(HttpClientConfig::default(), NetworkSwitch::new()).unwrap();
        let repo = RemoteProxyRepository::new(
            options,
            MetadataFetcher::new(Arc::new(client)),
            cache,
            RootMetadataMerger::new(LocalUrls::default()),
        );
        (repo, clock)
    }

    async fn mount(server: &MockServer, at: &str, body: JsonValue, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_json(body));
        match times {
            Some(n) => mock.expect(n).mount(server).await,
            None => mock.mount(server).await,
        }
    }

    #[tokio::test]
    async fn root_is_rewritten_and_cached() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/packages.json",
            json!({
                "packages": [],
                "metadata-url": "/p2/%package%.json",
                "search": "/search.json?q=%query%"
            }),
            Some(1),
        )
        .await;

        let (repo, _) = repository(&server.uri(), |_| {});
        let first = repo.root_metadata("a.test", ApiVersion::V2).await.unwrap();
        let second = repo.root_metadata("a.test", ApiVersion::V2).await.unwrap();
        assert_eq!(first.raw(), second.raw());
        let doc = first.decoded().unwrap();
        assert_eq!(doc["metadata-url"], json!("/mirror/up/p2/%package%.json"));
        assert!(doc.get("search").is_none());
        assert!(repo.options().has_v2_api());
    }

    #[tokio::test]
    async fn uids_survive_a_restart() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/packages.json",
            json!({"packages": {"acme/foo": {"1.0.0": {"name": "acme/foo", "version": "1.0.0"}}}}),
            None,
        )
        .await;
        let state = tempfile::tempdir().unwrap();
        let uid_of = |doc: &JsonValue| doc["packages"]["acme/foo"]["1.0.0"]["uid"].clone();

        let (repo, _) = repository(&server.uri(), |_| {});
        let repo = repo.with_state_dir(state.path()).unwrap();
        let first = repo.root_metadata("a.test", ApiVersion::V1).await.unwrap();
        let uid = uid_of(first.decoded().unwrap());
        assert!(uid.is_u64());
        assert!(state.path().join("uids/up.json").is_file());

        let (restarted, _) = repository(&server.uri(), |_| {});
        let restarted = restarted.with_state_dir(state.path()).unwrap();
        let again = restarted.root_metadata("a.test", ApiVersion::V1).await.unwrap();
        assert_eq!(uid_of(again.decoded().unwrap()), uid);
    }

    #[tokio::test]
    async fn stale_root_served_when_upstream_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"metadata-url": "/p2/%package%.json"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (repo, clock) = repository(&server.uri(), |_| {});
        repo.root_metadata("a.test", ApiVersion::V2).await.unwrap();
        clock.advance(3600);
        let root = repo.upstream_root("a.test").await.unwrap();
        assert_eq!(root.metadata_url.as_deref(), Some("/p2/%package%.json"));
    }

    #[tokio::test]
    async fn malformed_upstream_root_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let (repo, _) = repository(&server.uri(), |_| {});
        let err = repo.root_metadata("a.test", ApiVersion::V2).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn p2_passthrough_respects_allowlist() {
        let server = MockServer::start().await;
        mount(&server, "/packages.json", json!({"metadata-url": "/p2/%package%.json"}), None).await;
        let body = json!({"packages": {"acme/foo": [{"name": "acme/foo", "version": "1.0.0"}]}});
        mount(&server, "/p2/acme/foo.json", body.clone(), Some(1)).await;

        let (repo, _) = repository(&server.uri(), |c| {
            c.available_package_patterns = vec!["acme/*".into()];
        });
        let doc = repo.package_metadata("a.test", "acme/foo", false).await.unwrap();
        assert_eq!(doc.decoded().unwrap(), &body);
        // Cached for the same host.
        repo.package_metadata("a.test", "acme/foo", false).await.unwrap();

        let err = repo.package_metadata("a.test", "other/bar", false).await.unwrap_err();
        assert!(err.is_not_found());
        let err = repo.package_metadata("a.test", "acme/missing", false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn provider_file_verified_against_hash() {
        let server = MockServer::start().await;
        let provider = json!({"packages": {"acme/foo": {"1.0.0": {"name": "acme/foo", "version": "1.0.0"}}}});
        let provider_bytes = serde_json::to_vec(&provider).unwrap();
        let hash = ContentHash::from_bytes(&provider_bytes).to_hex();
        mount(&server, "/packages.json", json!({"providers-url": "/p/%package%$%hash%.json"}), None).await;
        Mock::given(method("GET"))
            .and(path(format!("/p/acme/foo${hash}.json")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(provider_bytes.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/acme/foo$0000.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(provider_bytes.clone()))
            .expect(2)
            .mount(&server)
            .await;

        let (repo, _) = repository(&server.uri(), |_| {});
        let doc = repo.provider("a.test", "acme/foo", Some(&hash)).await.unwrap();
        assert_eq!(doc.hash().to_hex(), hash);

        let err = repo.provider("a.test", "acme/foo", Some("0000")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn provider_synthesized_from_v2() {
        let server = MockServer::start().await;
        mount(&server, "/packages.json", json!({"metadata-url": "/p2/%package%.json"}), None).await;
        mount(
            &server,
            "/p2/acme/foo.json",
            json!({"packages": {"acme/foo": [{"name": "acme/foo", "version": "1.0.0"}]}}),
            None,
        )
        .await;

        let (repo, _) = repository(&server.uri(), |c| c.lazy = true);
        let doc = repo.provider("a.test", "acme/foo", None).await.unwrap();
        let entry = &doc.decoded().unwrap()["packages"]["acme/foo"]["1.0.0"];
        assert_eq!(entry["version"], json!("1.0.0"));
        let uid = entry["uid"].clone();
        assert!(uid.is_u64());

        // A different host computes its own copy with the same uid.
        let other = repo.provider("b.test", "acme/foo", None).await.unwrap();
        assert_eq!(other.decoded().unwrap()["packages"]["acme/foo"]["1.0.0"]["uid"], uid);
    }

    #[tokio::test]
    async fn provider_include_shard_served_verbatim() {
        let server = MockServer::start().await;
        let shard = br#"{"providers":{"acme/foo":{"sha256":"abc"}}}"#.to_vec();
        let sha = ContentHash::from_bytes(&shard).to_hex();
        mount(
            &server,
            "/packages.json",
            json!({
                "providers-url": "/p/%package%$%hash%.json",
                "provider-includes": {"p/provider-all$%hash%.json": {"sha256": sha}}
            }),
            None,
        )
        .await;
        Mock::given(method("GET"))
            .and(path(format!("/p/provider-all${sha}.json")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(shard.clone()))
            .mount(&server)
            .await;

        let (repo, _) = repository(&server.uri(), |_| {});
        let doc = repo.shard("a.test", &format!("p/provider-all${sha}.json")).await.unwrap();
        assert_eq!(doc.raw().as_ref(), shard.as_slice());
        assert!(repo.shard("a.test", "p/provider-all$beef.json").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn eager_sync_builds_include_shard() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/packages.json",
            json!({
                "providers-url": "/p/%package%$%hash%.json",
                "providers": {"acme/foo": {"sha256": "f00"}, "other/bar": {"sha256": "ba7"}}
            }),
            None,
        )
        .await;
        mount(
            &server,
            "/p/acme/foo$f00.json",
            json!({"packages": {"acme/foo": {"1.0.0": {"name": "acme/foo", "version": "1.0.0"}}}}),
            None,
        )
        .await;

        let (repo, _) = repository(&server.uri(), |c| {
            c.available_package_patterns = vec!["acme/*".into()];
        });
        let report = repo.sync().await.unwrap();
        assert!(report.root_changed);
        assert_eq!(report.include_packages, 1);
        assert!(repo.status().last_sync.is_some());

        let include = repo.options().include().cloned().unwrap();
        let root = repo.root_metadata("a.test", ApiVersion::V1).await.unwrap();
        let doc = root.decoded().unwrap();
        assert_eq!(doc["includes"][&include.path]["sha1"], json!(include.sha1));

        let shard = repo.shard("a.test", &include.path).await.unwrap();
        assert_eq!(sha1_hex(shard.raw()), include.sha1);
        let shard_doc = shard.decoded().unwrap();
        assert!(shard_doc["packages"]["acme/foo"]["1.0.0"]["uid"].is_u64());
        assert!(shard_doc["packages"].get("other/bar").is_none());
    }

    #[tokio::test]
    async fn change_feed_invalidates_package() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/packages.json",
            json!({
                "metadata-url": "/p2/%package%.json",
                "metadata-changes-url": "/metadata/changes.json"
            }),
            None,
        )
        .await;
        mount(
            &server,
            "/p2/acme/foo.json",
            json!({"packages": {"acme/foo": [{"name": "acme/foo", "version": "1.0.0"}]}}),
            Some(2),
        )
        .await;

        let (repo, clock) = repository(&server.uri(), |c| c.lazy = true);
        repo.sync().await.unwrap();
        let since = repo.status().changes_since.unwrap();
        assert_eq!(since, 1_000_000 * CHANGE_FEED_RESOLUTION);

        Mock::given(method("GET"))
            .and(path("/metadata/changes.json"))
            .and(query_param("since", since.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "actions": [{"type": "update", "package": "acme/foo", "time": 1}],
                "timestamp": since + 50
            })))
            .mount(&server)
            .await;

        repo.package_metadata("a.test", "acme/foo", false).await.unwrap();
        clock.advance(10);
        let report = repo.sync().await.unwrap();
        assert_eq!(report.updated_packages, 1);
        assert_eq!(repo.status().changes_since, Some(since + 50));
        // Entry predates the change: fetched again.
        repo.package_metadata("a.test", "acme/foo", false).await.unwrap();
    }

    #[tokio::test]
    async fn sync_failure_is_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (repo, _) = repository(&server.uri(), |_| {});
        assert!(repo.sync().await.is_err());
        assert!(repo.sync().await.is_err());
        let status = repo.status();
        assert_eq!(status.failures, 2);
        assert!(status.last_error.is_some());
        assert!(status.last_sync.is_none());
    }
}
