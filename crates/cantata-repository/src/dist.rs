//! Dist archive mirroring.
//!
//! Archives are downloaded once per reference into
//! `<root>/<alias>/<vendor>/<package>/<reference>.<type>` and served from
//! disk afterwards. Concurrent requests for the same file share one download.

use crate::error::{RepositoryError, Result};
use crate::proxy::RemoteProxyRepository;
use cantata_core::JsonValue;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Local store of mirrored dist archives.
#[derive(Debug)]
pub struct DistMirror {
    root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DistMirror {
    /// Store archives under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of the archive for `version` of `name` at `reference`,
    /// downloading it from upstream on first use.
    ///
    /// # Errors
    /// Returns not-found when the mirror does not mirror dists, or the
    /// version or reference is unknown. Returns a hash mismatch when the
    /// download does not match the advertised `shasum`.
    pub async fn fetch(
        &self,
        repo: &RemoteProxyRepository,
        host: &str,
        name: &str,
        version: &str,
        reference: &str,
        kind: &str,
    ) -> Result<PathBuf> {
        let not_found = || RepositoryError::not_found(format!("{name} {version} ({reference})"));
        let options = repo.options();
        if !options.is_dist_mirror() {
            return Err(not_found());
        }
        let Some((vendor, package)) = name.split_once('/') else {
            return Err(not_found());
        };
        if ![vendor, package, reference, kind].iter().all(|s| is_safe_segment(s)) {
            return Err(not_found());
        }

        let versions = repo.versions(host, name).await?;
        let dist = find_dist(&versions, version, reference).ok_or_else(not_found)?;
        let dist_url = dist
            .get("url")
            .and_then(JsonValue::as_str)
            .ok_or_else(not_found)?;
        let url = options.resolve(dist_url)?;
        let shasum = dist
            .get("shasum")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let path = self
            .root
            .join(repo.alias())
            .join(vendor.to_lowercase())
            .join(package.to_lowercase())
            .join(format!("{reference}.{kind}"));
        if is_file(&path).await {
            debug!(path = %path.display(), "dist hit");
            return Ok(path);
        }

        let lock = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            if is_file(&path).await {
                Ok(())
            } else {
                self.download(repo, &url, &path, shasum.as_deref()).await
            }
        };
        drop(lock);
        // The last waiter out removes the entry.
        self.locks
            .remove_if(&path, |_, lock| Arc::strong_count(lock) == 1);
        result.map(|()| path)
    }

    async fn download(
        &self,
        repo: &RemoteProxyRepository,
        url: &Url,
        path: &Path,
        shasum: Option<&str>,
    ) -> Result<()> {
        let options = repo.options();
        let partial = path.with_extension("part");
        let file = repo
            .fetcher()
            .client()
            .download(url, options.credentials_for(url), &partial)
            .await?;

        if let Some(expected) = shasum
            && file.sha1 != expected
        {
            warn!(url = %url, expected, actual = %file.sha1, "dist checksum mismatch");
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(RepositoryError::HashMismatch {
                name: url.to_string(),
                expected: expected.to_string(),
                actual: file.sha1,
            });
        }
        tokio::fs::rename(&partial, path)
            .await
            .map_err(|e| RepositoryError::io(path, e))?;
        Ok(())
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

/// The `dist` object of the version matching `version` (exact or
/// normalized) whose dist reference is `reference`.
fn find_dist<'a>(versions: &'a [JsonValue], version: &str, reference: &str) -> Option<&'a JsonValue> {
    versions
        .iter()
        .filter(|meta| {
            ["version", "version_normalized"]
                .iter()
                .any(|key| meta.get(*key).and_then(JsonValue::as_str) == Some(version))
        })
        .filter_map(|meta| meta.get("dist"))
        .find(|dist| dist.get("reference").and_then(JsonValue::as_str) == Some(reference))
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
