//! The set of configured mirrors.

use crate::error::{RepositoryError, Result};
use crate::fetch::MetadataFetcher;
use crate::merger::RootMetadataMerger;
use crate::options::ProxyOptions;
use crate::proxy::RemoteProxyRepository;
use crate::urls::LocalUrls;
use cantata_cache::MetadataCache;
use cantata_config::ServerConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Lazy mirror whose upstream has a change feed.
pub const LAZY_V2_SYNC_INTERVAL: u64 = 900;
/// Lazy mirror with v2 metadata but no change feed.
pub const LAZY_V2_INTERVAL: u64 = 1800;
/// Lazy mirror on a v1-only upstream.
pub const LAZY_INTERVAL: u64 = 7200;
/// Eager mirror: a full catalog walk.
pub const EAGER_INTERVAL: u64 = 86_400;

/// Seconds between syncs of a mirror.
///
/// An explicit interval wins. Lazy mirrors only refresh their root document
/// and can sync often; eager mirrors walk the whole catalog and sync daily.
#[must_use]
pub fn sync_interval(options: &ProxyOptions) -> u64 {
    if let Some(interval) = options.sync_interval() {
        return interval;
    }
    match (options.is_lazy(), options.v2_sync_api(), options.has_v2_api()) {
        (true, true, _) => LAZY_V2_SYNC_INTERVAL,
        (true, false, true) => LAZY_V2_INTERVAL,
        (true, false, false) => LAZY_INTERVAL,
        (false, _, _) => EAGER_INTERVAL,
    }
}

/// Mirrors by alias.
#[derive(Debug, Default)]
pub struct ProxyRepositoryRegistry {
    repos: BTreeMap<String, Arc<RemoteProxyRepository>>,
}

impl ProxyRepositoryRegistry {
    /// Build every mirror in the configuration.
    ///
    /// # Errors
    /// Returns error if a mirror's options are invalid or its persisted uid
    /// state cannot be read.
    pub fn new(config: &ServerConfig, fetcher: &MetadataFetcher, cache: &MetadataCache) -> Result<Self> {
        let merger = RootMetadataMerger::new(LocalUrls::new(&config.public_url));
        let mut repos = BTreeMap::new();
        for (alias, mirror) in &config.mirrors {
            let options = ProxyOptions::from_config(alias, mirror)?;
            let repo = RemoteProxyRepository::new(options, fetcher.clone(), cache.clone(), merger.clone())
                .with_state_dir(&config.cache_dir)?
                .with_max_packages(config.sync.max_packages);
            debug!(mirror = %alias, url = %mirror.url, "registered mirror");
            repos.insert(alias.clone(), Arc::new(repo));
        }
        Ok(Self { repos })
    }

    /// Registry over already built repositories.
    #[must_use]
    pub fn from_repositories(repos: impl IntoIterator<Item = RemoteProxyRepository>) -> Self {
        Self {
            repos: repos
                .into_iter()
                .map(|repo| (repo.alias().to_string(), Arc::new(repo)))
                .collect(),
        }
    }

    /// All mirrors.
    #[must_use]
    pub fn get_all_repos(&self) -> &BTreeMap<String, Arc<RemoteProxyRepository>> {
        &self.repos
    }

    /// Mirror by alias.
    ///
    /// # Errors
    /// Returns [`RepositoryError::UnknownMirror`] if no mirror has this alias.
    pub fn get(&self, alias: &str) -> Result<&Arc<RemoteProxyRepository>> {
        self.repos
            .get(alias)
            .ok_or_else(|| RepositoryError::UnknownMirror {
                alias: alias.to_string(),
            })
    }

    /// Number of mirrors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.repos.len()
    }

    /// Whether no mirror is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Re-derive every mirror's options before a sync pass.
    pub fn reset_proxy_options(&self) {
        for repo in self.repos.values() {
            repo.reset_options();
        }
    }

    /// First mirror, in alias order, that serves `name`.
    #[must_use]
    pub fn mirror_for_package(&self, name: &str) -> Option<&Arc<RemoteProxyRepository>> {
        self.repos.values().find(|repo| repo.serves(name))
    }
}
