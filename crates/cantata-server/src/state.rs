//! Shared application state.

use cantata_cache::{CacheStore, FileStore, MemoryStore, MetadataCache, SystemClock};
use cantata_config::{CacheBackend, ServerConfig};
use cantata_core::NetworkSwitch;
use cantata_repository::{
    DistMirror, HttpClient, HttpClientConfig, LocalCatalog, LocalUrls, MetadataFetcher,
    ProxyRepositoryRegistry, Result, SyncScheduler, UidSequence,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything a request handler needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<ServerConfig>,
    /// Configured mirrors.
    pub registry: Arc<ProxyRepositoryRegistry>,
    /// Local catalog, when one is configured.
    pub catalog: Option<Arc<LocalCatalog>>,
    /// Mirrored dist archives.
    pub dist: Arc<DistMirror>,
    /// Shared metadata cache.
    pub cache: MetadataCache,
    /// Network switch shared with the upstream client.
    pub network: NetworkSwitch,
    /// Where generated local archives are stored.
    pub archive_dir: PathBuf,
}

impl AppState {
    /// Build the state described by `config`.
    ///
    /// # Errors
    /// Returns error if the cache directory, a mirror, or the local catalog
    /// cannot be set up.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let network = if config.disable_network {
            NetworkSwitch::offline()
        } else {
            NetworkSwitch::new()
        };
        let client = HttpClient::new(HttpClientConfig::from(&config.http), network.clone())?;
        let fetcher = MetadataFetcher::new(Arc::new(client));

        let store: Arc<dyn CacheStore> = match config.cache_backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new(config.memory_cache_size)),
            CacheBackend::File => Arc::new(FileStore::open(config.cache_dir.join("metadata"))?),
        };
        let cache = MetadataCache::with_clock(store, Arc::new(SystemClock), config.max_ttl_secs);
        let registry = ProxyRepositoryRegistry::new(&config, &fetcher, &cache)?;

        let catalog = match &config.catalog_path {
            Some(path) => {
                let uid_path = config.cache_dir.join("uids").join("_local.json");
                let mut uids = UidSequence::load(&uid_path)?;
                let catalog = LocalCatalog::load(path, &LocalUrls::new(&config.public_url), &mut uids)?;
                uids.save(&uid_path)?;
                Some(Arc::new(catalog))
            }
            None => None,
        };

        info!(
            mirrors = registry.len(),
            catalog = catalog.as_ref().map_or(0, |c| c.len()),
            backend = ?config.cache_backend,
            "state initialized"
        );
        Ok(Self {
            dist: Arc::new(DistMirror::new(config.cache_dir.join("dist"))),
            archive_dir: config.cache_dir.join("archives"),
            registry: Arc::new(registry),
            catalog,
            cache,
            network,
            config: Arc::new(config),
        })
    }

    /// Scheduler over this state's mirrors.
    #[must_use]
    pub fn scheduler(&self) -> SyncScheduler {
        SyncScheduler::new(
            Arc::clone(&self.registry),
            Duration::from_secs(self.config.sync.tick_secs.max(1)),
        )
    }
}
