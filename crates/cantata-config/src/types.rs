//! Configuration file types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default metadata cache TTL in seconds.
pub const DEFAULT_MAX_TTL_SECS: u64 = 1800;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub listen: String,
    /// Absolute prefix for URLs written into served documents. Empty means
    /// host-relative paths.
    pub public_url: String,
    /// Root directory for cached metadata and mirrored dists.
    pub cache_dir: PathBuf,
    /// Where cached metadata lives.
    pub cache_backend: CacheBackend,
    /// Memory store capacity in bytes.
    pub memory_cache_size: u64,
    /// Maximum age of a cached document before an upstream change hint forces refresh.
    pub max_ttl_secs: u64,
    /// Local package dump served under the un-prefixed routes.
    pub catalog_path: Option<PathBuf>,
    /// Refuse every upstream request (offline mode).
    pub disable_network: bool,
    /// Upstream HTTP client settings.
    pub http: HttpSettings,
    /// Background sync settings.
    pub sync: SyncSettings,
    /// Mirrors keyed by alias.
    pub mirrors: BTreeMap<String, MirrorConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            public_url: String::new(),
            cache_dir: PathBuf::from("var/cache"),
            cache_backend: CacheBackend::default(),
            memory_cache_size: 128 * 1024 * 1024,
            max_ttl_secs: DEFAULT_MAX_TTL_SECS,
            catalog_path: None,
            disable_network: false,
            http: HttpSettings::default(),
            sync: SyncSettings::default(),
            mirrors: BTreeMap::new(),
        }
    }
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process moka cache. Lost on restart.
    #[default]
    Memory,
    /// One file per entry under `cache_dir/metadata`.
    File,
}

/// Upstream HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpSettings {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Requests per second per upstream host.
    pub rate_limit_per_host: u32,
    /// User agent override.
    pub user_agent: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            rate_limit_per_host: 20,
            user_agent: None,
        }
    }
}

/// Background sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    /// Run the scheduler inside `serve`.
    pub enabled: bool,
    /// Seconds between scheduler ticks.
    pub tick_secs: u64,
    /// Upper bound on packages pulled into an eager mirror's include file.
    pub max_packages: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 60,
            max_packages: 5000,
        }
    }
}

/// HTTP basic credentials for an upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpBasic {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

/// One mirrored upstream repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Upstream repository root URL.
    pub url: String,
    /// Basic auth credentials.
    pub http_basic: Option<HttpBasic>,
    /// Bearer token.
    pub token: Option<String>,
    /// Fetch provider files on demand instead of syncing the catalog.
    pub lazy: bool,
    /// Do not serve the v1 provider format.
    pub disable_v1: bool,
    /// Do not serve the v2 metadata format.
    pub disable_v2: bool,
    /// Explicit package allowlist.
    pub available_packages: Vec<String>,
    /// Glob allowlist, used when `available_packages` is empty.
    pub available_package_patterns: Vec<String>,
    /// Override of the computed sync interval in seconds.
    pub sync_interval: Option<u64>,
    /// Serve dist archives through this server.
    pub dist_mirror: bool,
    /// Keep the upstream `notify-batch` URL.
    pub parent_notify: bool,
    /// Banner injected as `info` into the root document.
    pub info: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.max_ttl_secs, 1800);
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(config.mirrors.is_empty());
    }

    #[test]
    fn test_parse_partial_config() {
        let json = r#"{
            "listen": "0.0.0.0:9000",
            "cache_backend": "file",
            "mirrors": {
                "packagist": {
                    "url": "https://repo.packagist.org",
                    "lazy": true,
                    "available_package_patterns": ["symfony/*"]
                }
            }
        }"#;
        let config: ServerConfig = sonic_rs::from_str(json).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.cache_backend, CacheBackend::File);
        assert_eq!(config.sync.tick_secs, 60);
        let mirror = &config.mirrors["packagist"];
        assert!(mirror.lazy);
        assert!(!mirror.dist_mirror);
        assert_eq!(mirror.available_package_patterns, vec!["symfony/*"]);
    }
}
