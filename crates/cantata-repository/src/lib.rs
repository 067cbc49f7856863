//! Upstream Composer repository proxying for Cantata.
//!
//! This crate turns configured upstream repositories into mirrors:
//!
//! - **[`RemoteProxyRepository`]**: one mirror. Fetches the upstream root
//!   document, rewrites it for local clients with [`RootMetadataMerger`],
//!   and serves v1 provider files, v2 metadata files and include shards,
//!   all through the host-partitioned [`cantata_cache::MetadataCache`].
//! - **[`ProxyRepositoryRegistry`]**: every configured mirror by alias.
//! - **[`SyncScheduler`]**: periodic refresh with per-mirror intervals and
//!   exponential backoff.
//! - **[`ImportComposerRepository`]**: crawl a repository into a
//!   `source url -> package name` index.
//! - **[`LocalCatalog`]**: precomputed documents for a local package dump.
//! - **[`DistMirror`]**: download-once store for dist archives.
//!
//! # Example
//!
//! ```no_run
//! use cantata_cache::{MemoryStore, MetadataCache};
//! use cantata_config::MirrorConfig;
//! use cantata_core::NetworkSwitch;
//! use cantata_repository::{
//!     ApiVersion, HttpClient, HttpClientConfig, MetadataFetcher, ProxyOptions,
//!     RemoteProxyRepository, RootMetadataMerger,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ProxyOptions::from_config("packagist", &MirrorConfig {
//!     url: "https://repo.packagist.org".into(),
//!     lazy: true,
//!     ..MirrorConfig::default()
//! })?;
//! let client = HttpClient::new(HttpClientConfig::default(), NetworkSwitch::new())?;
//! let repo = RemoteProxyRepository::new(
//!     options,
//!     MetadataFetcher::new(Arc::new(client)),
//!     MetadataCache::new(Arc::new(MemoryStore::new(64 * 1024 * 1024))),
//!     RootMetadataMerger::default(),
//! );
//!
//! let root = repo.root_metadata("localhost", ApiVersion::V2).await?;
//! println!("{}", String::from_utf8_lossy(root.raw()));
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod client;
pub mod dist;
pub mod error;
pub mod fetch;
pub mod import;
pub mod merger;
pub mod metadata;
pub mod options;
pub mod proxy;
pub mod registry;
pub mod root;
pub mod sync;
pub mod uid;
pub mod urls;

pub use catalog::LocalCatalog;
pub use client::{HttpClient, HttpClientConfig, HttpClientStats};
pub use dist::DistMirror;
pub use error::{RepositoryError, Result};
pub use fetch::MetadataFetcher;
pub use import::{DEFAULT_LIMIT_SIZE, ImportComposerRepository, ImportIndex};
pub use merger::{ApiVersion, RootMetadataMerger};
pub use metadata::JsonMetadata;
pub use options::{Credentials, ProxyOptions};
pub use proxy::{RemoteProxyRepository, SyncReport, SyncStatus};
pub use registry::{ProxyRepositoryRegistry, sync_interval};
pub use root::RootDocument;
pub use sync::{RetryPolicy, SyncOutcome, SyncScheduler};
pub use uid::UidSequence;
pub use urls::LocalUrls;
