//! Get-or-compute metadata cache with host partitioning.

use crate::stats::CacheStats;
use crate::store::CacheStore;
use bytes::Bytes;
use cantata_core::sha1_hex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default maximum age of an entry, used together with a last-modified hint.
pub const DEFAULT_MAX_TTL_SECS: u64 = 1800;

/// Source of the current time in unix seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current unix time in seconds.
    fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Storage key for a logical key requested through `host`.
///
/// Partitioning by host keeps a response generated for one virtual host
/// (with that host's absolute URLs baked in) from being served to another.
#[must_use]
pub fn cache_key(key: &str, host: &str) -> String {
    let mut input = String::with_capacity(key.len() + host.len());
    input.push_str(key);
    input.push_str(host);
    sha1_hex(input.as_bytes())
}

/// A cached payload and the time it was computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDocument {
    /// Unix seconds at which the payload was stored.
    pub timestamp: u64,
    /// Payload bytes.
    pub content: Bytes,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    timestamp: u64,
    content: String,
}

/// Freshness inputs for one lookup.
#[derive(Default, Clone, Copy)]
pub struct Freshness<'a> {
    /// Upstream last-modified time (unix seconds), if known.
    pub last_modified: Option<u64>,
    /// Returns `true` when a cached payload must not be served.
    pub invalidate: Option<&'a (dyn Fn(&Bytes) -> bool + Send + Sync)>,
}

impl std::fmt::Debug for Freshness<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Freshness")
            .field("last_modified", &self.last_modified)
            .field("invalidate", &self.invalidate.is_some())
            .finish()
    }
}

impl<'a> Freshness<'a> {
    /// Freshness with a last-modified hint.
    #[must_use]
    pub fn last_modified(hint: u64) -> Self {
        Self {
            last_modified: Some(hint),
            invalidate: None,
        }
    }

    /// Add an invalidation predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: &'a (dyn Fn(&Bytes) -> bool + Send + Sync)) -> Self {
        self.invalidate = Some(predicate);
        self
    }
}

/// Get-or-compute cache over a [`CacheStore`].
///
/// No single-flight: concurrent requests that all find an entry stale will
/// each recompute it, and the last write wins.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    max_ttl: u64,
    stats: Arc<CacheStats>,
}

impl MetadataCache {
    /// Create a cache with the default TTL and the wall clock.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), DEFAULT_MAX_TTL_SECS)
    }

    /// Create a cache with an explicit clock and TTL.
    #[must_use]
    pub fn with_clock(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, max_ttl: u64) -> Self {
        Self {
            store,
            clock,
            max_ttl,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Maximum entry age in seconds.
    #[must_use]
    pub fn max_ttl(&self) -> u64 {
        self.max_ttl
    }

    /// Current time according to the cache clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Statistics.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Return the cached payload for `key` under `host`, recomputing it when
    /// absent, empty or stale.
    ///
    /// An entry is stale when a last-modified hint is given and the entry is
    /// older than the hint or older than the max TTL, or when the predicate
    /// rejects it.
    ///
    /// # Errors
    /// Returns the error of `compute`; store failures are not surfaced.
    pub async fn get<F, Fut, E>(
        &self,
        key: &str,
        host: &str,
        freshness: Freshness<'_>,
        compute: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        let storage_key = cache_key(key, host);

        match self.read(&storage_key) {
            Some(entry) if !entry.content.is_empty() => {
                if self.needs_refresh(&entry, &freshness) {
                    debug!(key, host, timestamp = entry.timestamp, "cache entry stale");
                    self.stats.record_refresh();
                } else {
                    debug!(key, host, "cache hit");
                    self.stats.record_hit();
                    return Ok(entry.content);
                }
            }
            _ => {
                debug!(key, host, "cache miss");
                self.stats.record_miss();
            }
        }

        let timestamp = self.clock.now();
        let content = compute().await?;
        self.write(&storage_key, timestamp, &content);
        Ok(content)
    }

    /// Read an entry without freshness checks.
    #[must_use]
    pub fn peek(&self, key: &str, host: &str) -> Option<CachedDocument> {
        self.read(&cache_key(key, host))
    }

    /// Store a payload computed elsewhere (e.g. by the sync scheduler).
    pub fn put(&self, key: &str, host: &str, content: &Bytes) {
        self.write(&cache_key(key, host), self.clock.now(), content);
    }

    /// Invalidate an entry. Returns whether it existed.
    pub fn delete(&self, key: &str, host: &str) -> bool {
        match self.store.delete(&cache_key(key, host)) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key, host, error = %e, "cache delete failed");
                false
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "cache clear failed");
        }
    }

    fn needs_refresh(&self, entry: &CachedDocument, freshness: &Freshness<'_>) -> bool {
        let now = self.clock.now();
        let by_hint = freshness.last_modified.is_some_and(|hint| {
            entry.timestamp < hint || entry.timestamp.saturating_add(self.max_ttl) < now
        });
        by_hint || freshness.invalidate.is_some_and(|p| p(&entry.content))
    }

    fn read(&self, storage_key: &str) -> Option<CachedDocument> {
        let raw = match self.store.get(storage_key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = storage_key, error = %e, "cache read failed, treating as miss");
                self.stats.record_read_error();
                return None;
            }
        };
        match sonic_rs::from_slice::<StoredEntry>(&raw) {
            Ok(entry) => Some(CachedDocument {
                timestamp: entry.timestamp,
                content: Bytes::from(entry.content),
            }),
            Err(e) => {
                warn!(key = storage_key, error = %e, "corrupt cache entry, treating as miss");
                self.stats.record_read_error();
                None
            }
        }
    }

    fn write(&self, storage_key: &str, timestamp: u64, content: &Bytes) {
        let Ok(text) = std::str::from_utf8(content) else {
            warn!(key = storage_key, "refusing to cache non UTF-8 payload");
            self.stats.record_write_error();
            return;
        };
        let entry = StoredEntry {
            timestamp,
            content: text.to_string(),
        };
        let result = sonic_rs::to_vec(&entry)
            .map_err(|e| cantata_core::Error::cache_write(e.to_string()))
            .and_then(|encoded| self.store.set(storage_key, Bytes::from(encoded)));
        match result {
            Ok(()) => self.stats.record_put(),
            Err(e) => {
                warn!(key = storage_key, error = %e, "cache write failed");
                self.stats.record_write_error();
            }
        }
    }
}
