//! Metadata cache for the Cantata Composer mirror.
//!
//! Two layers:
//!
//! - **Stores** ([`CacheStore`]): dumb key/value backends with atomic
//!   per-key `get`/`set`/`delete`. [`MemoryStore`] wraps a weighted
//!   [moka](https://crates.io/crates/moka) cache, [`FileStore`] keeps one
//!   file per key and writes through a temp file + rename.
//!
//! - **[`MetadataCache`]**: get-or-compute on top of a store. Keys are
//!   partitioned by request host, and freshness is decided from an optional
//!   upstream last-modified hint plus an optional payload predicate.
//!
//! Store failures never fail a request: read errors count as a miss and
//! write errors are logged.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod metadata;
mod stats;
mod store;

pub use metadata::{
    CachedDocument, Clock, DEFAULT_MAX_TTL_SECS, Freshness, MetadataCache, SystemClock, cache_key,
};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{CacheStore, FileStore, MemoryStore};
