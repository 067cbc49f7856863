//! Core types and utilities for the Cantata Composer mirror.
//!
//! This crate provides foundational pieces used throughout Cantata:
//! - Coded error types with suggestions
//! - Content hashing (sha256 for metadata, sha1 for dist shasums)
//! - Canonical JSON encoding, so served bytes hash reproducibly
//! - Glob to regex translation for package name filters
//! - A scoped network kill switch

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
mod glob;
mod hash;
mod json;
pub mod network;

pub use error::{Error, ErrorCode, Result};
pub use glob::{GlobSet, glob_to_regex};
pub use hash::{ContentHash, sha1_hex};
pub use network::{NetworkGuard, NetworkSwitch};
pub use json::{from_json_slice, sort_keys, to_canonical_json};

pub use serde_json::Value as JsonValue;

/// A JSON object.
pub type JsonMap = serde_json::Map<String, JsonValue>;
