//! Configuration for the Cantata Composer mirror.
//!
//! Configuration is resolved in this order (later wins):
//! 1. Built-in defaults
//! 2. The JSON configuration file
//! 3. `CANTATA_*` environment variables
//!
//! The result is validated before use; see [`validate`].

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod env;
mod error;
mod loader;
mod types;
mod validate;

pub use env::{CantataEnvVar, EnvConfig};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use types::{
    CacheBackend, HttpBasic, HttpSettings, MirrorConfig, ServerConfig, SyncSettings,
};
pub use validate::{Severity, ValidationIssue, validate};
