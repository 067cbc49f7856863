//! Environment variable configuration support.

use crate::error::{ConfigError, Result};
use crate::types::ServerConfig;
use std::path::PathBuf;

/// Environment variables understood by Cantata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CantataEnvVar {
    /// `CANTATA_CONFIG` - path to the configuration file.
    Config,
    /// `CANTATA_LISTEN` - socket address to bind.
    Listen,
    /// `CANTATA_CACHE_DIR` - cache directory.
    CacheDir,
    /// `CANTATA_DISABLE_NETWORK` - refuse upstream requests.
    DisableNetwork,
    /// `CANTATA_HTTP_TIMEOUT` - upstream request timeout in seconds.
    HttpTimeout,
}

impl CantataEnvVar {
    /// Get the environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "CANTATA_CONFIG",
            Self::Listen => "CANTATA_LISTEN",
            Self::CacheDir => "CANTATA_CACHE_DIR",
            Self::DisableNetwork => "CANTATA_DISABLE_NETWORK",
            Self::HttpTimeout => "CANTATA_HTTP_TIMEOUT",
        }
    }

    /// Get the value from environment.
    #[must_use]
    pub fn get(self) -> Option<String> {
        std::env::var(self.as_str()).ok()
    }

    /// Get as boolean (1/true/yes/on = true).
    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        self.get().map(|v| parse_bool(&v))
    }

    /// Get as path.
    #[must_use]
    pub fn as_path(self) -> Option<PathBuf> {
        self.get().map(PathBuf::from)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Environment configuration snapshot.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    /// Configuration file path.
    pub config: Option<PathBuf>,
    /// Listen address.
    pub listen: Option<String>,
    /// Cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Disable network access.
    pub disable_network: Option<bool>,
    /// Raw timeout value, parsed when applied.
    pub http_timeout: Option<String>,
}

impl EnvConfig {
    /// Read configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            config: CantataEnvVar::Config.as_path(),
            listen: CantataEnvVar::Listen.get(),
            cache_dir: CantataEnvVar::CacheDir.as_path(),
            disable_network: CantataEnvVar::DisableNetwork.as_bool(),
            http_timeout: CantataEnvVar::HttpTimeout.get(),
        }
    }

    /// Apply environment overrides to a loaded configuration.
    ///
    /// # Errors
    /// Returns error if a numeric variable cannot be parsed.
    pub fn apply_to(&self, config: &mut ServerConfig) -> Result<()> {
        if let Some(ref listen) = self.listen {
            config.listen.clone_from(listen);
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
        if let Some(disable) = self.disable_network {
            config.disable_network = disable;
        }
        if let Some(ref raw) = self.http_timeout {
            config.http.timeout_secs = raw.trim().parse().map_err(|_| {
                ConfigError::env(
                    CantataEnvVar::HttpTimeout,
                    format!("expected seconds, got '{raw}'"),
                )
            })?;
        }
        Ok(())
    }
}
