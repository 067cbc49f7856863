//! Configuration loader with layered merging.

use crate::env::EnvConfig;
use crate::error::{ConfigError, Result};
use crate::types::ServerConfig;
use crate::validate::{Severity, validate};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cantata.json";

/// Configuration loader.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Explicit file path (CLI flag), if any.
    path: Option<PathBuf>,
    /// Environment snapshot.
    env: EnvConfig,
}

impl ConfigLoader {
    /// Create a loader reading the process environment.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self::with_env(path, EnvConfig::from_env())
    }

    /// Create a loader with an explicit environment snapshot.
    #[must_use]
    pub fn with_env(path: Option<PathBuf>, env: EnvConfig) -> Self {
        Self { path, env }
    }

    /// The file that will be read, if any.
    ///
    /// An explicit path must exist; the default file is optional.
    #[must_use]
    pub fn config_path(&self) -> (PathBuf, bool) {
        match self.path.clone().or_else(|| self.env.config.clone()) {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        }
    }

    /// Load, merge and validate the configuration.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, an environment
    /// override is malformed, or validation reports errors.
    pub fn load(&self) -> Result<ServerConfig> {
        let (path, required) = self.config_path();
        let mut config = match Self::load_file(&path) {
            Ok(config) => {
                debug!(path = %path.display(), "loaded configuration file");
                config
            }
            Err(e) if e.is_not_found() && !required => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                ServerConfig::default()
            }
            Err(e) => return Err(e),
        };

        self.env.apply_to(&mut config)?;

        let issues = validate(&config);
        for warning in issues.iter().filter(|i| i.severity == Severity::Warning) {
            warn!(field = %warning.field, "{}", warning.message);
        }
        if let Some(err) = ConfigError::from_issues(&issues) {
            return Err(err);
        }

        Ok(config)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid JSON.
    pub fn load_file(path: &Path) -> Result<ServerConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        sonic_rs::from_str(&content).map_err(|e| ConfigError::json(path, &e))
    }
}
