//! Configuration errors, rendered through miette by `check-config`.

// False positive warnings from thiserror macro expansion
#![allow(unused_assignments)]

use crate::env::CantataEnvVar;
use crate::validate::{Severity, ValidationIssue};
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type with rich diagnostics.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// An explicitly named configuration file does not exist.
    #[error("configuration file not found: {path}")]
    #[diagnostic(
        code(config::not_found),
        help("pass an existing file with --config or unset CANTATA_CONFIG")
    )]
    NotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// The file is not valid JSON.
    #[error("invalid JSON in {path}: {message}")]
    #[diagnostic(
        code(config::invalid_json),
        help("check JSON syntax at line {line}, column {column}")
    )]
    InvalidJson {
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
        /// Line number (1-indexed).
        line: usize,
        /// Column number (1-indexed).
        column: usize,
    },

    /// The file could not be read.
    #[error("cannot read {path}: {message}")]
    #[diagnostic(code(config::io_error))]
    Io {
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// The file exists but is not readable by this user.
    #[error("permission denied: {path}")]
    #[diagnostic(
        code(config::permission_denied),
        help("the server user needs read access to the configuration file")
    )]
    PermissionDenied {
        /// File path.
        path: PathBuf,
    },

    /// A `CANTATA_*` override could not be applied.
    #[error("invalid environment variable {var}: {message}")]
    #[diagnostic(code(config::env_error))]
    EnvError {
        /// Variable name.
        var: &'static str,
        /// Error message.
        message: String,
    },

    /// Validation reported at least one error.
    #[error("configuration validation failed with {count} error(s): {}", .errors.join("; "))]
    #[diagnostic(
        code(config::validation_failed),
        help("run 'cantata check-config' after fixing the listed fields")
    )]
    ValidationFailed {
        /// Number of errors.
        count: usize,
        /// `field: message` per error.
        errors: Vec<String>,
    },
}

impl ConfigError {
    /// Create an IO error for reading `path`.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io {
                path,
                message: err.to_string(),
            },
        }
    }

    /// Create a JSON parse error with location.
    #[must_use]
    pub fn json(path: impl Into<PathBuf>, err: &sonic_rs::Error) -> Self {
        Self::InvalidJson {
            path: path.into(),
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
        }
    }

    /// Create an error for a malformed environment override.
    #[must_use]
    pub fn env(var: CantataEnvVar, message: impl Into<String>) -> Self {
        Self::EnvError {
            var: var.as_str(),
            message: message.into(),
        }
    }

    /// Collect the error-severity issues, or `None` when there are none.
    #[must_use]
    pub fn from_issues(issues: &[ValidationIssue]) -> Option<Self> {
        let errors: Vec<String> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(ToString::to_string)
            .collect();
        (!errors.is_empty()).then(|| Self::ValidationFailed {
            count: errors.len(),
            errors,
        })
    }

    /// Check if error is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
