//! Error types shared by the cache, archive and network layers.
//!
//! Upstream and metadata failures live in the repository crate. What is left
//! here are the local failures: disk, cache store, archive generation, JSON
//! encoding and the network kill switch. Each carries a stable code and, where
//! useful, suggestions for the operator.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Error codes for Cantata errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON payload
    E0104,
    /// Network access disabled in this scope
    E0205,
    /// Cache read failed
    E0301,
    /// Cache write failed
    E0302,
    /// File not found
    E0501,
    /// Permission denied
    E0502,
    /// Archive generation failed
    E0503,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::E0104 => "E0104",
            Self::E0205 => "E0205",
            Self::E0301 => "E0301",
            Self::E0302 => "E0302",
            Self::E0501 => "E0501",
            Self::E0502 => "E0502",
            Self::E0503 => "E0503",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for Cantata.
#[derive(Error, Debug)]
pub enum Error {
    /// A fetch was attempted while a [`NetworkGuard`](crate::NetworkGuard) was held.
    #[error("[E0205] network access is disabled, refusing {url}")]
    NetworkDisabled {
        /// URL that would have been requested.
        url: String,
    },

    /// JSON decoding error.
    #[error("[E0104] json error: {0}")]
    Json(#[from] sonic_rs::Error),

    /// JSON encoding error.
    #[error("[E0104] json encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// IO error.
    #[error("[{code}] io error at {path}: {message}")]
    Io {
        /// Error code.
        #[source]
        code: ErrorCodeSource,
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
        /// Suggestions for fixing.
        suggestions: Vec<String>,
    },

    /// Cache store error.
    #[error("[{code}] cache error: {message}")]
    Cache {
        /// Error code.
        #[source]
        code: ErrorCodeSource,
        /// Error message.
        message: String,
        /// Suggestions for fixing.
        suggestions: Vec<String>,
    },

    /// Archive error.
    #[error("[E0503] archive error: {message}")]
    Archive {
        /// Error message.
        message: String,
        /// Source path.
        path: Option<PathBuf>,
        /// Suggestions for fixing.
        suggestions: Vec<String>,
    },
}

/// Wrapper to make `ErrorCode` usable as a source.
#[derive(Debug)]
pub struct ErrorCodeSource(pub ErrorCode);

impl fmt::Display for ErrorCodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

impl std::error::Error for ErrorCodeSource {}

impl Error {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NetworkDisabled { .. } => ErrorCode::E0205,
            Self::Json(_) | Self::Encode(_) => ErrorCode::E0104,
            Self::Io { code, .. } | Self::Cache { code, .. } => code.0,
            Self::Archive { .. } => ErrorCode::E0503,
        }
    }

    /// Get suggestions for fixing this error.
    #[must_use]
    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::Io { suggestions, .. }
            | Self::Cache { suggestions, .. }
            | Self::Archive { suggestions, .. } => suggestions,
            Self::NetworkDisabled { .. } | Self::Json(_) | Self::Encode(_) => &[],
        }
    }

    /// The message followed by one `help:` line per suggestion.
    #[must_use]
    pub fn display_with_suggestions(&self) -> String {
        let mut out = self.to_string();
        for suggestion in self.suggestions() {
            out.push_str("\n  help: ");
            out.push_str(suggestion);
        }
        out
    }

    /// Whether this error was caused by a disabled network switch.
    #[must_use]
    pub const fn is_network_disabled(&self) -> bool {
        matches!(self, Self::NetworkDisabled { .. })
    }

    /// Create an IO error with context.
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        let (code, suggestions) = match err.kind() {
            std::io::ErrorKind::PermissionDenied => (
                ErrorCode::E0502,
                vec![
                    format!("Check permissions on: {}", path.display()),
                    "Make sure the cache directory is writable by the server user".to_string(),
                ],
            ),
            std::io::ErrorKind::NotFound => (
                ErrorCode::E0501,
                vec![format!("Check if the path exists: {}", path.display())],
            ),
            _ => (ErrorCode::E0501, Vec::new()),
        };
        Self::Io {
            code: ErrorCodeSource(code),
            path,
            message: err.to_string(),
            suggestions,
        }
    }

    /// Create the error returned while a network guard is held.
    #[must_use]
    pub fn network_disabled(url: impl Into<String>) -> Self {
        Self::NetworkDisabled { url: url.into() }
    }

    /// Create a cache read error.
    #[must_use]
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            code: ErrorCodeSource(ErrorCode::E0301),
            message: message.into(),
            suggestions: vec!["Clear the cache directory and restart the server".to_string()],
        }
    }

    /// Create a cache write error.
    #[must_use]
    pub fn cache_write(message: impl Into<String>) -> Self {
        Self::Cache {
            code: ErrorCodeSource(ErrorCode::E0302),
            message: message.into(),
            suggestions: vec!["Check free disk space in the cache directory".to_string()],
        }
    }

    /// Create an archive error.
    #[must_use]
    pub fn archive(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Archive {
            message: message.into(),
            path,
            suggestions: vec!["Check that the source tree exists and is readable".to_string()],
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
