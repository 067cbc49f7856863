//! Repository error types.

use thiserror::Error;

/// Errors raised while proxying an upstream repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Invalid configuration.
    #[error("invalid repository configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Invalid URL.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The invalid URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// Upstream responded with a non-success status or the request failed.
    #[error("upstream fetch of {url} failed: {message}")]
    UpstreamFetch {
        /// Request URL.
        url: String,
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// Rate limited by upstream.
    #[error("rate limited by {url}, retry after {retry_after:?} seconds")]
    RateLimited {
        /// Request URL.
        url: String,
        /// Retry after duration in seconds.
        retry_after: Option<u64>,
    },

    /// Upstream rejected our credentials.
    #[error("authentication failed for {url}")]
    AuthFailed {
        /// Request URL.
        url: String,
    },

    /// Request timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Request URL.
        url: String,
        /// Timeout duration in seconds.
        timeout_secs: u64,
    },

    /// Upstream host could not be reached.
    #[error("upstream {url} unavailable: {message}")]
    Unavailable {
        /// Request URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// A fetch was attempted while the network switch was off.
    #[error("network disabled, refusing to fetch {url}")]
    NetworkDisabled {
        /// Request URL.
        url: String,
    },

    /// Upstream returned a body that is not the JSON we expected.
    #[error("invalid JSON from {url}: {message}")]
    Parse {
        /// Request URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// Requested document does not exist or is not served by this mirror.
    #[error("metadata not found: {name}")]
    MetadataNotFound {
        /// Package name or file.
        name: String,
    },

    /// Content did not hash to the advertised value.
    #[error("hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        /// File name.
        name: String,
        /// Advertised hash.
        expected: String,
        /// Computed hash.
        actual: String,
    },

    /// No mirror with this alias.
    #[error("unknown mirror '{alias}'")]
    UnknownMirror {
        /// Mirror alias.
        alias: String,
    },

    /// Local filesystem failure (dist store, uid store).
    #[error("IO error at {path}: {message}")]
    Io {
        /// Path involved.
        path: String,
        /// Error message.
        message: String,
    },

    /// Core error.
    #[error(transparent)]
    Core(#[from] cantata_core::Error),
}

impl RepositoryError {
    /// Create a not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::MetadataNotFound { name: name.into() }
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: err.to_string(),
        }
    }

    /// Create an IO error.
    #[must_use]
    pub fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// HTTP status this error is served as.
    ///
    /// Not found and malformed upstream payloads are 404, upstream failures
    /// 502, a disabled network 503, anything else 500.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MetadataNotFound { .. } | Self::UnknownMirror { .. } | Self::Parse { .. } => 404,
            Self::UpstreamFetch {
                status: Some(404), ..
            } => 404,
            Self::UpstreamFetch { .. }
            | Self::RateLimited { .. }
            | Self::AuthFailed { .. }
            | Self::Timeout { .. }
            | Self::Unavailable { .. }
            | Self::HashMismatch { .. } => 502,
            Self::NetworkDisabled { .. } => 503,
            Self::Core(e) if e.is_network_disabled() => 503,
            Self::InvalidConfig { .. } | Self::InvalidUrl { .. } | Self::Io { .. } | Self::Core(_) => {
                500
            }
        }
    }

    /// Whether the error means "this document does not exist upstream".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamFetch {
                status: Some(code), ..
            } => *code >= 500,
            Self::UpstreamFetch { status: None, .. }
            | Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::Unavailable { .. } => true,
            _ => false,
        }
    }
}

impl From<cantata_config::ConfigError> for RepositoryError {
    fn from(err: cantata_config::ConfigError) -> Self {
        Self::InvalidConfig {
            message: err.to_string(),
        }
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
