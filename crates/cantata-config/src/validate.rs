//! Configuration validation with descriptive errors.

use crate::types::{MirrorConfig, ServerConfig};
use cantata_core::GlobSet;
use std::net::SocketAddr;
use url::Url;

/// Validation severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Warning (may indicate issues).
    Warning,
    /// Error (must be fixed).
    Error,
}

/// Validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity level.
    pub severity: Severity,
    /// Field path (dot-notation).
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

impl ValidationIssue {
    /// Create a new error.
    #[must_use]
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new warning.
    #[must_use]
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a resolved configuration.
#[must_use]
pub fn validate(config: &ServerConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if config.listen.parse::<SocketAddr>().is_err() {
        issues.push(ValidationIssue::error(
            "listen",
            format!("'{}' is not a socket address", config.listen),
        ));
    }
    if !config.public_url.is_empty() && Url::parse(&config.public_url).is_err() {
        issues.push(ValidationIssue::error(
            "public_url",
            format!("'{}' is not an absolute URL", config.public_url),
        ));
    }
    if !(1..=300).contains(&config.http.timeout_secs) {
        issues.push(ValidationIssue::error(
            "http.timeout_secs",
            "must be between 1 and 300 seconds",
        ));
    }
    if config.http.connect_timeout_secs == 0
        || config.http.connect_timeout_secs > config.http.timeout_secs
    {
        issues.push(ValidationIssue::error(
            "http.connect_timeout_secs",
            "must be positive and not exceed http.timeout_secs",
        ));
    }
    if config.max_ttl_secs == 0 {
        issues.push(ValidationIssue::error("max_ttl_secs", "must be positive"));
    }
    if config.sync.tick_secs == 0 {
        issues.push(ValidationIssue::error("sync.tick_secs", "must be positive"));
    }

    for (alias, mirror) in &config.mirrors {
        validate_mirror(alias, mirror, &mut issues);
    }

    issues
}

fn validate_mirror(alias: &str, mirror: &MirrorConfig, issues: &mut Vec<ValidationIssue>) {
    let field = |name: &str| format!("mirrors.{alias}.{name}");

    if alias.is_empty()
        || !alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        issues.push(ValidationIssue::error(
            format!("mirrors.{alias}"),
            "alias may only contain letters, digits, '-', '_' and '.'",
        ));
    }

    match Url::parse(&mirror.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => issues.push(ValidationIssue::error(
            field("url"),
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => issues.push(ValidationIssue::error(field("url"), e.to_string())),
    }

    if mirror.disable_v1 && mirror.disable_v2 {
        issues.push(ValidationIssue::error(
            field("disable_v2"),
            "v1 and v2 formats cannot both be disabled",
        ));
    }

    if GlobSet::new(mirror.available_package_patterns.iter().cloned()).is_err() {
        issues.push(ValidationIssue::error(
            field("available_package_patterns"),
            "patterns do not compile",
        ));
    }

    if !mirror.available_packages.is_empty() && !mirror.available_package_patterns.is_empty() {
        issues.push(ValidationIssue::warning(
            field("available_package_patterns"),
            "ignored because available_packages is set",
        ));
    }

    if mirror.http_basic.is_some() && mirror.token.is_some() {
        issues.push(ValidationIssue::warning(
            field("token"),
            "both http_basic and token set; token wins",
        ));
    }

    if mirror.sync_interval == Some(0) {
        issues.push(ValidationIssue::error(field("sync_interval"), "must be positive"));
    }
}
