//! Request handlers.
//!
//! - [`catalog`]: the local catalog under the un-prefixed routes
//! - [`mirror`]: mirrored upstreams under `/mirror/{alias}`

pub mod catalog;
pub mod mirror;

use crate::error::{ApiError, ApiResult};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use cantata_repository::{ApiVersion, JsonMetadata};
use std::path::Path;
use tokio_util::io::ReaderStream;

/// Request host, used to partition cached documents.
pub(crate) fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Metadata format the client speaks, from its user agent.
pub(crate) fn api_version(headers: &HeaderMap) -> ApiVersion {
    ApiVersion::from_user_agent(headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()))
}

/// A `<name>[$<hash>].json` file name split into name and hash.
pub(crate) fn parse_hashed(file: &str) -> Option<(&str, Option<&str>)> {
    let stem = file.strip_suffix(".json")?;
    if stem.is_empty() {
        return None;
    }
    Some(match stem.split_once('$') {
        Some((name, hash)) if !name.is_empty() && !hash.is_empty() => (name, Some(hash)),
        Some(_) => return None,
        None => (stem, None),
    })
}

/// A `<name>[~dev].json` file name split into name and dev flag.
pub(crate) fn parse_v2(file: &str) -> Option<(&str, bool)> {
    let stem = file.strip_suffix(".json")?;
    let parsed = match stem.strip_suffix("~dev") {
        Some(name) => (name, true),
        None => (stem, false),
    };
    (!parsed.0.is_empty()).then_some(parsed)
}

/// Serve a JSON document as is.
pub(crate) fn json_response(doc: &JsonMetadata) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        doc.raw().clone(),
    )
        .into_response()
}

/// Stream a file from disk.
pub(crate) async fn file_response(path: &Path, content_type: &'static str) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ApiError(cantata_repository::RepositoryError::io(path, e)))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError(cantata_repository::RepositoryError::io(path, e)))?
        .len();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Content type for a dist archive extension.
pub(crate) fn archive_content_type(kind: &str) -> &'static str {
    match kind {
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" | "tgz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_names() {
        assert_eq!(parse_hashed("foo$abc.json"), Some(("foo", Some("abc"))));
        assert_eq!(parse_hashed("foo.json"), Some(("foo", None)));
        assert_eq!(parse_hashed("foo$.json"), None);
        assert_eq!(parse_hashed("foo"), None);
    }

    #[test]
    fn v2_names() {
        assert_eq!(parse_v2("foo~dev.json"), Some(("foo", true)));
        assert_eq!(parse_v2("foo.json"), Some(("foo", false)));
        assert_eq!(parse_v2("~dev.json"), None);
    }

    #[test]
    fn host_is_lowercased() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("Mirror.Example.com:8080"));
        assert_eq!(request_host(&headers), "mirror.example.com:8080");
        assert_eq!(request_host(&HeaderMap::new()), "");
    }
}
