//! HTTP client for upstream repositories with rate limiting and a network
//! kill switch.
//!
//! Requests are never retried here: metadata callers decide whether to fall
//! back to cached data, and the sync scheduler owns the retry policy.

use crate::error::{RepositoryError, Result};
use crate::options::Credentials;
use cantata_config::HttpSettings;
use cantata_core::NetworkSwitch;
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use sha1::{Digest, Sha1};
use std::io::Write;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Requests per second per host.
    pub rate_limit_per_host: u32,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from(&HttpSettings::default())
    }
}

impl From<&HttpSettings> for HttpClientConfig {
    fn from(settings: &HttpSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            rate_limit_per_host: settings.rate_limit_per_host,
            user_agent: settings
                .user_agent
                .clone()
                .unwrap_or_else(|| format!("Cantata/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// HTTP client statistics.
#[derive(Debug, Default)]
pub struct HttpClientStats {
    /// Total requests made.
    pub requests: AtomicU64,
    /// Successful requests (2xx).
    pub successes: AtomicU64,
    /// Client errors (4xx).
    pub client_errors: AtomicU64,
    /// Server errors (5xx) and transport failures.
    pub server_errors: AtomicU64,
    /// Requests refused because the network was disabled.
    pub refused: AtomicU64,
    /// Total bytes received.
    pub bytes_received: AtomicU64,
    total_request_time_ms: AtomicU64,
}

impl HttpClientStats {
    /// Get average request time in milliseconds.
    #[must_use]
    pub fn avg_request_time_ms(&self) -> f64 {
        let total = self.total_request_time_ms.load(Ordering::Relaxed);
        let count = self.requests.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    fn record_request(&self, duration: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_request_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Successful upstream response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Response body bytes.
    pub body: bytes::Bytes,
    /// HTTP status code.
    pub status: StatusCode,
    /// Last-Modified header if present.
    pub last_modified: Option<String>,
}

/// A file written by [`HttpClient::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Bytes written.
    pub size: u64,
    /// sha1 of the content, lowercase hex.
    pub sha1: String,
}

type HostRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Upstream HTTP client with per-host rate limiting.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    rate_limiters: DashMap<String, Arc<HostRateLimiter>>,
    stats: Arc<HttpClientStats>,
    network: NetworkSwitch,
}

impl HttpClient {
    /// Create a client.
    ///
    /// # Errors
    /// Returns error if the underlying client cannot be built.
    pub fn new(config: HttpClientConfig, network: NetworkSwitch) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| RepositoryError::InvalidConfig {
                    message: "Invalid user agent".into(),
                })?,
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .zstd(true)
            .default_headers(headers)
            .build()
            .map_err(|e| RepositoryError::InvalidConfig {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            config,
            rate_limiters: DashMap::new(),
            stats: Arc::new(HttpClientStats::default()),
            network,
        })
    }

    /// The switch consulted before every request.
    #[must_use]
    pub fn network(&self) -> &NetworkSwitch {
        &self.network
    }

    /// Get client statistics.
    #[must_use]
    pub fn stats(&self) -> &HttpClientStats {
        &self.stats
    }

    fn get_rate_limiter(&self, host: &str) -> Arc<HostRateLimiter> {
        self.rate_limiters
            .entry(host.to_string())
            .or_insert_with(|| {
                let quota = Quota::per_second(
                    NonZeroU32::new(self.config.rate_limit_per_host).unwrap_or(NonZeroU32::MIN),
                );
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }

    async fn prepare(&self, url: &Url, auth: Option<&Credentials>) -> Result<RequestBuilder> {
        if self.network.ensure_enabled(url.as_str()).is_err() {
            self.stats.refused.fetch_add(1, Ordering::Relaxed);
            return Err(RepositoryError::NetworkDisabled {
                url: url.to_string(),
            });
        }
        let host = url.host_str().ok_or_else(|| RepositoryError::InvalidUrl {
            url: url.to_string(),
            message: "No host in URL".into(),
        })?;
        self.get_rate_limiter(host).until_ready().await;

        let request = self.client.get(url.clone());
        Ok(match auth {
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(Credentials::Bearer(token)) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response> {
        let url_str = url.to_string();
        let start = Instant::now();
        let result = request.send().await;
        self.stats.record_request(start.elapsed());

        let response = result.map_err(|e| {
            self.stats.server_errors.fetch_add(1, Ordering::Relaxed);
            if e.is_timeout() {
                RepositoryError::Timeout {
                    url: url_str.clone(),
                    timeout_secs: self.config.timeout.as_secs(),
                }
            } else if e.is_connect() {
                RepositoryError::Unavailable {
                    url: url_str.clone(),
                    message: "Connection failed".into(),
                }
            } else {
                RepositoryError::UpstreamFetch {
                    url: url_str.clone(),
                    message: e.to_string(),
                    status: None,
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            self.stats.successes.fetch_add(1, Ordering::Relaxed);
            return Ok(response);
        }

        if status.is_client_error() {
            self.stats.client_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.server_errors.fetch_add(1, Ordering::Relaxed);
        }
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => RepositoryError::RateLimited {
                url: url_str,
                retry_after: response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok()),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RepositoryError::AuthFailed { url: url_str }
            }
            StatusCode::NOT_FOUND => RepositoryError::UpstreamFetch {
                url: url_str,
                message: "Not found".into(),
                status: Some(404),
            },
            _ => RepositoryError::UpstreamFetch {
                url: url_str,
                message: format!("Unexpected status: {status}"),
                status: Some(status.as_u16()),
            },
        })
    }

    /// GET a document. Any non-2xx status is an error.
    ///
    /// # Errors
    /// Returns error if the network is disabled, the request fails or the
    /// status is not a success.
    pub async fn get(&self, url: &Url, auth: Option<&Credentials>) -> Result<HttpResponse> {
        let request = self.prepare(url, auth).await?;
        let response = self.send(url, request).await?;
        let status = response.status();
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .await
            .map_err(|e| RepositoryError::UpstreamFetch {
                url: url.to_string(),
                message: format!("Failed to read body: {e}"),
                status: None,
            })?;
        self.stats
            .bytes_received
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "fetched");

        Ok(HttpResponse {
            body,
            status,
            last_modified,
        })
    }

    /// Stream a file to `dest`, replacing it atomically once complete.
    ///
    /// # Errors
    /// Returns error if the request fails or the file cannot be written.
    pub async fn download(
        &self,
        url: &Url,
        auth: Option<&Credentials>,
        dest: &Path,
    ) -> Result<DownloadedFile> {
        let request = self.prepare(url, auth).await?;
        let mut response = self.send(url, request).await?;

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| RepositoryError::io(parent, e))?;
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| RepositoryError::io(parent, e))?;

        let mut hasher = Sha1::new();
        let mut size = 0u64;
        while let Some(chunk) =
            response
                .chunk()
                .await
                .map_err(|e| RepositoryError::UpstreamFetch {
                    url: url.to_string(),
                    message: format!("Failed to read body: {e}"),
                    status: None,
                })?
        {
            hasher.update(&chunk);
            size += chunk.len() as u64;
            temp.write_all(&chunk)
                .map_err(|e| RepositoryError::io(dest, e))?;
        }
        temp.flush().map_err(|e| RepositoryError::io(dest, e))?;
        temp.persist(dest)
            .map_err(|e| RepositoryError::io(dest, e.error))?;

        self.stats.bytes_received.fetch_add(size, Ordering::Relaxed);
        info!(url = %url, path = %dest.display(), size, "downloaded dist");
        Ok(DownloadedFile {
            size,
            sha1: hex::encode(hasher.finalize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(HttpClientConfig::default(), NetworkSwitch::new()).unwrap()
    }

    #[test]
    fn test_client_config_default() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("Cantata/"));
    }

    #[tokio::test]
    async fn test_get_and_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client();
        let base = Url::parse(&server.uri()).unwrap();

        let ok = client.get(&base.join("packages.json").unwrap(), None).await.unwrap();
        assert_eq!(ok.body, "{}");

        let err = client.get(&base.join("missing.json").unwrap(), None).await.unwrap_err();
        assert!(err.is_not_found());

        let err = client.get(&base.join("broken.json").unwrap(), None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::UpstreamFetch { status: Some(503), .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bearer_auth_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .and(header_eq("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/packages.json", server.uri())).unwrap();
        let auth = Credentials::Bearer("s3cret".into());
        assert!(client().get(&url, Some(&auth)).await.is_ok());
        assert!(client().get(&url, None).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_network_refuses() {
        let switch = NetworkSwitch::new();
        let client = HttpClient::new(HttpClientConfig::default(), switch.clone()).unwrap();
        let _guard = switch.disable();
        let url = Url::parse("http://127.0.0.1:9/packages.json").unwrap();
        let err = client.get(&url, None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NetworkDisabled { .. }));
        assert_eq!(client.stats().refused.load(Ordering::Relaxed), 1);
        assert_eq!(client.stats().requests.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_download_hashes_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dist/a.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/a.zip");
        let url = Url::parse(&format!("{}/dist/a.zip", server.uri())).unwrap();
        let file = client().download(&url, None, &dest).await.unwrap();
        assert_eq!(file.size, 3);
        assert_eq!(file.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
    }
}
