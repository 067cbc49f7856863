//! End-to-end tests of the HTTP surface against a mock upstream.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use cantata_config::{MirrorConfig, ServerConfig, SyncSettings};
use cantata_server::{AppState, create_router};
use cantata_test_utils::{Fixtures, MockUpstream};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestServer {
    router: Router,
    _cache: TempDir,
}

impl TestServer {
    fn new(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let cache = TempDir::new().unwrap();
        let mut config = ServerConfig {
            cache_dir: cache.path().to_path_buf(),
            sync: SyncSettings {
                enabled: false,
                ..SyncSettings::default()
            },
            ..ServerConfig::default()
        };
        configure(&mut config);
        let state = AppState::from_config(config).unwrap();
        Self {
            router: create_router(state),
            _cache: cache,
        }
    }

    fn mirror(alias: &str, upstream: &MockUpstream, lazy: bool) -> Self {
        let mirror = MirrorConfig {
            url: upstream.url(),
            lazy,
            ..MirrorConfig::default()
        };
        Self::new(|config| {
            config.mirrors.insert(alias.to_string(), mirror);
        })
    }

    async fn request(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.get_as(uri, "Composer/2.7.1 (Linux; PHP 8.3)").await
    }

    async fn get_as(&self, uri: &str, user_agent: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::get(uri)
            .header(header::USER_AGENT, user_agent)
            .body(Body::empty())
            .unwrap();
        self.request(request).await
    }

    async fn get_json(&self, uri: &str) -> Value {
        let (status, body) = self.get(uri).await;
        assert_eq!(status, StatusCode::OK, "GET {uri}: {}", String::from_utf8_lossy(&body));
        serde_json::from_slice(&body).unwrap()
    }
}

#[tokio::test]
async fn health() {
    let server = TestServer::new(|_| {});
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn mirror_root_is_rewritten_to_local_urls() {
    let upstream = MockUpstream::start().await;
    upstream.serve_v2_root().await;
    let server = TestServer::mirror("pkg", &upstream, true);

    let root = server.get_json("/mirror/pkg/packages.json").await;
    assert_eq!(root["metadata-url"], json!("/mirror/pkg/p2/%package%.json"));
    assert_eq!(root["providers-lazy-url"], json!("/mirror/pkg/p/%package%.json"));
    for hidden in ["search", "list", "providers-api", "metadata-changes-url", "notify-batch"] {
        assert!(root.get(hidden).is_none(), "{hidden} leaked");
    }
}

#[tokio::test]
async fn v2_metadata_is_passed_through() {
    let upstream = MockUpstream::start().await;
    upstream.serve_v2_root().await;
    upstream
        .add_v2_package("acme/foo", &Fixtures::versions("acme/foo"))
        .await;
    let server = TestServer::mirror("pkg", &upstream, true);

    let stable = server.get_json("/mirror/pkg/p2/acme/foo.json").await;
    assert_eq!(stable["packages"]["acme/foo"].as_array().unwrap().len(), 2);
    let dev = server.get_json("/mirror/pkg/p2/acme/foo~dev.json").await;
    assert_eq!(dev["packages"]["acme/foo"][0]["version"], json!("dev-main"));

    // Second read is served from cache.
    server.get_json("/mirror/pkg/p2/acme/foo.json").await;
    assert_eq!(upstream.requests_to("/p2/acme/foo.json").await, 1);
}

#[tokio::test]
async fn lazy_provider_is_built_from_v2_metadata() {
    let upstream = MockUpstream::start().await;
    upstream.serve_v2_root().await;
    upstream
        .add_v2_package("acme/foo", &Fixtures::versions("acme/foo"))
        .await;
    let server = TestServer::mirror("pkg", &upstream, true);

    let provider = server.get_json("/mirror/pkg/p/acme/foo.json").await;
    let versions = provider["packages"]["acme/foo"].as_object().unwrap();
    assert_eq!(versions.len(), 3);
    assert!(versions["dev-main"]["uid"].is_u64());
    assert!(versions["1.0.0"]["uid"].is_u64());
}

#[tokio::test]
async fn unknown_package_and_mirror_are_not_found() {
    let upstream = MockUpstream::start().await;
    upstream.serve_v2_root().await;
    let server = TestServer::mirror("pkg", &upstream, true);

    let (status, _) = server.get("/mirror/pkg/p2/acme/missing.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = server.get("/mirror/nope/packages.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["status"], json!("error"));
    let (status, _) = server.get("/mirror/pkg/p2/acme/foo.txt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway() {
    let upstream = MockUpstream::start().await;
    upstream.serve_status("/packages.json", 500).await;
    let server = TestServer::mirror("pkg", &upstream, true);

    let (status, _) = server.get("/mirror/pkg/packages.json").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn offline_server_refuses_upstream_requests() {
    let upstream = MockUpstream::start().await;
    upstream.serve_v2_root().await;
    let mirror = MirrorConfig {
        url: upstream.url(),
        lazy: true,
        ..MirrorConfig::default()
    };
    let server = TestServer::new(|config| {
        config.disable_network = true;
        config.mirrors.insert("pkg".into(), mirror);
    });

    let (status, _) = server.get("/mirror/pkg/packages.json").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(upstream.requests_to("/packages.json").await, 0);
}

#[tokio::test]
async fn hashed_v1_mirror_follows_provider_includes() {
    let upstream = MockUpstream::start().await;
    upstream
        .serve_v1_root(&[("acme/foo", Fixtures::versions("acme/foo"))])
        .await;
    let server = TestServer::mirror("pkg", &upstream, false);

    let (status, body) = server
        .get_as("/mirror/pkg/packages.json", "Composer/1.10.26")
        .await;
    assert_eq!(status, StatusCode::OK);
    let root: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(root["providers-url"], json!("/mirror/pkg/p/%package%$%hash%.json"));
    let listing_hash = root["provider-includes"]["p/provider-latest$%hash%.json"]["sha256"]
        .as_str()
        .unwrap()
        .to_string();

    let listing = server
        .get_json(&format!("/mirror/pkg/p/provider-latest${listing_hash}.json"))
        .await;
    let hash = listing["providers"]["acme/foo"]["sha256"].as_str().unwrap();

    let provider = server
        .get_json(&format!("/mirror/pkg/p/acme/foo${hash}.json"))
        .await;
    assert!(provider["packages"]["acme/foo"]["1.1.0"].is_object());

    let (status, _) = server
        .get(&format!("/mirror/pkg/p/acme/foo${}.json", "0".repeat(64)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resync_reports_root_change() {
    let upstream = MockUpstream::start().await;
    upstream.serve_v2_root().await;
    let server = TestServer::mirror("pkg", &upstream, true);

    let request = Request::post("/mirror/pkg/resync").body(Body::empty()).unwrap();
    let (status, body) = server.request(request).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["alias"], json!("pkg"));
    assert_eq!(report["root_changed"], json!(true));

    let request = Request::get("/mirror/pkg/resync").body(Body::empty()).unwrap();
    let (status, _) = server.request(request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn catalog_routes_are_not_found_without_catalog() {
    let server = TestServer::new(|_| {});
    let (status, _) = server.get("/packages.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn local_catalog_is_served() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("checkout");
    std::fs::create_dir_all(source.join("src")).unwrap();
    std::fs::write(source.join("composer.json"), r#"{"name": "acme/local"}"#).unwrap();
    std::fs::write(source.join("src/Lib.php"), "<?php\n").unwrap();
    let dump = dir.path().join("packages.json");
    std::fs::write(
        &dump,
        serde_json::to_vec(&Fixtures::catalog_dump("acme/local", &source.to_string_lossy()))
            .unwrap(),
    )
    .unwrap();
    let server = TestServer::new(|config| config.catalog_path = Some(dump));

    let root = server.get_json("/packages.json").await;
    assert_eq!(root["metadata-url"], json!("/p2/%package%.json"));
    let (listing_path, meta) = root["provider-includes"]
        .as_object()
        .unwrap()
        .iter()
        .next()
        .unwrap();
    assert!(listing_path.starts_with("p/providers$"));
    assert_eq!(
        listing_path,
        &format!("p/providers${}.json", meta["sha256"].as_str().unwrap())
    );

    let listing = server.get_json(&format!("/{listing_path}")).await;
    let hash = listing["providers"]["acme/local"]["sha256"].as_str().unwrap();
    let provider = server.get_json(&format!("/p/acme/local${hash}.json")).await;
    assert!(provider["packages"]["acme/local"]["1.0.0"]["uid"].is_u64());

    let (status, _) = server.get("/p/acme/local$deadbeef.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let stable = server.get_json("/p2/acme/local.json").await;
    assert_eq!(stable["packages"]["acme/local"][0]["version"], json!("1.0.0"));

    let (status, body) = server.get("/zipball/acme/local/1111111.zip").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..2], b"PK");
    let (status, _) = server.get("/zipball/acme/local/9999999.zip").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
