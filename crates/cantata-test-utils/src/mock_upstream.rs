//! A mock upstream Composer repository on top of wiremock.

use crate::fixtures::Fixtures;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Upstream repository serving whatever documents a test registers.
#[derive(Debug)]
pub struct MockUpstream {
    server: MockServer,
}

impl MockUpstream {
    /// Start an empty upstream.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// The underlying wiremock server, for custom expectations.
    #[must_use]
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `body` at `at` with the exact bytes hashed. Returns the sha256
    /// of the served bytes.
    pub async fn serve_json(&self, at: &str, body: &Value) -> String {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        let hash = hex::encode(Sha256::digest(&bytes));
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_bytes(bytes),
            )
            .mount(&self.server)
            .await;
        hash
    }

    /// Respond to `at` with `status` and no body.
    pub async fn serve_status(&self, at: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve the v2-only root document.
    pub async fn serve_v2_root(&self) {
        self.serve_json("/packages.json", &Fixtures::v2_root()).await;
    }

    /// Serve the stable and dev v2 metadata files of a package.
    pub async fn add_v2_package(&self, name: &str, versions: &[Value]) {
        let (dev, stable): (Vec<Value>, Vec<Value>) = versions.iter().cloned().partition(|v| {
            v.get("version")
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with("dev-") || s.ends_with("-dev"))
        });
        self.serve_json(&format!("/p2/{name}.json"), &Fixtures::v2_package(name, &stable))
            .await;
        self.serve_json(&format!("/p2/{name}~dev.json"), &Fixtures::v2_package(name, &dev))
            .await;
    }

    /// Serve a hashed v1 repository: provider files, one provider-includes
    /// listing and the root document pointing at it.
    pub async fn serve_v1_root(&self, packages: &[(&str, Vec<Value>)]) {
        let mut listing = serde_json::Map::new();
        for (name, versions) in packages {
            let body = Fixtures::v1_provider(name, versions);
            let bytes = serde_json::to_vec(&body).unwrap_or_default();
            let hash = hex::encode(Sha256::digest(&bytes));
            self.serve_json(&format!("/p/{name}${hash}.json"), &body).await;
            listing.insert((*name).to_string(), json!({ "sha256": hash }));
        }
        let listing = json!({ "providers": listing });
        let bytes = serde_json::to_vec(&listing).unwrap_or_default();
        let listing_hash = hex::encode(Sha256::digest(&bytes));
        self.serve_json(&format!("/p/provider-latest${listing_hash}.json"), &listing)
            .await;
        self.serve_json(
            "/packages.json",
            &json!({
                "packages": [],
                "providers-url": "/p/%package%$%hash%.json",
                "provider-includes": {
                    "p/provider-latest$%hash%.json": { "sha256": listing_hash }
                }
            }),
        )
        .await;
    }

    /// Serve the change feed.
    pub async fn serve_changes(&self, body: &Value) {
        self.serve_json("/metadata/changes.json", body).await;
    }

    /// Requests received for `at` so far.
    pub async fn requests_to(&self, at: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == at)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn served_hash_matches_body() {
        let upstream = MockUpstream::start().await;
        let hash = upstream.serve_json("/x.json", &json!({"a": 1})).await;
        let body = reqwest::get(format!("{}/x.json", upstream.url()))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(hex::encode(Sha256::digest(&body)), hash);
        assert_eq!(upstream.requests_to("/x.json").await, 1);
    }
}
