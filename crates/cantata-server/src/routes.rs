//! Axum router configuration.

use crate::handlers::{catalog, mirror};
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Archives are already compressed.
    let dist_routes = Router::new()
        .route("/zipball/:vendor/:package/:file", get(catalog::zipball))
        .route(
            "/mirror/:alias/zipball/:vendor/:package/:version/:file",
            get(mirror::zipball),
        );

    let metadata_routes = Router::new()
        .route("/health", get(health_check))
        // Local catalog
        .route("/packages.json", get(catalog::root))
        .route("/p/:file", get(catalog::provider_listing))
        .route("/p/:vendor/:file", get(catalog::provider))
        .route("/p2/:vendor/:file", get(catalog::metadata))
        // Mirrors
        .route("/mirror/:alias/packages.json", get(mirror::root))
        .route("/mirror/:alias/p/:file", get(mirror::shard))
        .route("/mirror/:alias/p/:vendor/:file", get(mirror::provider))
        .route("/mirror/:alias/p2/:vendor/:file", get(mirror::metadata))
        .route("/mirror/:alias/include/:file", get(mirror::include))
        .route("/mirror/:alias/resync", post(mirror::resync))
        .layer(CompressionLayer::new());

    Router::new()
        .merge(dist_routes)
        .merge(metadata_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
