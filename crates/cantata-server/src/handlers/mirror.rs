//! Mirror endpoints under `/mirror/{alias}`.

use super::{
    api_version, archive_content_type, file_response, json_response, parse_hashed, parse_v2,
    request_host,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use cantata_repository::SyncReport;
use tracing::info;

/// GET /mirror/{alias}/packages.json
pub async fn root(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo = state.registry.get(&alias)?;
    let doc = repo
        .root_metadata(&request_host(&headers), api_version(&headers))
        .await?;
    Ok(json_response(&doc))
}

/// GET /mirror/{alias}/p/{file}: a provider-includes shard.
pub async fn shard(
    State(state): State<AppState>,
    Path((alias, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo = state.registry.get(&alias)?;
    let doc = repo
        .shard(&request_host(&headers), &format!("p/{file}"))
        .await?;
    Ok(json_response(&doc))
}

/// GET /mirror/{alias}/include/{file}: the include shard built by sync, or
/// an upstream `includes` file.
pub async fn include(
    State(state): State<AppState>,
    Path((alias, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo = state.registry.get(&alias)?;
    let doc = repo
        .shard(&request_host(&headers), &format!("include/{file}"))
        .await?;
    Ok(json_response(&doc))
}

/// GET /mirror/{alias}/p/{vendor}/{file}: a v1 provider file, hashed or not.
pub async fn provider(
    State(state): State<AppState>,
    Path((alias, vendor, file)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo = state.registry.get(&alias)?;
    let (package, hash) =
        parse_hashed(&file).ok_or_else(|| ApiError::not_found(format!("p/{vendor}/{file}")))?;
    let doc = repo
        .provider(&request_host(&headers), &format!("{vendor}/{package}"), hash)
        .await?;
    Ok(json_response(&doc))
}

/// GET /mirror/{alias}/p2/{vendor}/{file}: v2 metadata.
pub async fn metadata(
    State(state): State<AppState>,
    Path((alias, vendor, file)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo = state.registry.get(&alias)?;
    let (package, dev) =
        parse_v2(&file).ok_or_else(|| ApiError::not_found(format!("p2/{vendor}/{file}")))?;
    let doc = repo
        .package_metadata(&request_host(&headers), &format!("{vendor}/{package}"), dev)
        .await?;
    Ok(json_response(&doc))
}

/// GET /mirror/{alias}/zipball/{vendor}/{package}/{version}/ref{reference}.{type}
pub async fn zipball(
    State(state): State<AppState>,
    Path((alias, vendor, package, version, file)): Path<(String, String, String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo = state.registry.get(&alias)?;
    let (reference, kind) = file
        .strip_prefix("ref")
        .and_then(|rest| rest.rsplit_once('.'))
        .ok_or_else(|| ApiError::not_found(format!("zipball/{vendor}/{package}/{version}/{file}")))?;
    let path = state
        .dist
        .fetch(
            repo,
            &request_host(&headers),
            &format!("{vendor}/{package}"),
            &version,
            reference,
            kind,
        )
        .await?;
    file_response(&path, archive_content_type(kind)).await
}

/// POST /mirror/{alias}/resync: drop the cached root and sync now.
pub async fn resync(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SyncReport>> {
    let repo = state.registry.get(&alias)?;
    repo.invalidate(&request_host(&headers));
    let report = repo.sync().await?;
    info!(mirror = %alias, root_changed = report.root_changed, "resync requested");
    Ok(Json(report))
}
