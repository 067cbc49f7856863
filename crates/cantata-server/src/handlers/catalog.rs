//! Local catalog endpoints.

use super::{file_response, json_response, parse_hashed, parse_v2};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::Response;
use cantata_core::JsonValue;
use cantata_repository::LocalCatalog;
use cantata_repository::catalog::local_source_path;
use std::sync::Arc;
use tracing::debug;

fn catalog(state: &AppState) -> ApiResult<&Arc<LocalCatalog>> {
    state
        .catalog
        .as_ref()
        .ok_or_else(|| ApiError::not_found("local catalog"))
}

/// GET /packages.json
pub async fn root(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(json_response(catalog(&state)?.root()))
}

/// GET /p/{file}: the provider listing shard.
pub async fn provider_listing(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> ApiResult<Response> {
    let catalog = catalog(&state)?;
    match parse_hashed(&file) {
        Some(("providers", Some(hash))) => Ok(json_response(catalog.provider_listing(hash)?)),
        _ => Err(ApiError::not_found(format!("p/{file}"))),
    }
}

/// GET /p/{vendor}/{file}: a hashed v1 provider file.
pub async fn provider(
    State(state): State<AppState>,
    Path((vendor, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    let catalog = catalog(&state)?;
    let Some((package, Some(hash))) = parse_hashed(&file) else {
        return Err(ApiError::not_found(format!("p/{vendor}/{file}")));
    };
    Ok(json_response(catalog.provider(&format!("{vendor}/{package}"), hash)?))
}

/// GET /p2/{vendor}/{file}: v2 metadata.
pub async fn metadata(
    State(state): State<AppState>,
    Path((vendor, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    let catalog = catalog(&state)?;
    let (package, dev) =
        parse_v2(&file).ok_or_else(|| ApiError::not_found(format!("p2/{vendor}/{file}")))?;
    Ok(json_response(catalog.package_metadata(&format!("{vendor}/{package}"), dev)?))
}

/// GET /zipball/{vendor}/{package}/{reference}.zip: an archive generated
/// from a local checkout.
pub async fn zipball(
    State(state): State<AppState>,
    Path((vendor, package, file)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let catalog = catalog(&state)?;
    let name = format!("{vendor}/{package}");
    let not_found = || ApiError::not_found(format!("zipball/{name}/{file}"));
    let reference = file.strip_suffix(".zip").ok_or_else(not_found)?;
    let meta: &JsonValue = catalog.find_by_reference(&name, reference).ok_or_else(not_found)?;
    let source = local_source_path(meta).ok_or_else(not_found)?;

    let dest = state
        .archive_dir
        .join(vendor.to_lowercase())
        .join(package.to_lowercase())
        .join(format!("{reference}.zip"));
    if !dest.is_file() {
        let network = state.network.fork();
        let reference = reference.to_string();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || {
            cantata_archive::archive_source(&source, &reference, &target, &network)
        })
        .await
        .map_err(|e| ApiError::from(cantata_core::Error::archive(e.to_string(), None)))??;
    } else {
        debug!(path = %dest.display(), "archive hit");
    }
    file_response(&dest, "application/zip").await
}
