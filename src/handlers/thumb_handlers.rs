//! Thumbnail endpoints: reorganise an asset, read its sizes, serve a
//! derivative.

use crate::{
    errors::AppError,
    models::{
        asset::{AssetId, is_valid_asset_name},
        size::Size,
        size_request::SizeParameter,
    },
    services::{layout_manager::LayoutResult, thumbnail_service::ThumbnailResponse},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct ReorganiseResponse {
    result: LayoutResult,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Unservable {
    Resize { source: Size, ideal: Size },
    Fallback { reason: String },
}

fn asset_id(customer: u32, space: u32, asset: String) -> Result<AssetId, AppError> {
    if !is_valid_asset_name(&asset) {
        return Err(AppError::bad_request(format!("invalid asset name `{}`", asset)));
    }
    Ok(AssetId::new(customer, space, asset))
}

/// A token cancelled when the request future is dropped, e.g. because the
/// client went away.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

/// `POST /thumbs/{customer}/{space}/{asset}/reorganise`
pub async fn reorganise(
    State(state): State<AppState>,
    Path((customer, space, asset)): Path<(u32, u32, String)>,
) -> Result<Json<impl Serialize>, AppError> {
    let id = asset_id(customer, space, asset)?;
    let (cancel, _guard) = request_token();

    let result = state
        .thumbnails
        .layout()
        .ensure_new_layout(&id, &cancel)
        .await?;

    if result == LayoutResult::AssetNotFound {
        return Err(AppError::not_found(format!("asset {} not found", id)));
    }
    Ok(Json(ReorganiseResponse { result }))
}

/// `GET /thumbs/{customer}/{space}/{asset}/sizes`
pub async fn get_sizes(
    State(state): State<AppState>,
    Path((customer, space, asset)): Path<(u32, u32, String)>,
) -> Result<Response, AppError> {
    let id = asset_id(customer, space, asset)?;
    match state.thumbnails.get_sizes(&id).await? {
        Some(manifest) => Ok(Json(manifest).into_response()),
        None => Err(AppError::not_found(format!("no sizes for {}", id))),
    }
}

/// `GET /thumbs/{customer}/{space}/{asset}/full/{size}/0/default.jpg`
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path((customer, space, asset, size)): Path<(u32, u32, String, String)>,
) -> Result<Response, AppError> {
    let id = asset_id(customer, space, asset)?;
    let request: SizeParameter = size.parse()?;
    let (cancel, _guard) = request_token();

    let unservable = match state.thumbnails.get_thumbnail(&id, &request, &cancel).await {
        ThumbnailResponse::Exact { body, .. } => {
            let mut headers = axum::http::HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.size_bytes.max(0)));
            if let Some(value) = body
                .etag
                .as_deref()
                .and_then(|e| HeaderValue::from_str(&format!("\"{}\"", e)).ok())
            {
                headers.insert(header::ETAG, value);
            }
            return Ok((StatusCode::OK, headers, Body::from_stream(body.stream)).into_response());
        }
        ThumbnailResponse::NotFound => {
            return Err(AppError::not_found(format!("asset {} not found", id)));
        }
        ThumbnailResponse::Resize { source, ideal } => Unservable::Resize { source, ideal },
        ThumbnailResponse::Fallback { reason } => Unservable::Fallback { reason },
    };

    Ok((StatusCode::NOT_FOUND, Json(unservable)).into_response())
}
