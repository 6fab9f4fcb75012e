//! HTTP handlers for raw objects in the thumbs bucket.
//!
//! The upstream pipeline deposits `low.jpg` and legacy renders here; any
//! stored object can be read back. Bodies are streamed in both directions.

use crate::{
    errors::AppError,
    models::object::{Object, ObjectLocation},
    services::object_store::{ObjectStore, StorageError},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;

/// `PUT /objects/{*key}`
pub async fn upload_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let location = ObjectLocation::new(state.thumbs_bucket(), key);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .store
        .upload_object_stream(&location, content_type, stream)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Some(value) = object.etag.as_deref().and_then(quoted_etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `GET /objects/{*key}`
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let location = ObjectLocation::new(state.thumbs_bucket(), key);
    let meta = state
        .store
        .get_object_metadata(&location)
        .await?
        .ok_or_else(|| StorageError::not_found(&location))?;
    let body = state
        .store
        .get_object(&location)
        .await?
        .ok_or_else(|| StorageError::not_found(&location))?;

    let mut response = Response::new(Body::from_stream(body.stream));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn quoted_etag(etag: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("\"{}\"", etag)).ok()
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Some(value) = meta.etag.as_deref().and_then(quoted_etag) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
