//! HTTP handlers for object operations.
//! Streams object bodies in both directions and delegates storage concerns
//! to `ObjectStore`.

use crate::{errors::AppError, services::storage_service::UploadOptions, state::AppState};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io, time::Duration};

/// Prefix of request headers forwarded as user metadata.
const USER_METADATA_PREFIX: &str = "x-amz-meta-";
const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 3600;

#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
    pub location: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub key: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub url: String,
    pub expires_in: u64,
}

/// PUT `/objects/{*key}` — stream the request body into the store.
pub async fn upload_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| {
            AppError::new(
                StatusCode::LENGTH_REQUIRED,
                "Content-Length header is required",
            )
        })?;

    let options = UploadOptions {
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        metadata: user_metadata(&headers),
    };

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));

    let location = state
        .storage
        .upload_stream(&key, stream, content_length, options)
        .await?;

    Ok((StatusCode::CREATED, Json(UploadResponse { key, location })))
}

/// GET `/objects/{*key}` — download as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let object = state.storage.download_stream(&key).await?;

    let content_type = object
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let content_length = object.content_length;

    let mut response = Response::new(Body::from_stream(object));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    Ok(response)
}

/// HEAD `/objects/{*key}` — 200 when present, 404 otherwise.
pub async fn head_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.storage.exists(&key).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// DELETE `/objects/{*key}` — reports whether anything was removed.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state.storage.delete(&key).await?;
    Ok(Json(DeleteResponse { key, deleted }))
}

/// GET `/objects` — list objects, supports ?prefix=
pub async fn list_objects(
    State(state): State<AppState>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let objects = state.storage.list(q.prefix.as_deref()).await?;
    Ok(Json(objects))
}

/// GET `/presign/{*key}` — time-limited download URL, supports ?expires_in=
pub async fn presign_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<PresignQuery>,
) -> Result<Json<PresignResponse>, AppError> {
    let expires_in = q.expires_in.unwrap_or(DEFAULT_PRESIGN_EXPIRY_SECS);
    let url = state
        .storage
        .presigned_url(&key, Duration::from_secs(expires_in))
        .await?;
    Ok(Json(PresignResponse { url, expires_in }))
}

/// Collect `x-amz-meta-*` headers, prefix stripped. `None` when there are none.
fn user_metadata(headers: &HeaderMap) -> Option<HashMap<String, String>> {
    let metadata: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix(USER_METADATA_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    (!metadata.is_empty()).then_some(metadata)
}
