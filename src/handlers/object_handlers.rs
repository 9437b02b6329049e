//! Read-only HTTP access to published objects.
//! Bodies are streamed from disk. Objects without a public-read ACL are only
//! served against a valid, unexpired signature.

use crate::{errors::AppError, handlers::AppState, models::object::Object};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Query string of a signed URL.
#[derive(Debug, Default, Deserialize)]
pub struct SignatureQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// `GET /{bucket}/{*key}`
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignatureQuery>,
) -> Result<Response, AppError> {
    let (meta, file) = state.store.get_object_reader(&bucket, &key).await?;
    authorize(&state, &meta, &bucket, &key, &query)?;

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, &state.cors_allow_origin);
    Ok(response)
}

/// `HEAD /{bucket}/{*key}`
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignatureQuery>,
) -> Result<Response, AppError> {
    let meta = state.store.get_object_metadata(&bucket, &key).await?;
    authorize(&state, &meta, &bucket, &key, &query)?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, &state.cors_allow_origin);
    Ok(response)
}

fn authorize(
    state: &AppState,
    meta: &Object,
    bucket: &str,
    key: &str,
    query: &SignatureQuery,
) -> Result<(), AppError> {
    if meta.is_public() {
        return Ok(());
    }
    let (Some(expires), Some(signature)) = (query.expires, query.signature.as_deref()) else {
        return Err(AppError::forbidden("object is not public"));
    };
    // Signed URLs are issued for GET and also cover HEAD.
    if state
        .store
        .verify_signature("GET", bucket, key, expires, signature)
    {
        Ok(())
    } else {
        debug!(bucket, key, "rejected signature");
        Err(AppError::forbidden("invalid or expired signature"))
    }
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object, allow_origin: &str) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    let optional = [
        (header::CACHE_CONTROL, meta.cache_control.as_deref()),
        (header::CONTENT_ENCODING, meta.content_encoding.as_deref()),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, Some(allow_origin)),
    ];
    for (name, value) in optional {
        if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(name, value);
        }
    }

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
