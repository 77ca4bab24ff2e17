use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mountdav_core::{BackendError, ObjectMeta};
use tracing::debug;

use super::{directory_exists, header_str, DavContext, MountTarget};
use crate::conditional::{self, Precondition};
use crate::error::{DavError, Result};
use crate::xml;

/// Error for a file key that does not exist: 405 when a directory lives
/// there instead, 404 otherwise.
async fn missing(target: &MountTarget, path: &str, error: BackendError) -> DavError {
    if !error.is_not_found() {
        return error.into();
    }
    match directory_exists(target.store.as_ref(), &target.dir_prefix()).await {
        Ok(true) => DavError::MethodNotAllowed(format!("{} is a collection", path)),
        Ok(false) => DavError::NotFound(path.to_string()),
        Err(e) => e,
    }
}

fn set_representation_headers(response: &mut Response, meta: &ObjectMeta, content_type: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(etag) = meta.etag.as_deref().and_then(|e| HeaderValue::from_str(e).ok()) {
        headers.insert(header::ETAG, etag);
    }
    if let Some(modified) = meta
        .last_modified
        .and_then(|dt| HeaderValue::from_str(&xml::http_date(dt)).ok())
    {
        headers.insert(header::LAST_MODIFIED, modified);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
}

/// GET and HEAD on a file inside a mount.
pub(super) async fn handle(
    ctx: &DavContext,
    target: &MountTarget,
    headers: &HeaderMap,
    head_only: bool,
) -> Result<Response> {
    if target.is_mount_root() || ctx.path.collection_hint {
        return Err(DavError::MethodNotAllowed(format!(
            "{} is a collection",
            ctx.path.path
        )));
    }

    let key = target.file_key();
    let store = target.store.as_ref();
    let (meta, data) = if head_only {
        match store.head(&key).await {
            Ok(meta) => (meta, None),
            Err(e) => return Err(missing(target, &ctx.path.path, e).await),
        }
    } else {
        match store.get(&key).await {
            Ok(data) => (data.meta.clone(), Some(data)),
            Err(e) => return Err(missing(target, &ctx.path.path, e).await),
        }
    };

    let content_type = meta
        .content_type
        .clone()
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| ctx.state.content_types.content_type_for(ctx.path.name()));

    match conditional::evaluate(headers, meta.etag.as_deref(), meta.last_modified) {
        Precondition::Proceed => {}
        Precondition::NotModified => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            set_representation_headers(&mut response, &meta, &content_type);
            response.headers_mut().remove(header::CONTENT_TYPE);
            return Ok(response);
        }
        Precondition::Failed => {
            return Err(DavError::PreconditionFailed(format!(
                "{} does not match the request preconditions",
                ctx.path.path
            )))
        }
    }

    ctx.touch(&target.mount).await;

    let Some(data) = data else {
        let mut response = StatusCode::OK.into_response();
        set_representation_headers(&mut response, &meta, &content_type);
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
        return Ok(response);
    };

    if let Some(range) =
        header_str(headers, "range").and_then(|v| conditional::parse_range(v, meta.size))
    {
        let bytes = data.into_bytes().await?;
        let mut response = if (range.end as usize) < bytes.len() {
            debug!(key = %key, start = range.start, end = range.end, "Serving byte range");
            let mut response = (
                StatusCode::PARTIAL_CONTENT,
                bytes.slice(range.start as usize..=range.end as usize),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&range.content_range(meta.size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        } else {
            debug!(key = %key, "Object shorter than its metadata, serving it whole");
            (StatusCode::OK, bytes).into_response()
        };
        set_representation_headers(&mut response, &meta, &content_type);
        return Ok(response);
    }

    let mut response = (StatusCode::OK, Body::from_stream(data.body)).into_response();
    set_representation_headers(&mut response, &meta, &content_type);
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
    Ok(response)
}
