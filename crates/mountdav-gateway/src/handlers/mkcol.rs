use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::info;

use super::{directory_exists, ensure_parent, DavContext, MountTarget};
use crate::cache::invalidate_key;
use crate::error::{DavError, Result};

/// Largest MKCOL body read before giving up on it.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// MKCOL: write a directory marker. Idempotent for existing directories.
pub(super) async fn handle(ctx: &DavContext, target: &MountTarget, body: Body) -> Result<Response> {
    let unsupported =
        || DavError::UnsupportedMediaType("MKCOL request bodies are not supported".to_string());
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| unsupported())?;
    if !body.is_empty() {
        return Err(unsupported());
    }

    if target.is_mount_root() {
        return Ok(StatusCode::CREATED.into_response());
    }

    let store = target.store.as_ref();
    match store.head(&target.file_key()).await {
        Ok(_) => {
            return Err(DavError::MethodNotAllowed(format!(
                "{} already exists as a file",
                ctx.path.path
            )))
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let prefix = target.dir_prefix();
    if directory_exists(store, &prefix).await? {
        return Ok(StatusCode::CREATED.into_response());
    }

    ensure_parent(ctx, target, &target.sub_path).await?;
    store.put(&prefix, Bytes::new(), None).await?;
    invalidate_key(&ctx.state.listing_cache, target.backend(), &prefix).await;
    ctx.touch(&target.mount).await;

    info!(mount = %target.mount.id, prefix = %prefix, "Created collection");
    Ok(StatusCode::CREATED.into_response())
}
