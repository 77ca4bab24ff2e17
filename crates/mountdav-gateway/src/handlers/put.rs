use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, TryStreamExt};
use tracing::info;

use super::{header_str, DavContext, MountTarget};
use crate::cache::invalidate_key;
use crate::error::{DavError, Result};
use crate::upload::strategy::{declared_length, ClientHints};
use crate::upload::{UploadEngine, UploadRequest};

/// PUT: stream the body into the backend through the upload engine.
pub(super) async fn handle(
    ctx: &DavContext,
    target: &MountTarget,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response> {
    if target.is_mount_root() || ctx.path.collection_hint {
        return Err(DavError::MethodNotAllowed(format!(
            "cannot PUT to collection {}",
            ctx.path.path
        )));
    }

    let key = target.file_key();
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str())
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| ctx.state.content_types.content_type_for(ctx.path.name()));

    let request = UploadRequest {
        store: target.store.clone(),
        mount_id: target.mount.id.clone(),
        key: key.clone(),
        content_type: Some(content_type),
        declared_length: declared_length(headers),
        hints: ClientHints::from_headers(headers),
    };
    let inbound = body
        .into_data_stream()
        .map_err(std::io::Error::other)
        .boxed();

    let engine = UploadEngine {
        policy: &ctx.state.settings.upload,
        sessions: &ctx.state.uploads,
        http_client: &ctx.state.http_client,
    };
    let strategy = engine.ingest(request, inbound).await?;

    invalidate_key(&ctx.state.listing_cache, target.backend(), &key).await;
    ctx.touch(&target.mount).await;

    info!(
        mount = %target.mount.id,
        key = %key,
        ?strategy,
        principal = %ctx.principal.id,
        "Stored object"
    );
    Ok(StatusCode::CREATED.into_response())
}
