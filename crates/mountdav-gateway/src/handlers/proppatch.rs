use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::DavContext;
use crate::xml;

/// PROPPATCH: acknowledge every property, persist nothing.
pub(super) fn handle(ctx: &DavContext) -> Response {
    debug!(path = %ctx.path.path, "Acknowledging PROPPATCH without storing properties");
    let href = ctx.href(&ctx.path.path, ctx.path.collection_hint);
    (
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, xml::CONTENT_TYPE)],
        xml::proppatch_document(&href),
    )
        .into_response()
}
