use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mountdav_core::ObjectStore;
use tracing::{debug, info};

use super::{DavContext, MountTarget};
use crate::cache::{invalidate_directory, invalidate_key};
use crate::error::{DavError, Result};

/// Delete every object under `prefix`, marker included. Returns how many
/// objects were removed.
pub(super) async fn delete_tree(store: &dyn ObjectStore, prefix: &str) -> Result<usize> {
    let mut deleted = 0usize;
    let mut token: Option<String> = None;
    loop {
        let page = store.list(prefix, None, token.as_deref(), 1000).await?;
        for object in &page.objects {
            store.delete(&object.key).await?;
            deleted += 1;
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    debug!(prefix, deleted, "Deleted directory tree");
    Ok(deleted)
}

/// DELETE a file or a whole directory.
pub(super) async fn handle(ctx: &DavContext, target: &MountTarget) -> Result<Response> {
    if target.is_mount_root() {
        return Err(DavError::MethodNotAllowed(
            "a mount root cannot be deleted".to_string(),
        ));
    }

    let store = target.store.as_ref();
    let cache = &ctx.state.listing_cache;

    if !ctx.path.collection_hint {
        let key = target.file_key();
        match store.head(&key).await {
            Ok(_) => {
                store.delete(&key).await?;
                invalidate_key(cache, target.backend(), &key).await;
                ctx.touch(&target.mount).await;
                info!(mount = %target.mount.id, key = %key, "Deleted object");
                return Ok(StatusCode::NO_CONTENT.into_response());
            }
            // Clients often omit the trailing slash on directories.
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let prefix = target.dir_prefix();
    let deleted = delete_tree(store, &prefix).await?;
    if deleted == 0 {
        return Err(DavError::NotFound(ctx.path.path.clone()));
    }
    invalidate_directory(cache, target.backend(), &prefix).await;
    ctx.touch(&target.mount).await;
    info!(mount = %target.mount.id, prefix = %prefix, deleted, "Deleted directory");
    Ok(StatusCode::NO_CONTENT.into_response())
}
