//! MOVE and COPY inside one mount.
//!
//! Directory variants copy object by object, keeping each key's suffix
//! below the source prefix. There is no rollback: a failure part-way leaves
//! whatever was already transferred.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use mountdav_core::{ObjectStore, PermissionTier};
use tracing::{debug, info};

use super::delete::delete_tree;
use super::{directory_exists, ensure_parent, header_str, strip_prefix, DavContext, MountTarget};
use crate::cache::{invalidate_directory, invalidate_key};
use crate::error::{DavError, Result};
use crate::resolver::{decode_request_path, resolve, Resolution};

/// Path part of a `Destination` header, relative to the DAV prefix.
fn destination_path<'a>(value: &'a str, prefix: &str) -> Result<&'a str> {
    let path = match value.find("://") {
        Some(idx) => {
            let rest = &value[idx + 3..];
            rest.find('/').map_or("/", |slash| &rest[slash..])
        }
        None => value,
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    strip_prefix(path, prefix)
        .ok_or_else(|| DavError::BadGateway(format!("destination {} is outside the gateway", value)))
}

async fn file_exists(store: &dyn ObjectStore, key: &str) -> Result<bool> {
    match store.head(key).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Copy every object under `from` to the same suffix under `to`, deleting
/// each source right after its copy when `remove_source` is set.
async fn transfer_tree(
    store: &dyn ObjectStore,
    from: &str,
    to: &str,
    remove_source: bool,
) -> Result<usize> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = store.list(from, None, token.as_deref(), 1000).await?;
        keys.extend(page.objects.into_iter().map(|meta| meta.key));
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    for key in &keys {
        let Some(suffix) = key.strip_prefix(from) else {
            continue;
        };
        let target = format!("{}{}", to, suffix);
        debug!(from = %key, to = %target, "Transferring object");
        store.copy(key, &target).await?;
        if remove_source {
            store.delete(key).await?;
        }
    }
    Ok(keys.len())
}

pub(super) async fn handle(
    ctx: &DavContext,
    source: &MountTarget,
    headers: &HeaderMap,
    is_move: bool,
) -> Result<Response> {
    let verb = if is_move { "MOVE" } else { "COPY" };
    let raw = header_str(headers, "destination")
        .ok_or_else(|| DavError::BadRequest("missing Destination header".to_string()))?;
    let relative = destination_path(raw, &ctx.state.settings.prefix)?;
    let dest_path = decode_request_path(relative, &ctx.state.settings.path_rules)
        .map_err(|e| DavError::BadRequest(format!("invalid destination: {}", e)))?;

    if source.is_mount_root() {
        return Err(DavError::Forbidden(format!(
            "cannot {} a mount root",
            verb
        )));
    }

    let destination = match resolve(&dest_path.path, &ctx.mounts) {
        None => {
            return Err(DavError::BadGateway(format!(
                "destination {} is not on any mount",
                dest_path.path
            )))
        }
        Some(Resolution::Virtual(_)) => {
            return Err(DavError::Forbidden(format!(
                "destination {} is part of the read-only virtual tree",
                dest_path.path
            )))
        }
        Some(Resolution::Mount { mount, sub_path }) => {
            if sub_path.is_empty() {
                return Err(DavError::Forbidden(format!(
                    "destination {} is a mount root",
                    dest_path.path
                )));
            }
            if mount.id != source.mount.id {
                return Err(DavError::BadGateway(format!(
                    "cannot {} across mounts",
                    verb
                )));
            }
            ctx.mount_target(mount, sub_path).await?
        }
    };

    if !ctx.allows(&dest_path.path, PermissionTier::Operation).await {
        return Err(DavError::Forbidden(dest_path.path));
    }
    if dest_path.path == ctx.path.path {
        return Err(DavError::Forbidden(
            "source and destination are the same".to_string(),
        ));
    }

    let overwrite =
        !matches!(header_str(headers, "overwrite"), Some(v) if v.eq_ignore_ascii_case("f"));

    let store = source.store.as_ref();
    let cache = &ctx.state.listing_cache;
    let source_key = source.file_key();
    let source_prefix = source.dir_prefix();

    let source_is_dir = ctx.path.collection_hint || !file_exists(store, &source_key).await?;
    if source_is_dir && !directory_exists(store, &source_prefix).await? {
        return Err(DavError::NotFound(ctx.path.path.clone()));
    }

    let dest_key = destination.file_key();
    let dest_prefix = destination.dir_prefix();
    if source_is_dir && dest_prefix.starts_with(&source_prefix) {
        return Err(DavError::Forbidden(format!(
            "cannot {} a collection into itself",
            verb
        )));
    }

    let dest_file = file_exists(store, &dest_key).await?;
    let dest_dir = directory_exists(store, &dest_prefix).await?;
    let existed = dest_file || dest_dir;
    if existed && !overwrite {
        return Err(DavError::PreconditionFailed(format!(
            "{} exists and Overwrite is F",
            dest_path.path
        )));
    }

    // Overwrite: T replaces the destination entirely.
    if dest_file {
        store.delete(&dest_key).await?;
        invalidate_key(cache, destination.backend(), &dest_key).await;
    }
    if dest_dir {
        delete_tree(store, &dest_prefix).await?;
        invalidate_directory(cache, destination.backend(), &dest_prefix).await;
    }

    ensure_parent(ctx, &destination, &destination.sub_path).await?;

    if source_is_dir {
        let count = transfer_tree(store, &source_prefix, &dest_prefix, is_move).await?;
        if is_move {
            invalidate_directory(cache, source.backend(), &source_prefix).await;
        }
        invalidate_directory(cache, destination.backend(), &dest_prefix).await;
        info!(
            mount = %source.mount.id,
            from = %source_prefix,
            to = %dest_prefix,
            objects = count,
            "{} of collection finished",
            verb
        );
    } else {
        store.copy(&source_key, &dest_key).await?;
        if is_move {
            store.delete(&source_key).await?;
            invalidate_key(cache, source.backend(), &source_key).await;
        }
        invalidate_key(cache, destination.backend(), &dest_key).await;
        info!(
            mount = %source.mount.id,
            from = %source_key,
            to = %dest_key,
            "{} finished",
            verb
        );
    }

    ctx.touch(&source.mount).await;

    let status = if is_move || existed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CREATED
    };
    Ok(status.into_response())
}
