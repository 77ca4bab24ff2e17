//! HTTP handlers for the gateway.
//!
//! Implements:
//! - GET /health - Health check endpoint
//! - Every WebDAV verb under the DAV prefix, through [`dav_handler`]
//!
//! A DAV request is handled in a fixed order: strip the prefix, decode the
//! path, authenticate, resolve against the caller's mounts, check the verb's
//! permission tier, then run the verb.

mod copy_move;
mod delete;
mod get;
mod lock;
mod mkcol;
mod options;
mod propfind;
mod proppatch;
mod put;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use mountdav_core::{Mount, ObjectStore, PermissionTier, Principal};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth;
use crate::cache::invalidate_key;
use crate::error::{DavError, ErrorFormat, Result};
use crate::resolver::{decode_request_path, resolve, RequestPath, Resolution, VirtualDirectory};
use crate::state::AppState;
use crate::upload::multipart::SessionInfo;
use crate::xml;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub mounts: usize,
    pub active_uploads: usize,
    pub uploads: Vec<SessionInfo>,
}

/// GET /health - Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        mounts: state.registry.mount_count(),
        active_uploads: state.uploads.active(),
        uploads: state.uploads.sessions(),
    })
}

/// The WebDAV verbs the gateway serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavMethod {
    Options,
    Propfind,
    Get,
    Head,
    Put,
    Delete,
    Mkcol,
    Move,
    Copy,
    Lock,
    Unlock,
    Proppatch,
}

impl DavMethod {
    pub fn parse(method: &Method) -> Option<Self> {
        Some(match method.as_str() {
            "OPTIONS" => Self::Options,
            "PROPFIND" => Self::Propfind,
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "MKCOL" => Self::Mkcol,
            "MOVE" => Self::Move,
            "COPY" => Self::Copy,
            "LOCK" => Self::Lock,
            "UNLOCK" => Self::Unlock,
            "PROPPATCH" => Self::Proppatch,
            _ => return None,
        })
    }

    pub fn error_format(self) -> ErrorFormat {
        match self {
            Self::Propfind | Self::Proppatch | Self::Lock | Self::Unlock => ErrorFormat::Xml,
            _ => ErrorFormat::Text,
        }
    }

    /// Tier required on the request path when it lies inside a mount.
    pub fn tier(self) -> PermissionTier {
        match self {
            Self::Options => PermissionTier::Navigation,
            Self::Propfind | Self::Get | Self::Head | Self::Copy => PermissionTier::Read,
            _ => PermissionTier::Operation,
        }
    }
}

/// A request path inside a mount, with the store behind it.
pub(crate) struct MountTarget {
    pub mount: Mount,
    /// Relative to the mount, empty for the mount root
    pub sub_path: String,
    pub store: Arc<dyn ObjectStore>,
}

impl MountTarget {
    pub fn is_mount_root(&self) -> bool {
        self.sub_path.is_empty()
    }

    pub fn file_key(&self) -> String {
        self.mount.object_key(&self.sub_path, false)
    }

    pub fn dir_prefix(&self) -> String {
        self.mount.directory_prefix(&self.sub_path)
    }

    /// Listing-cache identity of the backend.
    pub fn backend(&self) -> &str {
        self.store.identity()
    }
}

/// Per-request context shared by the verb handlers.
pub(crate) struct DavContext {
    pub state: AppState,
    pub principal: Principal,
    pub path: RequestPath,
    /// Mounts visible to the principal
    pub mounts: Vec<Mount>,
}

impl DavContext {
    /// Client-facing href for a virtual path.
    pub fn href(&self, path: &str, collection: bool) -> String {
        let mut href = format!("{}{}", self.state.settings.prefix, xml::encode_href(path));
        if collection && !href.ends_with('/') {
            href.push('/');
        }
        href
    }

    pub async fn allows(&self, path: &str, tier: PermissionTier) -> bool {
        self.state
            .permissions
            .allows(&self.principal, path, tier)
            .await
    }

    pub async fn mount_target(&self, mount: Mount, sub_path: String) -> Result<MountTarget> {
        let store = self.state.registry.store_for(&mount).await?;
        Ok(MountTarget {
            mount,
            sub_path,
            store,
        })
    }

    /// Record mount usage. Failures are logged and otherwise ignored.
    pub async fn touch(&self, mount: &Mount) {
        if let Err(e) = self.state.registry.touch_last_used(&mount.id).await {
            warn!(mount = %mount.id, error = %e, "Failed to record mount usage");
        }
    }
}

/// Virtual path of `name` inside `parent`.
pub(crate) fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Whether a directory prefix holds anything (its marker or any child).
pub(crate) async fn directory_exists(store: &dyn ObjectStore, prefix: &str) -> Result<bool> {
    if prefix.is_empty() {
        return Ok(true);
    }
    let page = store.list(prefix, Some("/"), None, 1).await?;
    Ok(!page.objects.is_empty() || !page.common_prefixes.is_empty())
}

/// Create the marker of the directory holding `sub_path` when it is missing.
pub(crate) async fn ensure_parent(
    ctx: &DavContext,
    target: &MountTarget,
    sub_path: &str,
) -> Result<()> {
    let Some((parent, _)) = sub_path.rsplit_once('/') else {
        // Directly below the mount root
        return Ok(());
    };
    let prefix = target.mount.directory_prefix(parent);
    if directory_exists(target.store.as_ref(), &prefix).await? {
        return Ok(());
    }
    debug!(key = %prefix, "Creating missing parent directory marker");
    target.store.put(&prefix, Bytes::new(), None).await?;
    invalidate_key(&ctx.state.listing_cache, target.backend(), &prefix).await;
    Ok(())
}

/// Request path relative to the DAV prefix, still percent-encoded.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(prefix)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

/// Fallback handler serving every WebDAV request.
pub async fn dav_handler(State(state): State<AppState>, req: Request) -> Response {
    let Some(method) = DavMethod::parse(req.method()) else {
        return DavError::MethodNotAllowed(req.method().to_string()).into_response();
    };
    match dispatch(state, method, req).await {
        Ok(response) => response,
        Err(e) => e.into_dav_response(method.error_format()),
    }
}

async fn dispatch(state: AppState, method: DavMethod, req: Request) -> Result<Response> {
    let raw_path = req.uri().path();
    let relative = strip_prefix(raw_path, &state.settings.prefix)
        .ok_or_else(|| DavError::NotFound(raw_path.to_string()))?;
    let path = decode_request_path(relative, &state.settings.path_rules)
        .map_err(|e| DavError::BadRequest(e.to_string()))?;

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = req.into_parts();
    let headers = &parts.headers;

    let client_ip = auth::client_ip(headers, peer);
    let principal =
        auth::authenticate(&state.verifier, &state.auth_cache, headers, &client_ip).await?;

    let mounts = state.registry.mounts_for(&principal).await?;
    let resolution =
        resolve(&path.path, &mounts).ok_or_else(|| DavError::NotFound(path.path.clone()))?;

    debug!(
        ?method,
        path = %path.path,
        principal = %principal.id,
        "Dispatching WebDAV request"
    );

    let ctx = DavContext {
        state,
        principal,
        path,
        mounts,
    };

    let target = match resolution {
        Resolution::Virtual(directory) => {
            return virtual_request(&ctx, method, &directory, headers).await
        }
        Resolution::Mount { mount, sub_path } => ctx.mount_target(mount, sub_path).await?,
    };

    if !ctx.allows(&ctx.path.path, method.tier()).await {
        return Err(DavError::Forbidden(ctx.path.path.clone()));
    }

    match method {
        DavMethod::Options => Ok(options::handle()),
        DavMethod::Propfind => propfind::mount_path(&ctx, &target, headers).await,
        DavMethod::Get => get::handle(&ctx, &target, headers, false).await,
        DavMethod::Head => get::handle(&ctx, &target, headers, true).await,
        DavMethod::Put => put::handle(&ctx, &target, headers, body).await,
        DavMethod::Delete => delete::handle(&ctx, &target).await,
        DavMethod::Mkcol => mkcol::handle(&ctx, &target, body).await,
        DavMethod::Move => copy_move::handle(&ctx, &target, headers, true).await,
        DavMethod::Copy => copy_move::handle(&ctx, &target, headers, false).await,
        DavMethod::Lock => lock::lock(&ctx, headers, body).await,
        DavMethod::Unlock => lock::unlock(headers),
        DavMethod::Proppatch => Ok(proppatch::handle(&ctx)),
    }
}

/// Requests on the root or a synthetic directory: browsing only.
async fn virtual_request(
    ctx: &DavContext,
    method: DavMethod,
    directory: &VirtualDirectory,
    headers: &HeaderMap,
) -> Result<Response> {
    if !ctx.allows(&directory.path, PermissionTier::Navigation).await {
        return Err(DavError::Forbidden(directory.path.clone()));
    }
    match method {
        DavMethod::Options => Ok(options::handle()),
        DavMethod::Propfind => propfind::virtual_directory(ctx, directory, headers).await,
        DavMethod::Get | DavMethod::Head => Err(DavError::MethodNotAllowed(
            "virtual directories have no content".to_string(),
        )),
        _ => Err(DavError::Forbidden(format!(
            "{} is part of the read-only virtual tree",
            directory.path
        ))),
    }
}
