//! Advisory LOCK/UNLOCK.
//!
//! Locks are never stored or enforced; they exist so clients that refuse to
//! write without one keep working.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::{header_str, DavContext};
use crate::error::{DavError, Result};
use crate::xml::{self, ActiveLock};

const DEFAULT_TIMEOUT_SECS: u64 = 3600;
/// Longest lock handed out; also what `Infinite` means
const MAX_TIMEOUT_SECS: u64 = 86_400;
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Seconds from a `Timeout` header: the first usable entry of
/// `Second-N, Infinite, ...`, capped at one day.
fn parse_timeout(value: Option<&str>) -> u64 {
    let Some(value) = value else {
        return DEFAULT_TIMEOUT_SECS;
    };
    value
        .split(',')
        .map(str::trim)
        .find_map(|entry| {
            if entry.eq_ignore_ascii_case("infinite") {
                Some(MAX_TIMEOUT_SECS)
            } else {
                entry
                    .get(..7)
                    .filter(|p| p.eq_ignore_ascii_case("second-"))
                    .and_then(|_| entry[7..].parse::<u64>().ok())
            }
        })
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .min(MAX_TIMEOUT_SECS)
}

pub(super) async fn lock(ctx: &DavContext, headers: &HeaderMap, body: Body) -> Result<Response> {
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| DavError::BadRequest(format!("unreadable LOCK body: {}", e)))?;
    let body = String::from_utf8_lossy(&body);

    let token = format!("opaquelocktoken:{}", uuid::Uuid::new_v4());
    let timeout_secs = parse_timeout(header_str(headers, "timeout"));
    let depth_infinity = header_str(headers, "depth") != Some("0");
    let root_href = ctx.href(&ctx.path.path, ctx.path.collection_hint);

    let document = xml::lock_discovery_document(&ActiveLock {
        token: &token,
        root_href: &root_href,
        owner: xml::lock_owner(&body),
        timeout_secs,
        depth_infinity,
    });
    debug!(path = %ctx.path.path, timeout_secs, "Granted advisory lock");

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, xml::CONTENT_TYPE)],
        document,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("<{}>", token)) {
        response.headers_mut().insert("lock-token", value);
    }
    Ok(response)
}

pub(super) fn unlock(headers: &HeaderMap) -> Result<Response> {
    if header_str(headers, "lock-token").is_none_or(str::is_empty) {
        return Err(DavError::BadRequest("missing Lock-Token header".to_string()));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(None), 3600);
        assert_eq!(parse_timeout(Some("Second-120")), 120);
        assert_eq!(parse_timeout(Some("second-604800")), 86_400);
        assert_eq!(parse_timeout(Some("Infinite, Second-4100000000")), 86_400);
        assert_eq!(parse_timeout(Some("Extension-1, Second-60")), 60);
        assert_eq!(parse_timeout(Some("garbage")), 3600);
    }

    #[test]
    fn test_unlock_requires_token() {
        assert!(unlock(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("lock-token", HeaderValue::from_static("<opaquelocktoken:x>"));
        assert_eq!(unlock(&headers).unwrap().status(), StatusCode::NO_CONTENT);
    }
}
