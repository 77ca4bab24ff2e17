use std::time::Duration;

use axum::http::{header, HeaderMap};

const MIB: u64 = 1024 * 1024;

/// Multipart uploads are limited to this many parts.
pub const MAX_PARTS: u64 = 10_000;

/// User-Agent fragments of clients known to send large or chunked bodies
/// with unreliable length information.
const LARGE_BODY_PRONE_AGENTS: &[&str] = &["Microsoft-WebDAV-MiniRedir", "WebDAVFS", "davfs2", "gvfs"];

/// Operator-selected upload mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UploadMode {
    /// Pick per request from the declared length
    #[default]
    Auto,
    Direct,
    Proxy,
    Multipart,
}

/// How one PUT body is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Declared length 0: write an empty object
    Empty,
    /// Buffer the whole body, one backend PUT
    Direct,
    /// Stream the body to a presigned backend URL
    Proxy,
    /// Chunked multipart upload
    Multipart,
}

/// Upload tuning, shared by every request.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub mode: UploadMode,
    pub small_threshold: u64,
    pub large_threshold: u64,
    pub part_size: u64,
    pub part_retries: u32,
    pub retry_base_delay: Duration,
    pub presign_ttl: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            mode: UploadMode::Auto,
            small_threshold: 10 * MIB,
            large_threshold: 50 * MIB,
            part_size: 8 * MIB,
            part_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            presign_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// What the request tells us about the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientHints {
    pub large_body_prone: bool,
}

impl ClientHints {
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        Self {
            large_body_prone: user_agent.is_some_and(|ua| {
                LARGE_BODY_PRONE_AGENTS
                    .iter()
                    .any(|agent| ua.contains(agent))
            }),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_user_agent(headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()))
    }
}

/// Declared body length: `Content-Length`, else `X-Expected-Entity-Length`.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    ["content-length", "x-expected-entity-length"]
        .iter()
        .find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
}

/// Pick the ingestion strategy for one PUT.
pub fn choose_strategy(
    declared_length: Option<u64>,
    hints: &ClientHints,
    policy: &UploadPolicy,
) -> Strategy {
    if declared_length == Some(0) {
        return Strategy::Empty;
    }
    match policy.mode {
        UploadMode::Direct => Strategy::Direct,
        UploadMode::Proxy => Strategy::Proxy,
        UploadMode::Multipart => Strategy::Multipart,
        UploadMode::Auto => {
            let divisor = if hints.large_body_prone { 4 } else { 1 };
            let small = policy.small_threshold / divisor;
            let large = policy.large_threshold / divisor;
            match declared_length {
                Some(len) if len > large => Strategy::Proxy,
                Some(len) if len <= small => Strategy::Direct,
                _ => Strategy::Multipart,
            }
        }
    }
}

/// Part size for a multipart upload: the configured size, raised to the
/// backend minimum and to whatever keeps the part count under [`MAX_PARTS`],
/// never above the backend maximum.
pub fn negotiate_part_size(
    configured: u64,
    backend_min: u64,
    backend_max: u64,
    declared: Option<u64>,
) -> u64 {
    let for_part_limit = declared.map_or(0, |len| len.div_ceil(MAX_PARTS));
    configured
        .max(backend_min)
        .max(for_part_limit)
        .min(backend_max.max(backend_min))
}

/// Largest object a multipart upload can produce with parts of at most `backend_max`.
pub fn max_upload_size(backend_max: u64) -> u64 {
    backend_max.saturating_mul(MAX_PARTS)
}
