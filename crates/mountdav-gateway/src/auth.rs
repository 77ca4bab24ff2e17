//! Request authentication.
//!
//! Credentials come from `Authorization: Basic` or `Bearer`. Clients that
//! drop credentials between requests (some OS mini-redirectors do) are
//! recognised by client IP + User-Agent for a limited time; the short-circuit
//! is only consulted when a request carries no `Authorization` header at all.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use moka::future::Cache;
use mountdav_core::{CredentialVerifier, Credentials, Principal, PrincipalKind};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{DavError, Result};

/// Auth short-circuit key: client IP and a hash of its User-Agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthCacheKey {
    pub client_ip: String,
    pub user_agent_hash: String,
}

impl AuthCacheKey {
    pub fn new(client_ip: &str, user_agent: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(user_agent.unwrap_or("").as_bytes());
        Self {
            client_ip: client_ip.to_string(),
            user_agent_hash: hex::encode(hasher.finalize()),
        }
    }
}

/// Recently authenticated clients.
#[derive(Clone)]
pub struct AuthCache {
    inner: Cache<AuthCacheKey, Principal>,
}

impl AuthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Record a successful authentication. Re-inserting restarts the TTL,
    /// so the window always counts from the latest credentialed request.
    async fn remember(&self, key: AuthCacheKey, principal: Principal) {
        self.inner.insert(key, principal).await;
    }

    pub async fn principal(&self, key: &AuthCacheKey) -> Option<Principal> {
        self.inner.get(key).await
    }

    pub async fn evict(&self, key: &AuthCacheKey) {
        self.inner.invalidate(key).await;
    }
}

/// Parse the `Authorization` header. Absent is `Ok(None)`; present but
/// unusable is 401.
pub fn credentials_from_headers(headers: &HeaderMap) -> Result<Option<Credentials>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| DavError::Unauthorized)?.trim();
    let (scheme, rest) = value.split_once(' ').ok_or(DavError::Unauthorized)?;
    let rest = rest.trim();

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD.decode(rest).map_err(|_| DavError::Unauthorized)?;
        let decoded = String::from_utf8(decoded).map_err(|_| DavError::Unauthorized)?;
        let (username, password) = decoded.split_once(':').ok_or(DavError::Unauthorized)?;
        Ok(Some(Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }))
    } else if scheme.eq_ignore_ascii_case("bearer") && !rest.is_empty() {
        Ok(Some(Credentials::Bearer(rest.to_string())))
    } else {
        Err(DavError::Unauthorized)
    }
}

/// Client address: first `X-Forwarded-For` hop, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Authenticate one request.
pub async fn authenticate(
    verifier: &Arc<dyn CredentialVerifier>,
    cache: &AuthCache,
    headers: &HeaderMap,
    client_ip: &str,
) -> Result<Principal> {
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok());
    let key = AuthCacheKey::new(client_ip, user_agent);

    match credentials_from_headers(headers)? {
        Some(credentials) => {
            let Some(principal) = verifier.verify(&credentials).await else {
                debug!(client_ip, "Rejected credentials");
                return Err(DavError::Unauthorized);
            };
            cache.remember(key, principal.clone()).await;
            Ok(principal)
        }
        None => {
            let principal = cache.principal(&key).await.ok_or(DavError::Unauthorized)?;
            if principal.kind == PrincipalKind::ApiKey && !verifier.revalidate(&principal).await {
                warn!(client_ip, principal = %principal.id, "Cached API key no longer valid");
                cache.evict(&key).await;
                return Err(DavError::Unauthorized);
            }
            debug!(client_ip, principal = %principal.id, "Authenticated from cache");
            Ok(principal)
        }
    }
}
