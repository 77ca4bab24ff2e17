//! Directory-listing cache and the invalidation rules writers follow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use mountdav_core::{DirectoryListing, ListingCache, ListingKey};
use tracing::debug;

#[derive(Clone)]
struct CachedListing {
    listing: DirectoryListing,
    expires_at: Instant,
}

/// [`ListingCache`] over a moka cache.
///
/// The cache-wide TTL bounds every entry; a mount's own `cache_ttl` can only
/// shorten it.
pub struct MokaListingCache {
    inner: Cache<ListingKey, CachedListing>,
    ttl: Duration,
}

impl MokaListingCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }
}

#[async_trait]
impl ListingCache for MokaListingCache {
    async fn get(&self, key: &ListingKey) -> Option<DirectoryListing> {
        let cached = self.inner.get(key).await?;
        if cached.expires_at <= Instant::now() {
            self.inner.invalidate(key).await;
            return None;
        }
        Some(cached.listing)
    }

    async fn put(&self, key: ListingKey, listing: DirectoryListing, ttl: Option<Duration>) {
        let ttl = ttl.map_or(self.ttl, |t| t.min(self.ttl));
        if ttl.is_zero() {
            return;
        }
        self.inner
            .insert(
                key,
                CachedListing {
                    listing,
                    expires_at: Instant::now() + ttl,
                },
            )
            .await;
    }

    async fn invalidate(&self, key: &ListingKey) {
        self.inner.invalidate(key).await;
    }

    async fn invalidate_tree(&self, backend: &str, prefix: &str) {
        let stale: Vec<ListingKey> = self
            .inner
            .iter()
            .filter(|(key, _)| key.backend == backend && key.prefix.starts_with(prefix))
            .map(|(key, _)| (*key).clone())
            .collect();
        debug!(backend, prefix, entries = stale.len(), "Invalidating listing subtree");
        for key in stale {
            self.inner.invalidate(&key).await;
        }
    }
}

/// Listing prefix that contains `key`: `a/b/c.txt` and `a/b/c/` both live in `a/b/`.
pub fn parent_prefix(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => trimmed[..=idx].to_string(),
        None => String::new(),
    }
}

/// Drop every listing a write of `key` can change: each ancestor directory
/// up to the bucket root (a deep write may have brought any of them into
/// existence) and, for directory markers, the directory itself.
pub async fn invalidate_key(cache: &Arc<dyn ListingCache>, backend: &str, key: &str) {
    if key.ends_with('/') {
        cache.invalidate(&ListingKey::new(backend, key)).await;
    }
    let mut prefix = parent_prefix(key);
    loop {
        cache.invalidate(&ListingKey::new(backend, prefix.as_str())).await;
        if prefix.is_empty() {
            break;
        }
        prefix = parent_prefix(&prefix);
    }
}

/// Drop every listing under a directory that moved or disappeared, plus its parents.
pub async fn invalidate_directory(cache: &Arc<dyn ListingCache>, backend: &str, prefix: &str) {
    cache.invalidate_tree(backend, prefix).await;
    invalidate_key(cache, backend, prefix).await;
}
