use std::time::Duration;

use async_trait::async_trait;

use crate::store::ObjectMeta;

/// Cache key for one directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    /// [`ObjectStore::identity`](crate::ObjectStore::identity) of the backend
    pub backend: String,
    /// Normalized listing prefix (`""` or ending with `/`)
    pub prefix: String,
}

impl ListingKey {
    pub fn new(backend: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            prefix: prefix.into(),
        }
    }
}

/// One child of a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingEntry {
    Object(ObjectMeta),
    /// A sub-directory, as a full prefix ending with `/`
    Prefix(String),
}

/// One level of a directory, as collected by PROPFIND.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryListing {
    pub entries: Vec<ListingEntry>,
    /// Collection stopped at the item cap or page ceiling
    pub truncated: bool,
    /// Item cap the listing was collected under
    pub limit: usize,
}

/// Directory-listing cache.
///
/// Writers call `invalidate` for every prefix whose contents they changed and
/// `invalidate_tree` when a whole subtree moved or disappeared.
#[async_trait]
pub trait ListingCache: Send + Sync {
    async fn get(&self, key: &ListingKey) -> Option<DirectoryListing>;

    /// Store a listing. `ttl` shortens the cache-wide lifetime for this entry.
    async fn put(&self, key: ListingKey, listing: DirectoryListing, ttl: Option<Duration>);

    async fn invalidate(&self, key: &ListingKey);

    /// Drop every entry of `backend` whose prefix starts with `prefix`.
    async fn invalidate_tree(&self, backend: &str, prefix: &str);
}
