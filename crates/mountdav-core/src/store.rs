use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};

use crate::error::BackendError;

/// Smallest non-final part most S3-compatible services accept.
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest single part S3 accepts.
pub const DEFAULT_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Streaming object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full backend key (including the mount's root prefix)
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Entity tag as reported by the backend, quotes included
    pub etag: Option<String>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// Stored content type, if the backend returned one
    pub content_type: Option<String>,
}

impl ObjectMeta {
    /// Whether this object is a directory marker (a key ending in `/`).
    pub fn is_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// An object's metadata together with its body stream.
pub struct ObjectData {
    pub meta: ObjectMeta,
    pub body: ByteStream,
}

impl ObjectData {
    /// Drain the body into one contiguous buffer.
    pub async fn into_bytes(mut self) -> Result<Bytes, BackendError> {
        let mut buf = BytesMut::with_capacity(self.meta.size as usize);
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectData")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// One page of a list operation.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Prefixes rolled up by the delimiter, each ending with the delimiter
    pub common_prefixes: Vec<String>,
    /// Token to pass back for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// A part accepted by the backend during a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// A time-limited URL that accepts a direct PUT of one object.
#[derive(Debug, Clone)]
pub struct PresignedPut {
    pub url: String,
    /// Headers the signature covers; they must be sent verbatim
    pub headers: Vec<(String, String)>,
    pub expires_in: Duration,
}

/// Object-store operations for one backend bucket.
///
/// Keys are plain strings; a trailing `/` marks a directory marker object.
/// Implementations do not retry internally: the upload engine owns the
/// retry policy for part uploads and every other failure surfaces as-is.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend type name, for logs.
    fn backend_name(&self) -> &'static str;

    /// Stable identity of the bucket this store points at. Listing-cache
    /// entries are keyed by it, so two stores over the same bucket share them.
    fn identity(&self) -> &str;

    /// Minimum size of a non-final multipart part.
    fn min_part_size(&self) -> u64 {
        DEFAULT_MIN_PART_SIZE
    }

    /// Maximum size of one multipart part.
    fn max_part_size(&self) -> u64 {
        DEFAULT_MAX_PART_SIZE
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, BackendError>;

    async fn get(&self, key: &str) -> Result<ObjectData, BackendError>;

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), BackendError>;

    /// List at most `max_keys` entries (objects plus common prefixes) under `prefix`.
    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, BackendError>;

    async fn copy(&self, from: &str, to: &str) -> Result<(), BackendError>;

    /// Delete one key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, BackendError>;

    /// Upload one part and return its ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, BackendError>;

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), BackendError>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), BackendError>;

    /// Presign a PUT of `key`. Backends without presign support return
    /// [`BackendError::Permanent`].
    async fn presign_put(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> Result<PresignedPut, BackendError>;
}
